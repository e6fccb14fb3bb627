//! # Vulkan Harness
//!
//! A minimal real-time rendering harness built directly on Vulkan (via `ash`)
//! and GLFW. It opens a window, stands up a device context, builds a fixed
//! textured-quad pipeline and drives a frames-in-flight draw loop.
//!
//! ## Layout
//!
//! - [`config`]: immutable startup configuration (TOML / RON)
//! - [`window`]: GLFW window adapter and the resize event queue
//! - [`vulkan`]: device context, swapchain state, pipeline builder,
//!   resource allocator and the Vulkan frame backend
//! - [`frame`]: the frame scheduler driving acquire → record → submit → present
//! - [`engine`]: the main loop tying everything together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vk_harness::{config::HarnessConfig, engine::Engine, logging};
//!
//! fn main() -> Result<(), vk_harness::engine::HarnessError> {
//!     let config = HarnessConfig::default();
//!     logging::init(&config.log_level);
//!     Engine::run(&config)
//! }
//! ```

pub mod config;
pub mod engine;
pub mod frame;
pub mod logging;
pub mod vulkan;
pub mod window;

pub use config::{Config, ConfigError, HarnessConfig};
pub use engine::{Engine, HarnessError};
