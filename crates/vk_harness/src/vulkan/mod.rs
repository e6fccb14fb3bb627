//! Vulkan backend
//!
//! RAII wrappers over `ash` handles. Each wrapper holds a clone of the
//! logical device and releases its handle in `Drop`; owners declare fields
//! in reverse-of-creation order so teardown runs in the right order.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod debug;
pub mod descriptor;
pub mod framebuffer;
pub mod image;
pub mod pipeline;
pub mod pipeline_cache;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod swapchain_state;
pub mod sync;
pub mod uniform;
pub mod vertex;

pub use buffer::{find_memory_type, Allocator, Buffer};
pub use commands::{CommandPool, CommandRecorder};
pub use context::{
    DeviceCandidate, LogicalDevice, PhysicalDeviceInfo, QueueFamilies, QueueFamilyIndices, VulkanContext,
    VulkanError, VulkanInstance, VulkanResult,
};
pub use image::{GpuImage, LayoutTransition, Texture, TextureData};
pub use pipeline::GraphicsPipeline;
pub use pipeline_cache::PipelineCache;
pub use render_pass::RenderPass;
pub use renderer::{VulkanRenderer, WindowedRenderer};
pub use swapchain::Swapchain;
pub use swapchain_state::{PresentTargets, SwapchainPhase, SwapchainState};
pub use sync::{Fence, FrameSync, FrameSyncSet, Semaphore};
