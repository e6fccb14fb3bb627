//! Main loop
//!
//! Owns the window, the renderer and the frame scheduler. Each iteration
//! polls window events, forwards resizes to the scheduler and draws one
//! frame. Fatal errors unwind out of [`Engine::run`]; stale swapchains never
//! reach it.

use std::time::Instant;

use thiserror::Error;

use crate::config::{ConfigError, HarnessConfig};
use crate::frame::{FrameOutcome, FrameScheduler};
use crate::vulkan::{VulkanError, VulkanRenderer};
use crate::window::{Window, WindowError, WindowEvent};

/// Anything that can stop the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Vulkan setup or rendering failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// The window system failed
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// The configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Window, renderer and scheduler for one run
///
/// The renderer is declared before the window so the surface is destroyed
/// while the native window still exists.
pub struct Engine {
    scheduler: FrameScheduler,
    renderer: VulkanRenderer,
    window: Window,
    started: Instant,
    skipped_frames: u64,
}

impl Engine {
    /// Open the window and build the renderer
    pub fn new(config: &HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        log::info!("Initializing harness '{}'", config.renderer.application_name);

        let mut window = Window::new(&config.window)?;
        let renderer = VulkanRenderer::new(&mut window, config)?;
        let scheduler = FrameScheduler::new(config.renderer.max_frames_in_flight)?;

        let extent = renderer.extent()?;
        log::info!(
            "Renderer ready: {}x{}, {} frames in flight, validation {}",
            extent.width,
            extent.height,
            scheduler.frames_in_flight(),
            if renderer.context().validation_enabled() { "on" } else { "off" }
        );

        Ok(Self {
            scheduler,
            renderer,
            window,
            started: Instant::now(),
            skipped_frames: 0,
        })
    }

    /// Build everything from `config` and run until the window closes
    pub fn run(config: &HarnessConfig) -> Result<(), HarnessError> {
        let mut engine = Self::new(config)?;
        let result = engine.main_loop();
        let shutdown = engine.shutdown();
        result.and(shutdown)
    }

    fn main_loop(&mut self) -> Result<(), HarnessError> {
        log::info!("Starting main loop...");

        while !self.window.should_close() {
            self.window.poll_events();
            if !self.handle_events() {
                break;
            }

            self.renderer.set_elapsed(self.started.elapsed().as_secs_f32());
            let mut backend = self.renderer.with_window(&mut self.window);
            if self.scheduler.draw_frame(&mut backend)? == FrameOutcome::Skipped {
                self.skipped_frames += 1;
            }
        }

        Ok(())
    }

    /// Apply queued window events; false once a close was requested
    fn handle_events(&mut self) -> bool {
        let mut keep_running = true;
        for event in self.window.drain_events() {
            match event {
                WindowEvent::Resized { width, height } => {
                    log::debug!("Framebuffer resized to {}x{}", width, height);
                    self.scheduler.notify_resized();
                }
                WindowEvent::CloseRequested => keep_running = false,
            }
        }
        keep_running
    }

    /// Drain the GPU before anything is torn down
    fn shutdown(&mut self) -> Result<(), HarnessError> {
        let mut backend = self.renderer.with_window(&mut self.window);
        self.scheduler.shutdown(&mut backend)?;

        let elapsed = self.started.elapsed().as_secs_f64();
        let frames = self.scheduler.frame_counter();
        log::info!(
            "Rendered {} frames in {:.1}s ({:.1} fps, {} skipped)",
            frames,
            elapsed,
            frames as f64 / elapsed.max(f64::EPSILON),
            self.skipped_frames
        );
        Ok(())
    }
}
