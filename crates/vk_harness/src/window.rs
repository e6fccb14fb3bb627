//! Window management using GLFW
//!
//! Provides the window, its Vulkan surface and a small event queue. Resize
//! notifications are delivered as [`WindowEvent::Resized`] values drained once
//! per loop iteration instead of through a callback with shared state.

use ash::vk;
use thiserror::Error;

use crate::config::WindowConfig;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The native window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Events the harness cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// The framebuffer changed size (may be 0x0 while minimized)
    Resized {
        /// New framebuffer width in pixels
        width: u32,
        /// New framebuffer height in pixels
        height: u32,
    },
    /// The user asked to close the window
    CloseRequested,
}

/// Something that owns a drawable surface whose size may change
///
/// Swapchain recreation only needs these operations from the windowing
/// layer, which keeps the minimized-window wait testable without GLFW.
pub trait SurfaceSource {
    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until at least one window event is available
    fn wait_events(&mut self);

    /// Whether the user asked to close the window
    fn close_requested(&self) -> bool;
}

/// Block until the framebuffer has a non-zero area and return its size
///
/// A minimized window reports 0x0; rendering into it is impossible, so the
/// caller sleeps on the event queue rather than spinning. Returns `None`
/// when the window is closed before it becomes drawable again.
pub fn wait_for_drawable_size<S: SurfaceSource + ?Sized>(source: &mut S) -> Option<(u32, u32)> {
    let mut size = source.framebuffer_size();
    while size.0 == 0 || size.1 == 0 {
        if source.close_requested() {
            log::debug!("Window closed while {}x{}", size.0, size.1);
            return None;
        }
        log::debug!("Framebuffer is {}x{}, waiting for events", size.0, size.1);
        source.wait_events();
        size = source.framebuffer_size();
    }
    Some(size)
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a window without an OpenGL context
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Created {}x{} window '{}'", config.width, config.height, config.title);
        Ok(Self {
            glfw,
            window,
            events,
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Process pending events without blocking
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Drain the queued events, translated to [`WindowEvent`]
    pub fn drain_events(&mut self) -> Vec<WindowEvent> {
        glfw::flush_messages(&self.events)
            .filter_map(|(_, event)| match event {
                glfw::WindowEvent::FramebufferSize(width, height) => Some(WindowEvent::Resized {
                    width: width.max(0) as u32,
                    height: height.max(0) as u32,
                }),
                glfw::WindowEvent::Close => Some(WindowEvent::CloseRequested),
                _ => None,
            })
            .collect()
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Vulkan is not supported by the window system".to_string()))
    }

    /// Create a Vulkan surface bound to this window
    pub fn create_surface(&mut self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {:?}", result)))
        }
    }
}

impl SurfaceSource for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    fn close_requested(&self) -> bool {
        self.window.should_close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a scripted sequence of framebuffer sizes, one per event wait
    struct ScriptedSurface {
        sizes: VecDeque<(u32, u32)>,
        current: (u32, u32),
        waits: usize,
        close_after_waits: Option<usize>,
    }

    impl ScriptedSurface {
        fn new(initial: (u32, u32), later: &[(u32, u32)]) -> Self {
            Self {
                sizes: later.iter().copied().collect(),
                current: initial,
                waits: 0,
                close_after_waits: None,
            }
        }
    }

    impl SurfaceSource for ScriptedSurface {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.current
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(next) = self.sizes.pop_front() {
                self.current = next;
            }
        }

        fn close_requested(&self) -> bool {
            self.close_after_waits.is_some_and(|waits| self.waits >= waits)
        }
    }

    #[test]
    fn test_nonzero_size_returns_immediately() {
        let mut surface = ScriptedSurface::new((800, 600), &[]);
        assert_eq!(wait_for_drawable_size(&mut surface), Some((800, 600)));
        assert_eq!(surface.waits, 0);
    }

    #[test]
    fn test_minimized_window_blocks_until_restored() {
        let mut surface = ScriptedSurface::new((0, 0), &[(0, 0), (0, 0), (1024, 768)]);
        assert_eq!(wait_for_drawable_size(&mut surface), Some((1024, 768)));
        assert_eq!(surface.waits, 3);
    }

    #[test]
    fn test_zero_height_alone_still_blocks() {
        let mut surface = ScriptedSurface::new((1024, 0), &[(1024, 768)]);
        assert_eq!(wait_for_drawable_size(&mut surface), Some((1024, 768)));
        assert_eq!(surface.waits, 1);
    }

    #[test]
    fn test_close_while_minimized_stops_waiting() {
        let mut surface = ScriptedSurface::new((0, 0), &[(0, 0), (0, 0), (0, 0)]);
        surface.close_after_waits = Some(2);
        assert_eq!(wait_for_drawable_size(&mut surface), None);
        assert_eq!(surface.waits, 2);
    }

    #[test]
    fn test_close_with_drawable_size_still_returns_size() {
        let mut surface = ScriptedSurface::new((640, 480), &[]);
        surface.close_after_waits = Some(0);
        assert_eq!(wait_for_drawable_size(&mut surface), Some((640, 480)));
    }
}
