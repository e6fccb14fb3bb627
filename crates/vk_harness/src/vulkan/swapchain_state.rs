//! Swapchain lifecycle: Live → Recreating → Live, and finally Destroyed
//!
//! The chain, its views and the framebuffers built on them form one unit
//! ([`PresentTargets`]) that is only ever replaced whole. Recreation follows
//! a fixed protocol:
//!
//! 1. wait until the window has a drawable (non-zero) size
//! 2. wait for the device to go idle
//! 3. drop framebuffers, then views, then the chain
//! 4. build a new chain, views and framebuffers
//!
//! The protocol lives in [`Lifecycle`], which is generic over the target type
//! so it can be exercised without a GPU.

use ash::vk;

use crate::vulkan::context::VulkanContext;
use crate::vulkan::framebuffer::Framebuffer;
use crate::vulkan::render_pass::RenderPass;
use crate::vulkan::swapchain::Swapchain;
use crate::vulkan::{VulkanError, VulkanResult};
use crate::window::{wait_for_drawable_size, SurfaceSource};

/// Lifecycle phase of the presentation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainPhase {
    /// Targets exist and may be rendered to
    Live,
    /// Old targets are gone and new ones are being built
    Recreating,
    /// Torn down for shutdown; no further recreation
    Destroyed,
}

/// Owner of a replaceable set of targets and its phase
#[derive(Debug)]
pub struct Lifecycle<T> {
    targets: Option<T>,
    phase: SwapchainPhase,
    generation: u64,
}

impl<T> Lifecycle<T> {
    /// Start in the live phase with freshly created targets
    pub fn live(targets: T) -> Self {
        Self {
            targets: Some(targets),
            phase: SwapchainPhase::Live,
            generation: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> SwapchainPhase {
        self.phase
    }

    /// Number of completed recreations
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Live targets
    pub fn targets(&self) -> VulkanResult<&T> {
        match (&self.targets, self.phase) {
            (Some(targets), SwapchainPhase::Live) => Ok(targets),
            (_, phase) => Err(VulkanError::InvalidOperation {
                reason: format!("Swapchain targets requested while {:?}", phase),
            }),
        }
    }

    /// Run the recreation protocol
    ///
    /// `wait_idle` runs after the window has a drawable size and before the
    /// old targets are dropped. `create` receives that size. Returns `None`,
    /// leaving the old targets in place, when the window closes while
    /// minimized.
    pub fn recreate<S, W, C>(&mut self, source: &mut S, wait_idle: W, create: C) -> VulkanResult<Option<&T>>
    where
        S: SurfaceSource + ?Sized,
        W: FnOnce() -> VulkanResult<()>,
        C: FnOnce((u32, u32)) -> VulkanResult<T>,
    {
        if self.phase == SwapchainPhase::Destroyed {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot recreate a destroyed swapchain".to_string(),
            });
        }

        let Some(size) = wait_for_drawable_size(source) else {
            return Ok(None);
        };
        wait_idle()?;

        self.phase = SwapchainPhase::Recreating;
        drop(self.targets.take());

        let targets = create(size)?;
        self.targets = Some(targets);
        self.phase = SwapchainPhase::Live;
        self.generation += 1;

        self.targets().map(Some)
    }

    /// Drop the targets for good
    pub fn destroy(&mut self) {
        drop(self.targets.take());
        self.phase = SwapchainPhase::Destroyed;
    }
}

/// Chain, views and framebuffers as one unit
///
/// Framebuffers are declared first so they drop before the views they
/// reference.
pub struct PresentTargets {
    framebuffers: Vec<Framebuffer>,
    swapchain: Swapchain,
}

impl PresentTargets {
    /// Build a chain for the given size and one framebuffer per image
    pub fn new(
        context: &VulkanContext,
        render_pass: &RenderPass,
        window_size: (u32, u32),
        extra_image: bool,
    ) -> VulkanResult<Self> {
        let swapchain = Swapchain::new(context, window_size, extra_image)?;

        if swapchain.format().format != render_pass.color_format() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Surface format changed from {:?} to {:?}",
                    render_pass.color_format(),
                    swapchain.format().format
                ),
            });
        }

        let framebuffers = Framebuffer::for_views(
            context.device(),
            render_pass.handle(),
            swapchain.image_views(),
            swapchain.extent(),
        )?;

        check_target_lengths(
            swapchain.images().len(),
            swapchain.image_views().len(),
            framebuffers.len(),
        )?;

        Ok(Self {
            framebuffers,
            swapchain,
        })
    }

    /// The swapchain
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Framebuffer for an acquired image index
    pub fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No framebuffer for image {}", image_index),
            })
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }
}

/// Images, views and framebuffers must pair up one to one
pub fn check_target_lengths(images: usize, views: usize, framebuffers: usize) -> VulkanResult<()> {
    if images == views && views == framebuffers {
        Ok(())
    } else {
        Err(VulkanError::InvalidOperation {
            reason: format!(
                "Swapchain targets out of step: {} images, {} views, {} framebuffers",
                images, views, framebuffers
            ),
        })
    }
}

/// Swapchain state owned by the renderer
pub struct SwapchainState {
    lifecycle: Lifecycle<PresentTargets>,
    extra_image: bool,
}

impl SwapchainState {
    /// Create the first set of targets
    pub fn new(
        context: &VulkanContext,
        render_pass: &RenderPass,
        window_size: (u32, u32),
        extra_image: bool,
    ) -> VulkanResult<Self> {
        let targets = PresentTargets::new(context, render_pass, window_size, extra_image)?;
        Ok(Self {
            lifecycle: Lifecycle::live(targets),
            extra_image,
        })
    }

    /// Live targets
    pub fn targets(&self) -> VulkanResult<&PresentTargets> {
        self.lifecycle.targets()
    }

    /// Current phase
    pub fn phase(&self) -> SwapchainPhase {
        self.lifecycle.phase()
    }

    /// Tear down and rebuild the chain, views and framebuffers
    ///
    /// Returns false when the window closed before it could be rebuilt.
    pub fn recreate<S: SurfaceSource + ?Sized>(
        &mut self,
        context: &VulkanContext,
        render_pass: &RenderPass,
        source: &mut S,
    ) -> VulkanResult<bool> {
        let extra_image = self.extra_image;
        let (extent, image_count, present_mode) = {
            let recreated = self.lifecycle.recreate(
                source,
                || context.wait_idle(),
                |size| PresentTargets::new(context, render_pass, size, extra_image),
            )?;
            let Some(targets) = recreated else {
                log::info!("Window closed while minimized, keeping the old swapchain for shutdown");
                return Ok(false);
            };
            let swapchain = targets.swapchain();
            (targets.extent(), swapchain.image_count(), swapchain.present_mode())
        };

        log::info!(
            "Swapchain recreated ({}x{}, {} images, {:?}, generation {})",
            extent.width,
            extent.height,
            image_count,
            present_mode,
            self.lifecycle.generation()
        );
        Ok(true)
    }

    /// Release the targets for shutdown
    pub fn destroy(&mut self) {
        self.lifecycle.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Stand-in for a chain with views and framebuffers
    struct MockTargets {
        size: (u32, u32),
        images: Vec<u32>,
        views: Vec<u32>,
        framebuffers: Vec<(u32, u32)>,
        log: Log,
    }

    impl MockTargets {
        fn build(size: (u32, u32), image_count: u32, log: &Log) -> VulkanResult<Self> {
            log.borrow_mut().push(format!("create {}x{}", size.0, size.1));
            let images: Vec<u32> = (0..image_count).collect();
            Ok(Self {
                size,
                views: images.clone(),
                framebuffers: images.iter().map(|_| size).collect(),
                images,
                log: Rc::clone(log),
            })
        }

        fn consistent(&self) -> bool {
            check_target_lengths(self.images.len(), self.views.len(), self.framebuffers.len()).is_ok()
        }
    }

    impl Drop for MockTargets {
        fn drop(&mut self) {
            self.log.borrow_mut().push(format!("destroy {}x{}", self.size.0, self.size.1));
        }
    }

    struct ScriptedSurface {
        sizes: Vec<(u32, u32)>,
        closed: bool,
        log: Log,
    }

    impl SurfaceSource for ScriptedSurface {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.sizes[0]
        }

        fn wait_events(&mut self) {
            self.log.borrow_mut().push("wait events".to_string());
            if self.sizes.len() > 1 {
                self.sizes.remove(0);
            }
        }

        fn close_requested(&self) -> bool {
            self.closed
        }
    }

    fn idle(log: &Log) -> impl FnOnce() -> VulkanResult<()> + '_ {
        move || {
            log.borrow_mut().push("device idle".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_recreate_order_idle_before_destroy() {
        let log: Log = Rc::default();
        let mut lifecycle = Lifecycle::live(MockTargets::build((800, 600), 3, &log).unwrap());
        let mut surface = ScriptedSurface { sizes: vec![(1024, 768)], closed: false, log: Rc::clone(&log) };
        log.borrow_mut().clear();

        lifecycle
            .recreate(&mut surface, idle(&log), |size| MockTargets::build(size, 3, &log))
            .unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["device idle", "destroy 800x600", "create 1024x768"]
        );
        assert_eq!(lifecycle.phase(), SwapchainPhase::Live);
    }

    #[test]
    fn test_minimized_then_restored() {
        let log: Log = Rc::default();
        let mut lifecycle = Lifecycle::live(MockTargets::build((800, 600), 2, &log).unwrap());
        let mut surface = ScriptedSurface {
            sizes: vec![(0, 0), (0, 0), (1024, 768)],
            closed: false,
            log: Rc::clone(&log),
        };
        log.borrow_mut().clear();

        let targets = lifecycle
            .recreate(&mut surface, idle(&log), |size| MockTargets::build(size, 2, &log))
            .unwrap()
            .unwrap();

        assert!(targets.framebuffers.iter().all(|&size| size == (1024, 768)));
        assert_eq!(
            *log.borrow(),
            vec!["wait events", "wait events", "device idle", "destroy 800x600", "create 1024x768"]
        );
    }

    #[test]
    fn test_close_while_minimized_keeps_old_targets() {
        let log: Log = Rc::default();
        let mut lifecycle = Lifecycle::live(MockTargets::build((800, 600), 2, &log).unwrap());
        let mut surface = ScriptedSurface { sizes: vec![(0, 0)], closed: true, log: Rc::clone(&log) };
        log.borrow_mut().clear();

        let result = lifecycle
            .recreate(&mut surface, idle(&log), |size| MockTargets::build(size, 2, &log))
            .unwrap();

        assert!(result.is_none());
        assert!(log.borrow().is_empty());
        assert_eq!(lifecycle.phase(), SwapchainPhase::Live);
        assert_eq!(lifecycle.generation(), 0);
        assert!(lifecycle.targets().is_ok());
    }

    #[test]
    fn test_recreate_twice_is_consistent() {
        let log: Log = Rc::default();
        let mut lifecycle = Lifecycle::live(MockTargets::build((800, 600), 2, &log).unwrap());
        let mut surface = ScriptedSurface { sizes: vec![(640, 480)], closed: false, log: Rc::clone(&log) };

        for (round, count) in [(1, 3), (2, 4)] {
            let targets = lifecycle
                .recreate(&mut surface, idle(&log), |size| MockTargets::build(size, count, &log))
                .unwrap()
                .unwrap();
            assert!(targets.consistent());
            assert_eq!(targets.images.len(), count as usize);
            assert_eq!(lifecycle.generation(), round);
        }
    }

    #[test]
    fn test_idle_failure_keeps_old_targets() {
        let log: Log = Rc::default();
        let mut lifecycle = Lifecycle::live(MockTargets::build((800, 600), 2, &log).unwrap());
        let mut surface = ScriptedSurface { sizes: vec![(800, 600)], closed: false, log: Rc::clone(&log) };

        let result = lifecycle.recreate(
            &mut surface,
            || Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)),
            |size| MockTargets::build(size, 2, &log),
        );

        assert!(result.is_err());
        assert_eq!(lifecycle.phase(), SwapchainPhase::Live);
        assert!(lifecycle.targets().is_ok());
    }

    #[test]
    fn test_failed_create_leaves_no_targets() {
        let log: Log = Rc::default();
        let mut lifecycle = Lifecycle::live(MockTargets::build((800, 600), 2, &log).unwrap());
        let mut surface = ScriptedSurface { sizes: vec![(800, 600)], closed: false, log: Rc::clone(&log) };

        let result = lifecycle.recreate(&mut surface, idle(&log), |_| {
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        });

        assert!(result.is_err());
        assert_eq!(lifecycle.phase(), SwapchainPhase::Recreating);
        assert!(lifecycle.targets().is_err());
    }

    #[test]
    fn test_target_lengths_must_match() {
        assert!(check_target_lengths(3, 3, 3).is_ok());
        assert!(check_target_lengths(0, 0, 0).is_ok());
        assert!(matches!(
            check_target_lengths(3, 3, 2),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(check_target_lengths(2, 3, 3).is_err());
    }

    #[test]
    fn test_destroyed_cannot_recreate() {
        let log: Log = Rc::default();
        let mut lifecycle = Lifecycle::live(MockTargets::build((800, 600), 2, &log).unwrap());
        let mut surface = ScriptedSurface { sizes: vec![(800, 600)], closed: false, log: Rc::clone(&log) };

        lifecycle.destroy();
        assert_eq!(lifecycle.phase(), SwapchainPhase::Destroyed);
        assert_eq!(log.borrow().last().map(String::as_str), Some("destroy 800x600"));

        let result = lifecycle.recreate(&mut surface, idle(&log), |size| MockTargets::build(size, 2, &log));
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }
}
