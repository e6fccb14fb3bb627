//! Frame scheduler: acquire → record → submit → present with N frames in flight
//!
//! The scheduler owns the frame counter, the per-slot phase and the pending
//! resize flag. Everything that touches the GPU sits behind [`FrameBackend`],
//! which the Vulkan renderer implements and tests replace with a mock.
//!
//! Per iteration, with `slot = frame_counter % N`:
//!
//! 1. wait on the slot's fence (the only back-pressure point)
//! 2. acquire an image; a stale chain abandons the iteration and recreates
//! 3. reset the slot's fence
//! 4. record the slot's command buffer for the acquired image
//! 5. submit, waiting on image acquisition at color attachment output
//! 6. present, then recreate if the chain went stale or a resize is pending
//! 7. advance the frame counter

use crate::vulkan::{VulkanError, VulkanResult};

/// Result of asking the chain for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image index ready to be rendered to
    Acquired(u32),
    /// The chain no longer matches the surface
    Stale,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Image queued
    Presented,
    /// Image queued (or dropped) but the chain no longer matches the surface
    Stale,
}

/// GPU side of the frame loop
///
/// Each call maps to one step of the per-frame protocol. Slot indices are
/// always below the scheduler's frame count.
pub trait FrameBackend {
    /// Block until the slot's previous submission has completed
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome>;

    /// Return the slot's fence to the unsignaled state
    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Re-record the slot's command buffer targeting `image_index`
    fn record(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Submit the slot's command buffer, signaling its fence on completion
    fn submit(&mut self, slot: usize) -> VulkanResult<()>;

    /// Present `image_index` once the slot's rendering has finished
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome>;

    /// Rebuild the chain and everything sized from it
    fn recreate_swapchain(&mut self) -> VulkanResult<()>;

    /// Block until the device has no outstanding work
    fn wait_idle(&mut self) -> VulkanResult<()>;
}

/// Where a slot is in its per-frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Not in use by the current iteration
    Idle,
    /// Waiting for an image
    Acquiring,
    /// Command buffer being recorded
    Recording,
    /// Work handed to the graphics queue
    Submitted,
    /// Image handed to the present queue
    Presenting,
}

/// What one call to [`FrameScheduler::draw_frame`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and presented
    Presented {
        /// Swapchain image that was presented
        image_index: u32,
        /// Whether the chain was rebuilt after presenting
        recreated: bool,
    },
    /// Acquisition found a stale chain; nothing was submitted
    Skipped,
}

/// Drives the frame loop over a [`FrameBackend`]
#[derive(Debug)]
pub struct FrameScheduler {
    phases: Vec<SlotPhase>,
    /// Submitted and not yet observed complete through a fence wait
    pending: Vec<bool>,
    frame_counter: u64,
    resize_pending: bool,
    shut_down: bool,
}

impl FrameScheduler {
    /// Scheduler with `frames_in_flight` slots
    pub fn new(frames_in_flight: usize) -> VulkanResult<Self> {
        if frames_in_flight == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "At least one frame in flight is required".to_string(),
            });
        }

        Ok(Self {
            phases: vec![SlotPhase::Idle; frames_in_flight],
            pending: vec![false; frames_in_flight],
            frame_counter: 0,
            resize_pending: false,
            shut_down: false,
        })
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.phases.len()
    }

    /// Frames presented so far
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Slot the next frame will use
    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.phases.len() as u64) as usize
    }

    /// Phase of a slot
    pub fn slot_phase(&self, slot: usize) -> Option<SlotPhase> {
        self.phases.get(slot).copied()
    }

    /// Submissions not yet observed complete
    pub fn in_flight_count(&self) -> usize {
        self.pending.iter().filter(|&&pending| pending).count()
    }

    /// Whether a resize is waiting to be handled
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Record a window resize; handled after the next present
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    /// Run one iteration of the frame loop
    pub fn draw_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> VulkanResult<FrameOutcome> {
        if self.shut_down {
            return Err(VulkanError::InvalidOperation {
                reason: "draw_frame called after shutdown".to_string(),
            });
        }

        let slot = self.current_slot();

        backend.wait_for_slot(slot)?;
        self.pending[slot] = false;

        self.phases[slot] = SlotPhase::Acquiring;
        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Stale => {
                log::warn!("Swapchain stale on acquire (frame {}), recreating", self.frame_counter);
                self.phases[slot] = SlotPhase::Idle;
                self.recreate(backend)?;
                return Ok(FrameOutcome::Skipped);
            }
        };

        backend.reset_slot_fence(slot)?;

        self.phases[slot] = SlotPhase::Recording;
        backend.record(slot, image_index)?;

        backend.submit(slot)?;
        self.phases[slot] = SlotPhase::Submitted;
        self.pending[slot] = true;

        self.phases[slot] = SlotPhase::Presenting;
        let outcome = backend.present(slot, image_index)?;
        self.phases[slot] = SlotPhase::Idle;

        let recreated = match outcome {
            PresentOutcome::Stale => {
                log::warn!("Swapchain stale on present (frame {}), recreating", self.frame_counter);
                true
            }
            PresentOutcome::Presented if self.resize_pending => {
                log::debug!("Window resized, recreating swapchain");
                true
            }
            PresentOutcome::Presented => false,
        };
        if recreated {
            self.recreate(backend)?;
        }

        self.frame_counter += 1;
        Ok(FrameOutcome::Presented { image_index, recreated })
    }

    fn recreate<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> VulkanResult<()> {
        self.resize_pending = false;
        backend.recreate_swapchain()?;
        // Recreation idles the device, so every submission has completed
        self.pending.iter_mut().for_each(|pending| *pending = false);
        Ok(())
    }

    /// Wait for the device to go idle before teardown
    pub fn shutdown<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> VulkanResult<()> {
        if self.shut_down {
            return Ok(());
        }

        backend.wait_idle()?;
        self.pending.iter_mut().for_each(|pending| *pending = false);
        self.phases.iter_mut().for_each(|phase| *phase = SlotPhase::Idle);
        self.shut_down = true;
        log::info!("Frame loop stopped after {} frames", self.frame_counter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate,
        WaitIdle,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FenceState {
        Signaled,
        Unsignaled,
        /// Unsignaled, will signal when submission `id` completes
        Pending(u64),
    }

    /// Simulated device: submissions complete in order when a fence is waited on
    struct MockBackend {
        calls: Vec<Call>,
        fences: Vec<FenceState>,
        gpu_queue: VecDeque<u64>,
        next_submission: u64,
        completed: Vec<u64>,
        max_outstanding: usize,
        image_count: u32,
        next_image: u32,
        stale_acquires: VecDeque<bool>,
        stale_presents: VecDeque<bool>,
        fail_idle: bool,
    }

    impl MockBackend {
        fn new(slots: usize, image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                fences: vec![FenceState::Signaled; slots],
                gpu_queue: VecDeque::new(),
                next_submission: 0,
                completed: Vec::new(),
                max_outstanding: 0,
                image_count,
                next_image: 0,
                stale_acquires: VecDeque::new(),
                stale_presents: VecDeque::new(),
                fail_idle: false,
            }
        }

        fn complete_through(&mut self, submission: u64) {
            while let Some(&front) = self.gpu_queue.front() {
                if front > submission {
                    break;
                }
                self.gpu_queue.pop_front();
                self.completed.push(front);
                for fence in &mut self.fences {
                    if *fence == FenceState::Pending(front) {
                        *fence = FenceState::Signaled;
                    }
                }
            }
        }

        fn complete_all(&mut self) {
            if let Some(&last) = self.gpu_queue.back() {
                self.complete_through(last);
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Wait(slot));
            match self.fences[slot] {
                FenceState::Signaled => Ok(()),
                FenceState::Pending(id) => {
                    self.complete_through(id);
                    Ok(())
                }
                // Reset without a submission: the wait would never return
                FenceState::Unsignaled => Err(VulkanError::Api(ash::vk::Result::TIMEOUT)),
            }
        }

        fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if self.stale_acquires.pop_front().unwrap_or(false) {
                return Ok(AcquireOutcome::Stale);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired(image))
        }

        fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Reset(slot));
            assert_eq!(self.fences[slot], FenceState::Signaled, "reset of an unsignaled fence");
            self.fences[slot] = FenceState::Unsignaled;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            assert_eq!(self.fences[slot], FenceState::Unsignaled, "recorded while still in flight");
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Submit(slot));
            let id = self.next_submission;
            self.next_submission += 1;
            self.fences[slot] = FenceState::Pending(id);
            self.gpu_queue.push_back(id);
            self.max_outstanding = self.max_outstanding.max(self.gpu_queue.len());
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            if self.stale_presents.pop_front().unwrap_or(false) {
                Ok(PresentOutcome::Stale)
            } else {
                Ok(PresentOutcome::Presented)
            }
        }

        fn recreate_swapchain(&mut self) -> VulkanResult<()> {
            self.calls.push(Call::Recreate);
            self.complete_all();
            self.next_image = 0;
            Ok(())
        }

        fn wait_idle(&mut self) -> VulkanResult<()> {
            self.calls.push(Call::WaitIdle);
            if self.fail_idle {
                return Err(VulkanError::Api(ash::vk::Result::ERROR_DEVICE_LOST));
            }
            self.complete_all();
            Ok(())
        }
    }

    #[test]
    fn test_zero_frames_rejected() {
        assert!(FrameScheduler::new(0).is_err());
        assert_eq!(FrameScheduler::new(3).unwrap().frames_in_flight(), 3);
    }

    #[test]
    fn test_steps_run_in_order() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);

        let outcome = scheduler.draw_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0, recreated: false });
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(scheduler.frame_counter(), 1);
        assert_eq!(scheduler.slot_phase(0), Some(SlotPhase::Idle));
    }

    #[test]
    fn test_third_frame_waits_on_first_frames_fence() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);

        scheduler.draw_frame(&mut backend).unwrap();
        scheduler.draw_frame(&mut backend).unwrap();
        assert!(backend.completed.is_empty());
        assert_eq!(scheduler.in_flight_count(), 2);

        backend.calls.clear();
        scheduler.draw_frame(&mut backend).unwrap();

        assert_eq!(backend.calls[0], Call::Wait(0));
        // Only the first frame had to finish; the second is still running
        assert_eq!(backend.completed, vec![0]);
        assert_eq!(backend.gpu_queue, VecDeque::from(vec![1, 2]));
    }

    #[test]
    fn test_in_flight_never_exceeds_slot_count() {
        for frames in 1..=4 {
            let mut scheduler = FrameScheduler::new(frames).unwrap();
            let mut backend = MockBackend::new(frames, 3);

            for _ in 0..20 {
                scheduler.draw_frame(&mut backend).unwrap();
                assert!(scheduler.in_flight_count() <= frames);
            }

            assert_eq!(backend.max_outstanding, frames);
        }
    }

    #[test]
    fn test_slots_cycle_modulo_frame_count() {
        let mut scheduler = FrameScheduler::new(3).unwrap();
        let mut backend = MockBackend::new(3, 4);

        for _ in 0..7 {
            scheduler.draw_frame(&mut backend).unwrap();
        }

        let submits: Vec<usize> = backend
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Submit(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(submits, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn test_stale_acquire_skips_frame_without_resetting_fence() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);
        backend.stale_acquires.push_back(true);

        let outcome = scheduler.draw_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(backend.calls, vec![Call::Wait(0), Call::Acquire(0), Call::Recreate]);
        assert_eq!(scheduler.frame_counter(), 0);
        assert_eq!(backend.fences[0], FenceState::Signaled);

        // The same slot is reused and its fence wait still returns
        backend.calls.clear();
        let outcome = scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0, recreated: false });
        assert_eq!(backend.calls[0], Call::Wait(0));
        assert_eq!(scheduler.frame_counter(), 1);
    }

    #[test]
    fn test_stale_acquire_mid_stream() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);

        scheduler.draw_frame(&mut backend).unwrap();
        scheduler.draw_frame(&mut backend).unwrap();
        backend.stale_acquires.extend([false, true]);
        scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(scheduler.draw_frame(&mut backend).unwrap(), FrameOutcome::Skipped);

        // Nothing was lost: the loop keeps going from slot 1
        assert_eq!(scheduler.current_slot(), 1);
        for _ in 0..4 {
            assert!(matches!(
                scheduler.draw_frame(&mut backend).unwrap(),
                FrameOutcome::Presented { .. }
            ));
        }
    }

    #[test]
    fn test_stale_present_recreates_after_presenting() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);
        backend.stale_presents.push_back(true);

        let outcome = scheduler.draw_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0, recreated: true });
        let present = backend.calls.iter().position(|c| *c == Call::Present(0, 0)).unwrap();
        let recreate = backend.calls.iter().position(|c| *c == Call::Recreate).unwrap();
        assert!(present < recreate);
        assert_eq!(scheduler.frame_counter(), 1);
    }

    #[test]
    fn test_resize_recreates_once_after_present() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);

        scheduler.notify_resized();
        scheduler.notify_resized();
        assert!(scheduler.resize_pending());

        let outcome = scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0, recreated: true });
        assert_eq!(backend.calls.last(), Some(&Call::Recreate));
        assert!(!scheduler.resize_pending());

        backend.calls.clear();
        let outcome = scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0, recreated: false });
        assert!(!backend.calls.contains(&Call::Recreate));
    }

    #[test]
    fn test_stale_acquire_clears_pending_resize() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);
        backend.stale_acquires.push_back(true);
        scheduler.notify_resized();

        scheduler.draw_frame(&mut backend).unwrap();
        scheduler.draw_frame(&mut backend).unwrap();

        let recreates = backend.calls.iter().filter(|c| **c == Call::Recreate).count();
        assert_eq!(recreates, 1);
    }

    #[test]
    fn test_shutdown_waits_for_idle() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);
        scheduler.draw_frame(&mut backend).unwrap();
        scheduler.draw_frame(&mut backend).unwrap();

        scheduler.shutdown(&mut backend).unwrap();

        assert_eq!(backend.calls.last(), Some(&Call::WaitIdle));
        assert!(backend.gpu_queue.is_empty());
        assert_eq!(scheduler.in_flight_count(), 0);

        // A second shutdown is a no-op and drawing is refused
        scheduler.shutdown(&mut backend).unwrap();
        assert_eq!(backend.calls.iter().filter(|c| **c == Call::WaitIdle).count(), 1);
        assert!(scheduler.draw_frame(&mut backend).is_err());
    }

    #[test]
    fn test_shutdown_failure_is_reported() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = MockBackend::new(2, 3);
        backend.fail_idle = true;

        assert!(scheduler.shutdown(&mut backend).is_err());
    }
}
