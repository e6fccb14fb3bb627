//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! Semaphores order GPU work (acquire → render → present) and are invisible
//! to the CPU. Fences let the CPU wait for a slot's previous submission,
//! which is the only back-pressure on the draw loop.

use ash::{vk, Device};

use crate::vulkan::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Block until the fence is signaled
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Block with no timeout
    pub fn wait_forever(&self) -> VulkanResult<()> {
        self.wait(u64::MAX)
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Per-slot synchronization triple
pub struct FrameSync {
    /// Signaled by acquire, waited on at color attachment output
    pub image_available: Semaphore,
    /// Signaled by the submission, waited on by present
    pub render_finished: Semaphore,
    /// Signaled when the slot's submission completes
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create the triple; the fence starts signaled so the first wait returns
    pub fn new(device: Device) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Swap in a fresh image-available semaphore
    ///
    /// Needed after an acquire whose result was discarded: the old semaphore
    /// is left with a pending signal that nothing will wait on. Only valid
    /// while the device is idle.
    pub fn replace_image_available(&mut self, device: Device) -> VulkanResult<()> {
        self.image_available = Semaphore::new(device)?;
        Ok(())
    }
}

/// One [`FrameSync`] per frame in flight
pub struct FrameSyncSet {
    slots: Vec<FrameSync>,
}

impl FrameSyncSet {
    /// Create `count` sync triples
    pub fn new(device: &Device, count: usize) -> VulkanResult<Self> {
        let slots = (0..count)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<VulkanResult<Vec<_>>>()?;
        log::debug!("Created {} frame sync sets", count);
        Ok(Self { slots })
    }

    /// Sync objects for a slot
    pub fn slot(&self, index: usize) -> VulkanResult<&FrameSync> {
        self.slots.get(index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Frame slot {} out of range ({} slots)", index, self.slots.len()),
        })
    }

    /// Mutable sync objects for a slot
    pub fn slot_mut(&mut self, index: usize) -> VulkanResult<&mut FrameSync> {
        let len = self.slots.len();
        self.slots.get_mut(index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Frame slot {} out of range ({} slots)", index, len),
        })
    }
}
