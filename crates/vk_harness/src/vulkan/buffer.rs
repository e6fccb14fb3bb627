//! Buffer allocation and host-to-device staging
//!
//! [`Allocator`] pairs every buffer or image with its own device memory
//! allocation. Memory types are chosen with [`find_memory_type`], which fails
//! loudly instead of guessing.

use ash::{vk, Device};
use bytemuck::Pod;

use crate::vulkan::commands::CommandPool;
use crate::vulkan::{VulkanError, VulkanResult};

/// Lowest-indexed memory type allowed by `type_bits` whose flags contain `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|&(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
        .ok_or(VulkanError::NoSuitableMemoryType { type_bits, properties })
}

/// Device resource allocator
#[derive(Clone)]
pub struct Allocator {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Allocator {
    /// Create an allocator for the selected device
    pub fn new(device: Device, memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            device,
            memory_properties,
        }
    }

    /// Device handle
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Allocate memory matching the requirements and properties
    pub fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type_index = find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            properties,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        unsafe {
            self.device
                .allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Create a buffer, allocate its memory and bind the two
    pub fn allocate_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Buffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate_memory(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on the pair is owned and released together.
        let buffer = Buffer {
            device: self.device.clone(),
            buffer,
            memory,
            size,
        };

        unsafe {
            self.device
                .bind_buffer_memory(buffer.buffer, buffer.memory, 0)
                .map_err(VulkanError::Api)?;
        }

        log::debug!("Allocated {} byte buffer ({:?})", size, usage);
        Ok(buffer)
    }

    /// Host-visible, host-coherent transfer source filled with `data`
    pub fn create_staging_buffer<T: Pod>(&self, data: &[T]) -> VulkanResult<Buffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let staging = self.allocate_buffer(
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_bytes(bytes)?;
        Ok(staging)
    }

    /// Copy `data` into a device-local buffer through a temporary staging buffer
    ///
    /// The copy is submitted on `queue` and waited on before the staging
    /// buffer is released.
    pub fn upload_via_staging<T: Pod>(
        &self,
        pool: &CommandPool,
        queue: vk::Queue,
        data: &[T],
        destination: &Buffer,
    ) -> VulkanResult<()> {
        let staging = self.create_staging_buffer(data)?;
        if staging.size() > destination.size() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Upload of {} bytes does not fit a {} byte buffer",
                    staging.size(),
                    destination.size()
                ),
            });
        }

        pool.submit_one_shot(queue, |recorder| {
            recorder.cmd_copy_buffer(staging.handle(), destination.handle(), staging.size())
        })
    }

    /// Device-local buffer with the given usage, initialized from `data`
    pub fn create_device_local_buffer<T: Pod>(
        &self,
        pool: &CommandPool,
        queue: vk::Queue,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Buffer> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = self.allocate_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.upload_via_staging(pool, queue, data, &buffer)?;
        Ok(buffer)
    }
}

/// Buffer handle and its memory, released together
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Copy bytes to the start of a host-visible buffer
    pub fn write_bytes(&self, bytes: &[u8]) -> VulkanResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Write of {} bytes exceeds {} byte buffer", bytes.len(), self.size),
            });
        }

        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Write plain-old-data values to a host-visible buffer
    pub fn write_pod<T: Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
