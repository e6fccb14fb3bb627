//! Descriptor set layout, pool and per-slot sets
//!
//! Binding 0 is the transform uniform block (vertex stage), binding 1 the
//! combined image sampler (fragment stage). One set per frame in flight.

use ash::{vk, Device};

use crate::vulkan::{VulkanError, VulkanResult};

/// Uniform block binding
pub const UNIFORM_BINDING: u32 = 0;
/// Texture sampler binding
pub const SAMPLER_BINDING: u32 = 1;

/// Layout bindings for the quad pipeline
pub fn quad_bindings() -> [vk::DescriptorSetLayoutBinding; 2] {
    [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ]
}

/// Pool sizes for `set_count` sets of [`quad_bindings`]
pub fn pool_sizes(set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    quad_bindings()
        .iter()
        .map(|binding| vk::DescriptorPoolSize {
            ty: binding.descriptor_type,
            descriptor_count: binding.descriptor_count * set_count,
        })
        .collect()
}

/// Descriptor set layout with RAII cleanup
pub struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Layout for the quad's uniform block and texture
    pub fn new(device: Device) -> VulkanResult<Self> {
        let bindings = quad_bindings();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe {
            device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, layout })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// What one set points at
#[derive(Debug, Clone, Copy)]
pub struct SetResources {
    /// Uniform buffer for the slot
    pub uniform_buffer: vk::Buffer,
    /// Bytes of the uniform block
    pub uniform_range: vk::DeviceSize,
    /// Texture view
    pub image_view: vk::ImageView,
    /// Texture sampler
    pub sampler: vk::Sampler,
}

/// Descriptor pool owning one set per frame in flight
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorPool {
    /// Allocate and write one set per entry in `resources`
    pub fn new(device: Device, layout: &DescriptorSetLayout, resources: &[SetResources]) -> VulkanResult<Self> {
        let set_count = resources.len() as u32;
        let sizes = pool_sizes(set_count);
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(set_count);

        let pool = unsafe {
            device
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        let mut descriptor_pool = Self {
            device,
            pool,
            sets: Vec::new(),
        };

        let layouts = vec![layout.handle(); resources.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        descriptor_pool.sets = unsafe {
            descriptor_pool
                .device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        for (&set, resource) in descriptor_pool.sets.iter().zip(resources) {
            descriptor_pool.write(set, resource);
        }

        log::debug!("Allocated {} descriptor sets", set_count);
        Ok(descriptor_pool)
    }

    fn write(&self, set: vk::DescriptorSet, resources: &SetResources) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: resources.uniform_buffer,
            offset: 0,
            range: resources.uniform_range,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler: resources.sampler,
            image_view: resources.image_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UNIFORM_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(SAMPLER_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
        ];

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
    }

    /// Set for a frame slot
    pub fn set(&self, slot: usize) -> VulkanResult<vk::DescriptorSet> {
        self.sets.get(slot).copied().ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("No descriptor set for slot {}", slot),
        })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            // Frees the sets as well.
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_stages() {
        let [uniform, sampler] = quad_bindings();
        assert_eq!(uniform.binding, 0);
        assert_eq!(uniform.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(uniform.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(sampler.binding, 1);
        assert_eq!(sampler.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sampler.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_pool_sizes_scale_with_slots() {
        let sizes = pool_sizes(3);
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|size| size.descriptor_count == 3));
    }
}
