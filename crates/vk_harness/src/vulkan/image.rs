//! Images, layout transitions and the sampled texture
//!
//! Texture uploads use the two-phase barrier pattern:
//! `UNDEFINED → TRANSFER_DST_OPTIMAL` before the staging copy and
//! `TRANSFER_DST_OPTIMAL → SHADER_READ_ONLY_OPTIMAL` after it.

use ash::{vk, Device};
use std::path::Path;

use crate::vulkan::buffer::Allocator;
use crate::vulkan::commands::CommandPool;
use crate::vulkan::swapchain::create_color_view;
use crate::vulkan::{VulkanError, VulkanResult};

/// Format used for sampled color textures
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Access and stage masks for one image layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Accesses that must complete before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage the barrier waits on
    pub src_stage: vk::PipelineStageFlags,
    /// Stage blocked until the barrier resolves
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Masks for the supported transitions
    pub fn between(old: vk::ImageLayout, new: vk::ImageLayout) -> VulkanResult<Self> {
        match (old, new) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(Self {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            }),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok(Self {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            }),
            _ => Err(VulkanError::InvalidOperation {
                reason: format!("Unsupported layout transition {:?} -> {:?}", old, new),
            }),
        }
    }

    /// Barrier over the single color mip of `image`
    pub fn barrier(&self, image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .build()
    }
}

/// Decoded RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl TextureData {
    /// Wrap raw RGBA8 pixels, checking the buffer length
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> VulkanResult<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(VulkanError::AssetLoad(format!(
                "{}x{} RGBA8 texture needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Decode an image file into RGBA8
    pub fn load(path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let decoded = image::open(path)
            .map_err(|e| VulkanError::AssetLoad(format!("{}: {}", path.display(), e)))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        log::info!("Loaded texture {} ({}x{})", path.display(), width, height);
        Self::from_rgba8(width, height, decoded.into_raw())
    }

    /// Black and white checkerboard of `size`x`size` pixels with `cell` sized squares
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let size = size.max(1);
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| (x, y)))
            .flat_map(|(x, y)| {
                let value: u8 = if (x / cell + y / cell) % 2 == 0 { 255 } else { 40 };
                [value, value, value, 255]
            })
            .collect();
        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    /// Pixel bytes, row-major RGBA8
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Extent of the texture
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// Image handle and its memory, released together
pub struct GpuImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl GpuImage {
    /// Get the image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Image size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Record and wait for a layout transition
    pub fn transition(
        &self,
        pool: &CommandPool,
        queue: vk::Queue,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let transition = LayoutTransition::between(old, new)?;
        pool.submit_one_shot(queue, |recorder| {
            recorder.cmd_image_barrier(
                transition.src_stage,
                transition.dst_stage,
                transition.barrier(self.image, old, new),
            )
        })
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl Allocator {
    /// Create a 2D optimal-tiling image, allocate its memory and bind the two
    pub fn allocate_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<GpuImage> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let device = self.device();
        let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match self.allocate_memory(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let image = GpuImage {
            device: device.clone(),
            image,
            memory,
            extent,
            format,
        };

        unsafe {
            device
                .bind_image_memory(image.image, image.memory, 0)
                .map_err(VulkanError::Api)?;
        }

        log::debug!("Allocated {}x{} image ({:?})", extent.width, extent.height, format);
        Ok(image)
    }
}

/// Sampled texture: image, view and sampler
///
/// The view and sampler are destroyed in `Drop`, then the image field.
pub struct Texture {
    sampler: vk::Sampler,
    view: vk::ImageView,
    image: GpuImage,
}

impl Texture {
    /// Upload pixels into a device-local image ready for fragment sampling
    ///
    /// `max_anisotropy` enables anisotropic filtering when set.
    pub fn upload(
        allocator: &Allocator,
        pool: &CommandPool,
        queue: vk::Queue,
        data: &TextureData,
        max_anisotropy: Option<f32>,
    ) -> VulkanResult<Self> {
        let staging = allocator.create_staging_buffer(data.pixels())?;
        let image = allocator.allocate_image(
            data.extent(),
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        image.transition(
            pool,
            queue,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        pool.submit_one_shot(queue, |recorder| {
            recorder.cmd_copy_buffer_to_image(staging.handle(), image.handle(), data.extent())
        })?;
        image.transition(
            pool,
            queue,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        drop(staging);

        let device = allocator.device();
        let view = create_color_view(device, image.handle(), TEXTURE_FORMAT)?;
        let sampler = match create_sampler(device, max_anisotropy) {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { device.destroy_image_view(view, None) };
                return Err(e);
            }
        };

        log::debug!(
            "Texture uploaded ({}x{}, {:?})",
            image.extent().width,
            image.extent().height,
            image.format()
        );
        Ok(Self { sampler, view, image })
    }

    /// Get the image view for descriptor set binding
    pub fn image_view(&self) -> vk::ImageView {
        self.view
    }

    /// Get the sampler for descriptor set binding
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.image.device.destroy_sampler(self.sampler, None);
            self.image.device.destroy_image_view(self.view, None);
        }
    }
}

fn create_sampler(device: &Device, max_anisotropy: Option<f32>) -> VulkanResult<vk::Sampler> {
    let create_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(max_anisotropy.is_some())
        .max_anisotropy(max_anisotropy.unwrap_or(1.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

    unsafe { device.create_sampler(&create_info, None).map_err(VulkanError::Api) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_masks() {
        let t = LayoutTransition::between(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert_eq!(t.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_sampling_transition_masks() {
        let t = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_phases_chain_write_to_read() {
        let upload = LayoutTransition::between(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        let sample = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        // The second barrier must wait on exactly what the first one unblocked.
        assert_eq!(sample.src_access, upload.dst_access);
        assert_eq!(sample.src_stage, upload.dst_stage);
    }

    #[test]
    fn test_unsupported_transition_rejected() {
        assert!(LayoutTransition::between(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        )
        .is_err());
        assert!(LayoutTransition::between(vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR).is_err());
    }

    #[test]
    fn test_barrier_carries_masks_and_layouts() {
        let t = LayoutTransition::between(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        let barrier = t.barrier(vk::Image::null(), vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_checkerboard_pattern() {
        let data = TextureData::checkerboard(8, 1);
        assert_eq!(data.pixels().len(), 8 * 8 * 4);
        assert_eq!(&data.pixels()[0..4], &[255, 255, 255, 255]);
        assert_eq!(&data.pixels()[4..8], &[40, 40, 40, 255]);
        // Second row starts with the opposite color.
        assert_eq!(&data.pixels()[32..36], &[40, 40, 40, 255]);
    }

    #[test]
    fn test_rgba_length_checked() {
        assert!(TextureData::from_rgba8(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(TextureData::from_rgba8(2, 2, vec![0; 15]), Err(VulkanError::AssetLoad(_))));
        assert!(TextureData::from_rgba8(0, 2, Vec::new()).is_err());
    }

    #[test]
    fn test_missing_texture_file() {
        assert!(matches!(TextureData::load("does/not/exist.png"), Err(VulkanError::AssetLoad(_))));
    }
}
