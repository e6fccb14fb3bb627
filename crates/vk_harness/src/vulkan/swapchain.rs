//! Vulkan swapchain management
//!
//! Surface negotiation (format, present mode, extent, image count, sharing)
//! is done by pure functions over the queried capability triple. The
//! [`Swapchain`] wrapper owns the chain and one view per image.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device};

use crate::vulkan::context::{QueueFamilies, VulkanContext};
use crate::vulkan::{VulkanError, VulkanResult};

/// Surface capability triple for one physical device
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    /// Image count and extent limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Query the surface for the given physical device
    pub fn query(
        surface_loader: &Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise the first reported format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Prefer MAILBOX, otherwise FIFO which is always available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Current extent when the surface defines one, else the window size clamped to limits
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_size.0.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_size.1.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Capability minimum, plus one when requested, clamped to a nonzero maximum
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, extra_image: bool) -> u32 {
    let desired = capabilities.min_image_count + u32::from(extra_image);
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Concurrent sharing across distinct families, exclusive otherwise
pub fn sharing_mode(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

/// Create `count` handles, destroying the ones already made if any creation fails
///
/// The result is either a full list or nothing.
pub fn create_all<T, C, D>(count: usize, mut create: C, mut destroy: D) -> VulkanResult<Vec<T>>
where
    C: FnMut(usize) -> VulkanResult<T>,
    D: FnMut(T),
{
    let mut created = Vec::with_capacity(count);
    for index in 0..count {
        match create(index) {
            Ok(handle) => created.push(handle),
            Err(e) => {
                created.into_iter().rev().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a new swapchain for the given framebuffer size
    pub fn new(context: &VulkanContext, window_size: (u32, u32), extra_image: bool) -> VulkanResult<Self> {
        let support = SwapchainSupport::query(
            context.surface_loader(),
            context.physical_device().device,
            context.surface(),
        )?;

        let format = choose_surface_format(&support.formats).ok_or_else(|| {
            VulkanError::InitializationFailed("Surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, window_size);
        let image_count = choose_image_count(&support.capabilities, extra_image);
        let (sharing, family_indices) = sharing_mode(&context.queue_families());

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain_loader = context.swapchain_loader().clone();
        let device = context.device().clone();

        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let image_views = create_all(
            images.len(),
            |index| create_color_view(&device, images[index], format.format),
            |view| unsafe { device.destroy_image_view(view, None) },
        );
        let image_views = match image_views {
            Ok(views) => views,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            present_mode,
            sharing
        );

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views,
            format,
            extent,
            present_mode,
        })
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Negotiated present mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Images owned by the chain
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get image count
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        log::debug!("Swapchain destroyed");
    }
}

/// Single-mip 2D color view over an image
pub fn create_color_view(device: &Device, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None).map_err(VulkanError::Api) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn test_prefers_bgra_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_preference() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX]), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::FIFO]), M::FIFO);
        assert_eq!(choose_present_mode(&[]), M::FIFO);
    }

    #[test]
    fn test_defined_current_extent_wins() {
        let caps = capabilities((640, 480), (1, 1), (4096, 4096));
        for size in [(1, 1), (800, 600), (10_000, 10_000)] {
            assert_eq!(choose_extent(&caps, size), vk::Extent2D { width: 640, height: 480 });
        }
    }

    #[test]
    fn test_undefined_extent_is_clamped() {
        let caps = capabilities((u32::MAX, u32::MAX), (100, 200), (1920, 1080));
        let sizes = [(1, 1), (50, 5000), (800, 600), (1920, 1080), (4000, 150), (u32::MAX - 1, 1)];
        for size in sizes {
            let extent = choose_extent(&caps, size);
            assert!((100..=1920).contains(&extent.width), "{:?} -> {:?}", size, extent);
            assert!((200..=1080).contains(&extent.height), "{:?} -> {:?}", size, extent);
        }
        assert_eq!(choose_extent(&caps, (1024, 768)), vk::Extent2D { width: 1024, height: 768 });
    }

    #[test]
    fn test_image_count_policy() {
        let mut caps = capabilities((800, 600), (1, 1), (800, 600));
        caps.min_image_count = 2;
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps, true), 3);
        assert_eq!(choose_image_count(&caps, false), 2);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps, true), 2);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps, true), 3);
    }

    #[test]
    fn test_sharing_mode() {
        let shared = QueueFamilies { graphics: 0, present: 0 };
        assert_eq!(sharing_mode(&shared), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilies { graphics: 0, present: 2 };
        assert_eq!(sharing_mode(&split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn test_create_all_is_all_or_nothing() {
        let mut destroyed = Vec::new();
        let result = create_all(
            4,
            |i| if i == 2 { Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)) } else { Ok(i) },
            |handle| destroyed.push(handle),
        );
        assert!(result.is_err());
        assert_eq!(destroyed, vec![1, 0]);
    }

    #[test]
    fn test_create_all_success() {
        let created = create_all(3, |i| Ok(i * 10), |_: usize| panic!("nothing to destroy")).unwrap();
        assert_eq!(created, vec![0, 10, 20]);
    }
}
