//! Vulkan context management
//!
//! Instance, surface, physical device selection and the logical device.
//! Everything here is created once at startup and destroyed last.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use ash::{Device, Entry, Instance};
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::config::{RendererConfig, VALIDATION_LAYER_NAME};
use crate::vulkan::debug::{self, DebugMessenger};
use crate::window::{Window, WindowError};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The validation layer was required but is not installed
    #[error("Validation layer {0} requested but not available")]
    ValidationLayerMissing(String),

    /// The system exposes no Vulkan-capable adapter at all
    #[error("Failed to find GPUs with Vulkan support")]
    NoVulkanDevices,

    /// Every adapter failed the suitability predicate
    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    /// No memory type matches the requested filter and properties
    #[error("No suitable memory type found (type bits {type_bits:#b}, properties {properties:?})")]
    NoSuitableMemoryType {
        /// Memory type filter from the resource's requirements
        type_bits: u32,
        /// Requested property flags
        properties: vk::MemoryPropertyFlags,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Shader bytecode could not be read or is malformed
    #[error("Shader load failed: {0}")]
    ShaderLoad(String),

    /// A texture or other asset could not be loaded
    #[error("Asset load failed: {0}")]
    AssetLoad(String),

    /// Window system failure surfaced during Vulkan setup
    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug messenger, present only when validation is active
    debug_messenger: Option<DebugMessenger>,
}

impl VulkanInstance {
    /// Create the instance, enabling validation according to the configured mode
    pub fn new(window: &Window, config: &RendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {}", e)))?;

        let layer_available = debug::check_validation_layer_support(&entry)?;
        let enable_validation = debug::resolve_validation(config.validation, layer_available)?;

        let app_name = to_cstring(&config.application_name)?;
        let engine_name = to_cstring(env!("CARGO_PKG_NAME"))?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let cstr_extensions = window
            .required_instance_extensions()?
            .iter()
            .map(|ext| to_cstring(ext))
            .collect::<VulkanResult<Vec<_>>>()?;
        let mut extensions: Vec<*const std::os::raw::c_char> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let layer_names = if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
            vec![to_cstring(VALIDATION_LAYER_NAME)?]
        } else {
            Vec::new()
        };
        let layer_name_ptrs: Vec<*const std::os::raw::c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        // Chained so instance creation and destruction are covered as well.
        let mut instance_debug_info = debug::messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);
        if enable_validation {
            create_info = create_info.push_next(&mut instance_debug_info);
        }

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let debug_messenger = if enable_validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Vulkan instance created (validation {})",
            if enable_validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            debug_messenger,
        })
    }

    /// Whether validation messages are being routed to the log
    pub fn validation_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        self.debug_messenger.take();
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value)
        .map_err(|_| VulkanError::InitializationFailed(format!("String contains a NUL byte: {:?}", value)))
}

/// Queue family lookup result; either side may be unresolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics capability
    pub graphics: Option<u32>,
    /// First family able to present to the surface
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan queue families in order, taking the first match for each role
    pub fn find<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> VulkanResult<Self>
    where
        F: FnMut(u32) -> VulkanResult<bool>,
    {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if indices.graphics.is_none()
                && family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics = Some(index);
            }

            if indices.present.is_none() && supports_present(index)? {
                indices.present = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    /// Both roles resolved
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Resolved indices, if both roles are present
    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Fully resolved graphics and present queue families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics queue family index
    pub graphics: u32,
    /// Present queue family index
    pub present: u32,
}

impl QueueFamilies {
    /// Whether graphics and presentation use the same family
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Deduplicated family list, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Why a physical device was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsuitable {
    /// Querying the adapter's surface support failed
    QueryFailed(String),
    /// Not a discrete adapter
    NotDiscrete(vk::PhysicalDeviceType),
    /// Geometry shaders unsupported
    NoGeometryShader,
    /// No graphics-capable queue family
    NoGraphicsQueue,
    /// No family can present to the surface
    NoPresentQueue,
    /// Required device extensions are missing
    MissingExtensions(Vec<String>),
    /// The surface reports no formats for this adapter
    NoSurfaceFormats,
    /// The surface reports no present modes for this adapter
    NoPresentModes,
}

impl std::fmt::Display for Unsuitable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueryFailed(reason) => write!(f, "capability query failed ({})", reason),
            Self::NotDiscrete(kind) => write!(f, "not a discrete GPU ({:?})", kind),
            Self::NoGeometryShader => write!(f, "geometry shaders not supported"),
            Self::NoGraphicsQueue => write!(f, "no graphics queue family"),
            Self::NoPresentQueue => write!(f, "no present queue family"),
            Self::MissingExtensions(names) => write!(f, "missing extensions {}", names.join(", ")),
            Self::NoSurfaceFormats => write!(f, "no surface formats"),
            Self::NoPresentModes => write!(f, "no present modes"),
        }
    }
}

/// Everything the suitability predicate needs to know about one adapter
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    /// Human-readable adapter name
    pub name: String,
    /// Adapter class
    pub device_type: vk::PhysicalDeviceType,
    /// Geometry stage support
    pub geometry_shader: bool,
    /// Queue family lookup result
    pub queue_families: QueueFamilyIndices,
    /// Required extensions this adapter lacks
    pub missing_extensions: Vec<String>,
    /// Number of surface formats reported
    pub surface_format_count: usize,
    /// Number of present modes reported
    pub present_mode_count: usize,
    /// Set when this adapter could not be queried
    pub query_error: Option<String>,
}

impl DeviceCandidate {
    /// Candidate that failed a capability query; it is always rejected
    pub fn unqueryable(name: String, device_type: vk::PhysicalDeviceType, error: &VulkanError) -> Self {
        Self {
            name,
            device_type,
            geometry_shader: false,
            queue_families: QueueFamilyIndices::default(),
            missing_extensions: Vec::new(),
            surface_format_count: 0,
            present_mode_count: 0,
            query_error: Some(error.to_string()),
        }
    }

    /// Evaluate the suitability predicate
    ///
    /// Checks run in a fixed order and the first failure is reported.
    pub fn check(&self, require_discrete: bool) -> Result<QueueFamilies, Unsuitable> {
        if let Some(reason) = &self.query_error {
            return Err(Unsuitable::QueryFailed(reason.clone()));
        }
        if require_discrete && self.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            return Err(Unsuitable::NotDiscrete(self.device_type));
        }
        if !self.geometry_shader {
            return Err(Unsuitable::NoGeometryShader);
        }
        let graphics = self.queue_families.graphics.ok_or(Unsuitable::NoGraphicsQueue)?;
        let present = self.queue_families.present.ok_or(Unsuitable::NoPresentQueue)?;
        if !self.missing_extensions.is_empty() {
            return Err(Unsuitable::MissingExtensions(self.missing_extensions.clone()));
        }
        if self.surface_format_count == 0 {
            return Err(Unsuitable::NoSurfaceFormats);
        }
        if self.present_mode_count == 0 {
            return Err(Unsuitable::NoPresentModes);
        }
        Ok(QueueFamilies { graphics, present })
    }
}

/// First-fit selection over candidates in enumeration order
///
/// Returns the index of the winning candidate and its queue families.
pub fn select_first_suitable(
    candidates: &[DeviceCandidate],
    require_discrete: bool,
) -> VulkanResult<(usize, QueueFamilies)> {
    if candidates.is_empty() {
        return Err(VulkanError::NoVulkanDevices);
    }

    let mut rejections = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        match candidate.check(require_discrete) {
            Ok(families) => return Ok((index, families)),
            Err(reason) => {
                log::debug!("Rejected GPU '{}': {}", candidate.name, reason);
                rejections.push(format!("{}: {}", candidate.name, reason));
            }
        }
    }

    Err(VulkanError::NoSuitableDevice(rejections.join("; ")))
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved queue families
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Select the first adapter that satisfies the suitability predicate
    pub fn select(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        let required_extensions = config.required_device_extensions();
        // A failed query rejects that adapter only; selection moves on.
        let candidates: Vec<DeviceCandidate> = devices
            .iter()
            .map(|&device| {
                Self::describe(instance, device, surface, surface_loader, &required_extensions).unwrap_or_else(|e| {
                    let properties = unsafe { instance.get_physical_device_properties(device) };
                    log::warn!("Could not query GPU '{}': {}", device_name(&properties), e);
                    DeviceCandidate::unqueryable(device_name(&properties), properties.device_type, &e)
                })
            })
            .collect();

        let (index, queue_families) = select_first_suitable(&candidates, config.require_discrete_gpu)?;
        let device = devices[index];

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        log::info!(
            "Selected GPU: {} (graphics family {}, present family {})",
            candidates[index].name,
            queue_families.graphics,
            queue_families.present
        );

        Ok(Self {
            device,
            properties,
            features,
            memory_properties,
            queue_families,
        })
    }

    fn describe(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        required_extensions: &[&CStr],
    ) -> VulkanResult<DeviceCandidate> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let queue_families = QueueFamilyIndices::find(&families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .map_err(VulkanError::Api)
        })?;

        let available = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let missing_extensions = required_extensions
            .iter()
            .filter(|required| {
                !available.iter().any(|ext| {
                    let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                    name == **required
                })
            })
            .map(|name| name.to_string_lossy().into_owned())
            .collect();

        let surface_format_count = unsafe {
            surface_loader
                .get_physical_device_surface_formats(device, surface)
                .map_err(VulkanError::Api)?
                .len()
        };
        let present_mode_count = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(device, surface)
                .map_err(VulkanError::Api)?
                .len()
        };

        Ok(DeviceCandidate {
            name: device_name(&properties),
            device_type: properties.device_type,
            geometry_shader: features.geometry_shader == vk::TRUE,
            queue_families,
            missing_extensions,
            surface_format_count,
            present_mode_count,
            query_error: None,
        })
    }

    /// Whether anisotropic filtering may be enabled
    pub fn supports_anisotropy(&self) -> bool {
        self.features.sampler_anisotropy == vk::TRUE
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the logical device with one queue per unique family
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDeviceInfo,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        let families = physical_device.queue_families;
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions: Vec<*const std::os::raw::c_char> = config
            .required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .geometry_shader(physical_device.features.geometry_shader == vk::TRUE)
            .sampler_anisotropy(physical_device.supports_anisotropy())
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical_device.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        log::debug!("Logical device created with {} queue(s)", queue_infos.len());

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Main Vulkan context that owns all core Vulkan resources
///
/// Fields drop in declaration order: surface (in `Drop`), device, instance.
pub struct VulkanContext {
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    physical_device: PhysicalDeviceInfo,
    device: LogicalDevice,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create instance, surface, physical and logical device for the window
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, config)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window.create_surface(instance.instance.handle())?;

        let physical_device =
            match PhysicalDeviceInfo::select(&instance.instance, surface, &surface_loader, config) {
                Ok(info) => info,
                Err(e) => {
                    unsafe { surface_loader.destroy_surface(surface, None) };
                    return Err(e);
                }
            };

        let device = match LogicalDevice::new(&instance.instance, &physical_device, config) {
            Ok(device) => device,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        Ok(Self {
            surface,
            surface_loader,
            physical_device,
            device,
            instance,
        })
    }

    /// Get the surface handle
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the surface loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the raw Device handle
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Resolved queue families
    pub fn queue_families(&self) -> QueueFamilies {
        self.physical_device.queue_families
    }

    /// Whether the debug messenger is active
    pub fn validation_enabled(&self) -> bool {
        self.instance.validation_enabled()
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn good_candidate(name: &str) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            geometry_shader: true,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            missing_extensions: Vec::new(),
            surface_format_count: 2,
            present_mode_count: 1,
            query_error: None,
        }
    }

    #[test]
    fn test_queue_families_first_match_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index >= 1)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert!(indices.resolve().unwrap().is_shared());
    }

    #[test]
    fn test_queue_families_split() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index == 1)).unwrap();
        let resolved = indices.resolve().unwrap();
        assert_eq!(resolved, QueueFamilies { graphics: 0, present: 1 });
        assert_eq!(resolved.unique(), vec![0, 1]);
    }

    #[test]
    fn test_missing_present_family_does_not_resolve() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();
        assert!(!indices.is_complete());
        assert!(indices.resolve().is_none());
    }

    #[test]
    fn test_present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)));
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR))));
    }

    #[test]
    fn test_shared_family_deduplicated() {
        let families = QueueFamilies { graphics: 2, present: 2 };
        assert_eq!(families.unique(), vec![2]);
    }

    #[test]
    fn test_no_devices_is_fatal() {
        assert!(matches!(select_first_suitable(&[], true), Err(VulkanError::NoVulkanDevices)));
    }

    #[test]
    fn test_first_fit_not_best_fit() {
        let mut integrated = good_candidate("integrated");
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        let candidates = [integrated, good_candidate("first"), good_candidate("second")];

        let (index, families) = select_first_suitable(&candidates, true).unwrap();
        assert_eq!(index, 1);
        assert_eq!(families, QueueFamilies { graphics: 0, present: 0 });

        let (index, _) = select_first_suitable(&candidates, false).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn test_each_predicate_rejects() {
        let mut c = good_candidate("gpu");
        c.geometry_shader = false;
        assert_eq!(c.check(true), Err(Unsuitable::NoGeometryShader));

        let mut c = good_candidate("gpu");
        c.queue_families.graphics = None;
        assert_eq!(c.check(true), Err(Unsuitable::NoGraphicsQueue));

        let mut c = good_candidate("gpu");
        c.queue_families.present = None;
        assert_eq!(c.check(true), Err(Unsuitable::NoPresentQueue));

        let mut c = good_candidate("gpu");
        c.missing_extensions = vec!["VK_KHR_swapchain".to_string()];
        assert!(matches!(c.check(true), Err(Unsuitable::MissingExtensions(_))));

        let mut c = good_candidate("gpu");
        c.surface_format_count = 0;
        assert_eq!(c.check(true), Err(Unsuitable::NoSurfaceFormats));

        let mut c = good_candidate("gpu");
        c.present_mode_count = 0;
        assert_eq!(c.check(true), Err(Unsuitable::NoPresentModes));
    }

    #[test]
    fn test_failed_query_rejects_only_that_adapter() {
        let broken = DeviceCandidate::unqueryable(
            "broken".to_string(),
            vk::PhysicalDeviceType::DISCRETE_GPU,
            &VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR),
        );
        assert!(matches!(broken.check(false), Err(Unsuitable::QueryFailed(_))));

        let candidates = [broken, good_candidate("working")];
        let (index, _) = select_first_suitable(&candidates, true).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_query_failure_checked_before_other_predicates() {
        let mut c = good_candidate("gpu");
        c.query_error = Some("ERROR_DEVICE_LOST".to_string());
        assert_eq!(c.check(true), Err(Unsuitable::QueryFailed("ERROR_DEVICE_LOST".to_string())));
    }

    #[test]
    fn test_all_rejected_reports_reasons() {
        let mut c = good_candidate("software");
        c.device_type = vk::PhysicalDeviceType::CPU;
        match select_first_suitable(&[c], true) {
            Err(VulkanError::NoSuitableDevice(message)) => assert!(message.contains("software")),
            other => panic!("unexpected result: {:?}", other.map(|(i, _)| i)),
        }
    }
}
