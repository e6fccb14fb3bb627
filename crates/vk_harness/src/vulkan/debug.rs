//! Validation layer support and the debug messenger
//!
//! The messenger is an optional capability: it is resolved once when the
//! instance is created and stored as `Option<DebugMessenger>`. When validation
//! is off (or the layer is missing in `IfAvailable` mode) the option is empty
//! and nothing else in the harness needs to know.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};
use std::ffi::CStr;

use crate::config::{ValidationMode, VALIDATION_LAYER_NAME};
use crate::vulkan::{VulkanError, VulkanResult};

/// Whether the Khronos validation layer is installed
pub fn check_validation_layer_support(entry: &Entry) -> VulkanResult<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .map_err(VulkanError::Api)?;

    Ok(layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name.to_str().map_or(false, |name| name == VALIDATION_LAYER_NAME)
    }))
}

/// Decide whether validation is enabled for this run
///
/// A missing layer is only fatal when the configuration demands it.
pub fn resolve_validation(mode: ValidationMode, layer_available: bool) -> VulkanResult<bool> {
    match (mode, layer_available) {
        (ValidationMode::Disabled, _) => Ok(false),
        (_, true) => Ok(true),
        (ValidationMode::IfAvailable, false) => {
            log::warn!("{} not installed, continuing without validation", VALIDATION_LAYER_NAME);
            Ok(false)
        }
        (ValidationMode::Required, false) => Err(VulkanError::ValidationLayerMissing(
            VALIDATION_LAYER_NAME.to_string(),
        )),
    }
}

/// Messenger create info shared by instance creation and the messenger itself
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

/// Debug messenger wrapper with RAII cleanup
pub struct DebugMessenger {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Register the messenger on an instance created with `VK_EXT_debug_utils`
    pub fn new(entry: &Entry, instance: &Instance) -> VulkanResult<Self> {
        let loader = DebugUtils::new(entry, instance);
        let create_info = messenger_create_info();

        let messenger = unsafe {
            loader
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!("Debug messenger registered");
        Ok(Self { loader, messenger })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// Map a validation message severity to a log level
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    log::log!(severity_level(message_severity), "[Vulkan] {:?} - {}", message_type, message);

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_enables() {
        assert!(!resolve_validation(ValidationMode::Disabled, true).unwrap());
        assert!(!resolve_validation(ValidationMode::Disabled, false).unwrap());
    }

    #[test]
    fn test_optional_layer_missing_is_not_fatal() {
        assert!(!resolve_validation(ValidationMode::IfAvailable, false).unwrap());
        assert!(resolve_validation(ValidationMode::IfAvailable, true).unwrap());
    }

    #[test]
    fn test_required_layer_missing_is_fatal() {
        assert!(matches!(
            resolve_validation(ValidationMode::Required, false),
            Err(VulkanError::ValidationLayerMissing(_))
        ));
    }

    #[test]
    fn test_severity_mapping() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(severity_level(S::ERROR), log::Level::Error);
        assert_eq!(severity_level(S::WARNING), log::Level::Warn);
        assert_eq!(severity_level(S::INFO), log::Level::Info);
        assert_eq!(severity_level(S::VERBOSE), log::Level::Debug);
    }

    #[test]
    fn test_messenger_subscribes_warning_and_above() {
        let info = messenger_create_info();
        assert!(info.message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
        assert!(info.message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
        assert!(!info.message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(info.pfn_user_callback.is_some());
    }
}
