//! # Harness Configuration
//!
//! One immutable configuration struct is built at startup and handed by
//! reference to the window, the device context and the pipeline builder.
//! Nothing in the harness reads configuration from global state.
//!
//! Files are TOML or RON, chosen by extension.

use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use std::path::Path;

/// Name of the Khronos validation layer
pub const VALIDATION_LAYER_NAME: &str = "VK_LAYER_KHRONOS_validation";

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Load configuration from file, or fall back to defaults when the file does not exist
    fn load_or_default(path: &str) -> Result<Self, ConfigError> {
        if Path::new(path).exists() {
            Self::load_from_file(path)
        } else {
            log::info!("No configuration at {}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is out of its accepted range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Window creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Initial framebuffer width in pixels
    pub width: u32,
    /// Initial framebuffer height in pixels
    pub height: u32,
    /// Window title
    pub title: String,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Vulkan App".to_string(),
            resizable: true,
        }
    }
}

/// How the Khronos validation layer is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Never load the layer
    Disabled,
    /// Load the layer when installed, otherwise log and continue
    IfAvailable,
    /// Fail initialization when the layer is missing
    Required,
}

impl Default for ValidationMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::IfAvailable
        } else {
            Self::Disabled
        }
    }
}

/// Rasterizer face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    Back,
}

/// Winding order treated as front-facing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontFace {
    /// Clockwise winding
    Clockwise,
    /// Counter-clockwise winding
    CounterClockwise,
}

/// Shader bytecode locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config by probing the usual output directories
    ///
    /// Useful when the binary may be started from the workspace root or from
    /// the application directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let shader_dirs = ["target/shaders/", "shaders/", "../target/shaders/", "./"];

        let resolve = |base: &str| {
            shader_dirs
                .iter()
                .map(|dir| format!("{}{}", dir, base))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("target/shaders/{}", base))
        };

        Self {
            vertex_shader_path: resolve(base_vertex),
            fragment_shader_path: resolve(base_fragment),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("quad.vert.spv", "quad.frag.spv")
    }
}

/// Renderer configuration: device context, swapchain and pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Validation layer policy
    pub validation: ValidationMode,
    /// Only accept discrete GPUs during device selection
    pub require_discrete_gpu: bool,
    /// Number of frames the CPU may record ahead of the GPU
    pub max_frames_in_flight: usize,
    /// Request one image above the surface minimum
    pub extra_swapchain_image: bool,
    /// Where the pipeline cache blob is read from and written back to
    pub pipeline_cache_path: String,
    /// Optional texture file; a generated checkerboard is used when absent
    pub texture_path: Option<String>,
    /// Rasterizer culling
    pub cull_mode: CullMode,
    /// Rasterizer front face
    pub front_face: FrontFace,
    /// Clear color of the single color attachment
    pub clear_color: [f32; 4],
    /// Shader configuration
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            validation: ValidationMode::default(),
            require_discrete_gpu: true,
            max_frames_in_flight: 2,
            extra_swapchain_image: true,
            pipeline_cache_path: "pipeline_cache.bin".to_string(),
            texture_path: None,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderConfig::default(),
        }
    }

    /// Set the validation policy
    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Device extensions every candidate GPU must expose
    pub fn required_device_extensions(&self) -> Vec<&'static CStr> {
        vec![ash::extensions::khr::Swapchain::name()]
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::Invalid("Max frames in flight must be at least 1".to_string()));
        }

        if self.max_frames_in_flight > 8 {
            return Err(ConfigError::Invalid(
                "Max frames in flight should not exceed 8".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Vulkan App")
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Window parameters
    pub window: WindowConfig,
    /// Renderer parameters
    pub renderer: RendererConfig,
}

impl HarnessConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        self.renderer.validate()
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

impl Config for HarnessConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("vk_harness_{}_{}", std::process::id(), name))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.renderer.max_frames_in_flight, 2);
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let mut config = HarnessConfig::default();
        config.renderer.max_frames_in_flight = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_too_many_frames_in_flight() {
        let config = RendererConfig::default().with_max_frames_in_flight(9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_window_size() {
        let mut config = HarnessConfig::default();
        config.window.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let path = temp_path("config.toml");
        let mut config = HarnessConfig::default();
        config.renderer.texture_path = Some("texture.png".to_string());
        config.renderer.cull_mode = CullMode::None;

        config.save_to_file(&path).unwrap();
        let loaded = HarnessConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let path = temp_path("config.ron");
        let config = HarnessConfig {
            log_level: "debug".to_string(),
            ..HarnessConfig::default()
        };

        config.save_to_file(&path).unwrap();
        let loaded = HarnessConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_extension() {
        let config = HarnessConfig::default();
        assert!(matches!(
            config.save_to_file("config.json"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let loaded = HarnessConfig::load_or_default(&temp_path("missing.toml")).unwrap();
        assert_eq!(loaded, HarnessConfig::default());
    }

    #[test]
    fn test_builder_overrides() {
        let config = RendererConfig::new("Builder")
            .with_validation(ValidationMode::Required)
            .with_max_frames_in_flight(3)
            .with_shaders(ShaderConfig::new("a.vert.spv", "a.frag.spv"));

        assert_eq!(config.validation, ValidationMode::Required);
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.shaders.vertex_shader_path, "a.vert.spv");
        assert_eq!(config.shaders.fragment_shader_path, "a.frag.spv");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_required_extensions_include_swapchain() {
        let extensions = RendererConfig::default().required_device_extensions();
        assert!(extensions.contains(&ash::extensions::khr::Swapchain::name()));
    }
}
