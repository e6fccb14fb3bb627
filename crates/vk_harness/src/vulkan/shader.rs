//! SPIR-V shader modules

use ash::{vk, Device};
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use crate::vulkan::{VulkanError, VulkanResult};

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Entry point name shared by both stages
pub const ENTRY_POINT: &CStr = match CStr::from_bytes_with_nul(b"main\0") {
    Ok(name) => name,
    Err(_) => panic!("entry point literal is NUL terminated"),
};

/// Decode SPIR-V bytes into words, rejecting anything that is not a module
pub fn parse_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(VulkanError::ShaderLoad(format!(
            "SPIR-V length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::ShaderLoad(format!("Invalid SPIR-V: {}", e)))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&word) => Err(VulkanError::ShaderLoad(format!(
            "Bad SPIR-V magic number {:#010x}",
            word
        ))),
        None => Err(VulkanError::ShaderLoad("Empty SPIR-V module".to_string())),
    }
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        let code = parse_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Load shader from SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: Device, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| VulkanError::ShaderLoad(format!("Failed to read {}: {}", path.display(), e)))?;

        log::debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(device, &bytes)
            .map_err(|e| match e {
                VulkanError::ShaderLoad(reason) => VulkanError::ShaderLoad(format!("{}: {}", path.display(), reason)),
                other => other,
            })
    }

    /// Stage description using the `main` entry point
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}
