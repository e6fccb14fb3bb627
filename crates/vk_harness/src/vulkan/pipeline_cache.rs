//! On-disk pipeline cache
//!
//! The blob is read from a fixed path and checked against the selected
//! device before it seeds the driver cache. Any problem with the blob only
//! means starting from an empty cache. Write-back failures are logged.

use ash::{vk, Device};
use std::path::{Path, PathBuf};

use crate::vulkan::{VulkanError, VulkanResult};

/// Size of the version-one cache header
pub const CACHE_HEADER_LEN: usize = 16 + vk::UUID_SIZE;

/// The fields of the header that tie a blob to one driver and device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheIdentity {
    /// PCI vendor id
    pub vendor_id: u32,
    /// Device id
    pub device_id: u32,
    /// Driver pipeline cache UUID
    pub uuid: [u8; vk::UUID_SIZE],
}

impl CacheIdentity {
    /// Identity of a physical device
    pub fn from_properties(properties: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            uuid: properties.pipeline_cache_uuid,
        }
    }
}

/// Why a cache blob was not used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRejection {
    /// Shorter than the header
    Truncated(usize),
    /// Header length field is wrong
    HeaderLength(u32),
    /// Unknown header version
    Version(u32),
    /// Written by another vendor's driver
    Vendor(u32),
    /// Written for another device
    Device(u32),
    /// Written by another driver build
    Uuid,
}

impl std::fmt::Display for CacheRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated(len) => write!(f, "blob of {} bytes is shorter than the header", len),
            Self::HeaderLength(len) => write!(f, "header length {}", len),
            Self::Version(version) => write!(f, "header version {}", version),
            Self::Vendor(id) => write!(f, "vendor {:#06x}", id),
            Self::Device(id) => write!(f, "device {:#06x}", id),
            Self::Uuid => write!(f, "cache UUID mismatch"),
        }
    }
}

fn read_u32(blob: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&blob[offset..offset + 4]);
    u32::from_ne_bytes(word)
}

/// Check a blob's header against the device that will consume it
pub fn validate_cache_blob(blob: &[u8], identity: &CacheIdentity) -> Result<(), CacheRejection> {
    if blob.len() < CACHE_HEADER_LEN {
        return Err(CacheRejection::Truncated(blob.len()));
    }

    let header_len = read_u32(blob, 0);
    if header_len as usize != CACHE_HEADER_LEN {
        return Err(CacheRejection::HeaderLength(header_len));
    }

    let version = read_u32(blob, 4);
    if version != vk::PipelineCacheHeaderVersion::ONE.as_raw() as u32 {
        return Err(CacheRejection::Version(version));
    }

    let vendor_id = read_u32(blob, 8);
    if vendor_id != identity.vendor_id {
        return Err(CacheRejection::Vendor(vendor_id));
    }

    let device_id = read_u32(blob, 12);
    if device_id != identity.device_id {
        return Err(CacheRejection::Device(device_id));
    }

    if blob[16..CACHE_HEADER_LEN] != identity.uuid {
        return Err(CacheRejection::Uuid);
    }

    Ok(())
}

/// Read a blob from disk, returning it only if it is usable
pub fn read_cache_blob(path: &Path, identity: &CacheIdentity) -> Option<Vec<u8>> {
    let blob = match std::fs::read(path) {
        Ok(blob) => blob,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No pipeline cache at {}", path.display());
            return None;
        }
        Err(e) => {
            log::warn!("Failed to read pipeline cache {}: {}", path.display(), e);
            return None;
        }
    };

    match validate_cache_blob(&blob, identity) {
        Ok(()) => Some(blob),
        Err(reason) => {
            log::warn!("Ignoring pipeline cache {}: {}", path.display(), reason);
            None
        }
    }
}

/// Driver pipeline cache with RAII cleanup, tied to a file path
pub struct PipelineCache {
    device: Device,
    cache: vk::PipelineCache,
    path: PathBuf,
    seeded: bool,
}

impl PipelineCache {
    /// Create a cache seeded from `path` when the blob there is usable
    pub fn load(device: Device, identity: &CacheIdentity, path: impl Into<PathBuf>) -> VulkanResult<Self> {
        let path = path.into();

        if let Some(blob) = read_cache_blob(&path, identity) {
            match create_cache(&device, &blob) {
                Ok(cache) => {
                    log::info!("Seeded pipeline cache from {} ({} bytes)", path.display(), blob.len());
                    return Ok(Self {
                        device,
                        cache,
                        path,
                        seeded: true,
                    });
                }
                Err(e) => log::warn!("Driver rejected pipeline cache {}: {}", path.display(), e),
            }
        }

        let cache = create_cache(&device, &[])?;
        Ok(Self {
            device,
            cache,
            path,
            seeded: false,
        })
    }

    /// Get the cache handle
    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    /// Whether the cache was seeded from disk
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Replace the cache with an empty one
    pub fn discard_seed(&mut self) -> VulkanResult<()> {
        let fresh = create_cache(&self.device, &[])?;
        unsafe {
            self.device.destroy_pipeline_cache(self.cache, None);
        }
        self.cache = fresh;
        self.seeded = false;
        Ok(())
    }

    /// Write the current cache contents back to disk; failures are logged
    pub fn persist(&self) {
        let data = match unsafe { self.device.get_pipeline_cache_data(self.cache) } {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Failed to read pipeline cache data: {:?}", e);
                return;
            }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create {}: {}", parent.display(), e);
                return;
            }
        }

        match std::fs::write(&self.path, &data) {
            Ok(()) => log::debug!("Wrote {} byte pipeline cache to {}", data.len(), self.path.display()),
            Err(e) => log::warn!("Failed to write pipeline cache {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_cache(self.cache, None);
        }
    }
}

fn create_cache(device: &Device, initial_data: &[u8]) -> VulkanResult<vk::PipelineCache> {
    let create_info = vk::PipelineCacheCreateInfo::builder().initial_data(initial_data);
    unsafe {
        device
            .create_pipeline_cache(&create_info, None)
            .map_err(VulkanError::Api)
    }
}
