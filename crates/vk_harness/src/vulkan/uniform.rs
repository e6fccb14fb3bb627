//! Per-frame transform uniforms

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3};

/// Model, view and projection matrices, column-major as GLSL expects
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Model to world
    pub model: [[f32; 4]; 4],
    /// World to camera
    pub view: [[f32; 4]; 4],
    /// Camera to clip space
    pub proj: [[f32; 4]; 4],
}

impl UniformBufferObject {
    /// Byte size as seen by descriptor writes
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<Self>() as vk::DeviceSize;

    /// Build from nalgebra matrices
    pub fn new(model: &Matrix4<f32>, view: &Matrix4<f32>, proj: &Matrix4<f32>) -> Self {
        Self {
            model: (*model).into(),
            view: (*view).into(),
            proj: (*proj).into(),
        }
    }

    /// The spinning quad: 90 degrees per second about Z, seen from (2, 2, 2)
    pub fn spinning_quad(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let model = Matrix4::from_axis_angle(&Vector3::z_axis(), elapsed_secs * 90f32.to_radians());
        let view = Matrix4::look_at_rh(
            &Point3::new(2.0, 2.0, 2.0),
            &Point3::origin(),
            &Vector3::z(),
        );
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let proj = vulkan_perspective(45f32.to_radians(), aspect, 0.1, 10.0);
        Self::new(&model, &view, &proj)
    }
}

/// Right-handed perspective with depth in [0, 1] and Y pointing down
pub fn vulkan_perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let tan_half_fovy = (fov_y * 0.5).tan();
    let mut result = Matrix4::zeros();

    result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
    result[(1, 1)] = -1.0 / tan_half_fovy;
    result[(2, 2)] = far / (near - far);
    result[(2, 3)] = near * far / (near - far);
    result[(3, 2)] = -1.0;

    result
}
