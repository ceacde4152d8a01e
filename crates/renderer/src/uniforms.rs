//! Per-frame uniform data shared with the shaders.
//!
//! Structures use `#[repr(C)]` and std140-compatible field ordering, and
//! implement `Pod` so they can be written into a mapped uniform buffer as
//! raw bytes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use vkframe_rhi::RhiResult;
use vkframe_rhi::buffer::GpuBuffer;

/// Uniforms written once per frame into that frame slot's buffer.
///
/// # Memory Layout
///
/// - Offset 0: transform (64 bytes)
/// - Offset 64: tint (16 bytes)
/// - Offset 80: time (4 bytes) + padding (12 bytes)
/// - Total size: 96 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameUniforms {
    pub transform: Mat4,
    pub tint: Vec4,
    pub time: f32,
    pub _padding: [f32; 3],
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Vec4::ONE, 0.0)
    }
}

impl FrameUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(transform: Mat4, tint: Vec4, time: f32) -> Self {
        Self {
            transform,
            tint,
            time,
            _padding: [0.0; 3],
        }
    }

    /// Copies the uniforms into a host-visible uniform buffer.
    pub fn write_to(&self, buffer: &GpuBuffer) -> RhiResult<()> {
        buffer.write_mapped(0, bytemuck::bytes_of(self))
    }
}
