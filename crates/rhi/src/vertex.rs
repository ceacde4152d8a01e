//! Vertex formats and input layouts.
//!
//! A [`VertexLayout`] is built from an ordered list of attribute formats;
//! offsets and stride follow from each format's byte size. Attribute `i` is
//! bound at shader location `i`.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::error::{RhiError, RhiResult};

/// Byte size of a vertex attribute format.
///
/// Only the float formats used by vertex inputs are supported.
pub fn format_size(format: vk::Format) -> RhiResult<u32> {
    match format {
        vk::Format::R32_SFLOAT => Ok(4),
        vk::Format::R32G32_SFLOAT => Ok(8),
        vk::Format::R32G32B32_SFLOAT => Ok(12),
        vk::Format::R32G32B32A32_SFLOAT => Ok(16),
        other => Err(RhiError::UnsupportedVertexFormat(other)),
    }
}

/// Interleaved vertex layout for a single binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    binding: u32,
    formats: Vec<vk::Format>,
    offsets: Vec<u32>,
    stride: u32,
}

impl VertexLayout {
    pub fn new(binding: u32, formats: &[vk::Format]) -> RhiResult<Self> {
        let mut offsets = Vec::with_capacity(formats.len());
        let mut stride = 0;
        for &format in formats {
            offsets.push(stride);
            stride += format_size(format)?;
        }

        Ok(Self {
            binding,
            formats: formats.to_vec(),
            offsets,
            stride,
        })
    }

    #[inline]
    pub fn binding(&self) -> u32 {
        self.binding
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[inline]
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    #[inline]
    pub fn formats(&self) -> &[vk::Format] {
        &self.formats
    }

    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: self.binding,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.formats
            .iter()
            .zip(&self.offsets)
            .enumerate()
            .map(|(location, (&format, &offset))| vk::VertexInputAttributeDescription {
                binding: self.binding,
                location: location as u32,
                format,
                offset,
            })
            .collect()
    }
}

/// 2D position with an RGB colour.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl ColorVertex {
    #[inline]
    pub const fn new(position: Vec2, color: Vec3) -> Self {
        Self { position, color }
    }

    /// Layout matching the in-memory representation, at binding 0.
    pub fn layout() -> RhiResult<VertexLayout> {
        VertexLayout::new(
            0,
            &[vk::Format::R32G32_SFLOAT, vk::Format::R32G32B32_SFLOAT],
        )
    }
}

/// 2D position with a texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: Vec2,
    pub tex_coord: Vec2,
}

impl TexturedVertex {
    #[inline]
    pub const fn new(position: Vec2, tex_coord: Vec2) -> Self {
        Self { position, tex_coord }
    }

    pub fn layout() -> RhiResult<VertexLayout> {
        VertexLayout::new(0, &[vk::Format::R32G32_SFLOAT, vk::Format::R32G32_SFLOAT])
    }
}
