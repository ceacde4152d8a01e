//! Shared fixtures for renderer integration tests.
//!
//! The shaders are hand-assembled SPIR-V 1.0 so the tests do not depend on a
//! shader compiler being installed.

#![allow(dead_code)]

use ash::vk;
use glam::{Vec2, Vec3};
use vkframe_core::{PresentModePreference, RendererConfig};
use vkframe_renderer::{FrameUniforms, RenderError, Renderer};
use vkframe_rhi::RhiError;
use vkframe_rhi::buffer::{BufferDesc, GpuBuffer};
use vkframe_rhi::descriptor::{DescriptorSet, DescriptorSetDesc, DescriptorSetLayout};
use vkframe_rhi::image::{PixelData, Texture};
use vkframe_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline};
use vkframe_rhi::render_pass::RenderPass;
use vkframe_rhi::shader::{DEFAULT_ENTRY_POINT, Shader, ShaderStage};
use vkframe_rhi::surface::HeadlessTarget;
use vkframe_rhi::vertex::ColorVertex;

/// `gl_Position = vec4(in_position, 0.0, 1.0)` with `in_position` at
/// location 0.
#[rustfmt::skip]
pub const VERTEX_SPIRV: [u32; 98] = [
    // header: magic, version 1.0, generator, bound, schema
    0x0723_0203, 0x0001_0000, 0, 18, 0,
    // OpCapability Shader
    0x0002_0011, 1,
    // OpMemoryModel Logical GLSL450
    0x0003_000E, 0, 1,
    // OpEntryPoint Vertex %12 "main" %8 %9
    0x0007_000F, 0, 12, 0x6E69_616D, 0, 8, 9,
    // OpDecorate %8 Location 0
    0x0004_0047, 8, 30, 0,
    // OpDecorate %9 BuiltIn Position
    0x0004_0047, 9, 11, 0,
    // %1 void, %2 fn() -> void, %3 f32, %4 vec2, %5 vec4
    0x0002_0013, 1,
    0x0003_0021, 2, 1,
    0x0003_0016, 3, 32,
    0x0004_0017, 4, 3, 2,
    0x0004_0017, 5, 3, 4,
    // %6 Input vec2*, %7 Output vec4*
    0x0004_0020, 6, 1, 4,
    0x0004_0020, 7, 3, 5,
    // %8 in_position, %9 gl_Position
    0x0004_003B, 6, 8, 1,
    0x0004_003B, 7, 9, 3,
    // %10 = 0.0, %11 = 1.0
    0x0004_002B, 3, 10, 0,
    0x0004_002B, 3, 11, 0x3F80_0000,
    // %12 main
    0x0005_0036, 1, 12, 0, 2,
    0x0002_00F8, 13,
    0x0004_003D, 4, 14, 8,
    0x0005_0051, 3, 15, 14, 0,
    0x0005_0051, 3, 16, 14, 1,
    0x0007_0050, 5, 17, 15, 16, 10, 11,
    0x0003_003E, 9, 17,
    0x0001_00FD,
    0x0001_0038,
];

/// Writes opaque red to location 0.
#[rustfmt::skip]
pub const FRAGMENT_SPIRV: [u32; 70] = [
    0x0723_0203, 0x0001_0000, 0, 12, 0,
    // OpCapability Shader
    0x0002_0011, 1,
    // OpMemoryModel Logical GLSL450
    0x0003_000E, 0, 1,
    // OpEntryPoint Fragment %10 "main" %6
    0x0006_000F, 4, 10, 0x6E69_616D, 0, 6,
    // OpExecutionMode %10 OriginUpperLeft
    0x0003_0010, 10, 7,
    // OpDecorate %6 Location 0
    0x0004_0047, 6, 30, 0,
    // %1 void, %2 fn() -> void, %3 f32, %4 vec4, %5 Output vec4*
    0x0002_0013, 1,
    0x0003_0021, 2, 1,
    0x0003_0016, 3, 32,
    0x0004_0017, 4, 3, 4,
    0x0004_0020, 5, 3, 4,
    // %6 out_color
    0x0004_003B, 5, 6, 3,
    // %7 = 0.0, %8 = 1.0, %9 = vec4(1, 0, 0, 1)
    0x0004_002B, 3, 7, 0,
    0x0004_002B, 3, 8, 0x3F80_0000,
    0x0007_002C, 4, 9, 8, 7, 7, 8,
    // %10 main
    0x0005_0036, 1, 10, 0, 2,
    0x0002_00F8, 11,
    0x0003_003E, 6, 9,
    0x0001_00FD,
    0x0001_0038,
];

fn driver_missing(err: &RenderError) -> bool {
    match err {
        RenderError::Rhi(RhiError::LoadingError(_) | RhiError::NoSuitableGpu) => true,
        RenderError::Rhi(RhiError::VulkanError(result)) => matches!(
            *result,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT
                | vk::Result::ERROR_INCOMPATIBLE_DRIVER
                | vk::Result::ERROR_INITIALIZATION_FAILED
        ),
        _ => false,
    }
}

pub fn test_config() -> RendererConfig {
    RendererConfig {
        frames_in_flight: 2,
        enable_validation: false,
        present_mode: PresentModePreference::Fifo,
        ..Default::default()
    }
}

/// A renderer on a 64x64 headless surface, or `None` when the driver does
/// not support one.
pub fn try_renderer() -> Option<Renderer> {
    let _ = vkframe_core::try_init_logging();
    match Renderer::new(&HeadlessTarget::new(64, 64), test_config()) {
        Ok(renderer) => Some(renderer),
        Err(e) if driver_missing(&e) => {
            println!("Skipping test: no headless Vulkan surface ({})", e);
            None
        }
        Err(e) => panic!("Renderer creation failed: {}", e),
    }
}

/// Everything needed to draw one textured quad.
pub struct QuadScene {
    pub descriptor_set: DescriptorSet,
    pub pipeline: Pipeline,
    pub layout: DescriptorSetLayout,
    pub texture: Texture,
    pub uniforms: Vec<GpuBuffer>,
    pub index_buffer: GpuBuffer,
    pub vertex_buffer: GpuBuffer,
    pub render_pass: RenderPass,
}

impl QuadScene {
    pub fn new(renderer: &Renderer) -> Result<Self, RenderError> {
        let device = renderer.device().clone();
        let render_pass = renderer.create_clear_pass()?;

        let vertices = [
            ColorVertex::new(Vec2::new(-0.5, -0.5), Vec3::X),
            ColorVertex::new(Vec2::new(0.5, -0.5), Vec3::Y),
            ColorVertex::new(Vec2::new(0.5, 0.5), Vec3::Z),
            ColorVertex::new(Vec2::new(-0.5, 0.5), Vec3::ONE),
        ];
        let indices: [u16; 6] = [0, 1, 2, 2, 3, 0];

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex_buffer = GpuBuffer::with_data(
            device.clone(),
            renderer.upload(),
            BufferDesc::vertex(vertex_bytes.len() as u64),
            vertex_bytes,
        )?;
        let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
        let index_buffer = GpuBuffer::with_data(
            device.clone(),
            renderer.upload(),
            BufferDesc::index(index_bytes.len() as u64, vk::IndexType::UINT16),
            index_bytes,
        )?;

        let uniforms = (0..renderer.frames_in_flight())
            .map(|_| {
                let buffer = GpuBuffer::new(
                    device.clone(),
                    BufferDesc::uniform(FrameUniforms::SIZE as u64),
                )?;
                FrameUniforms::default().write_to(&buffer)?;
                Ok(buffer)
            })
            .collect::<Result<Vec<_>, RhiError>>()?;

        let white = [255u8; 4];
        let texture = Texture::from_pixels(
            device.clone(),
            renderer.upload(),
            PixelData {
                bytes: &white,
                width: 1,
                height: 1,
            },
        )?;

        let layout = DescriptorSetLayout::uniform_and_sampler(device.clone(), 0, 1)?;
        let uniform_refs: Vec<&GpuBuffer> = uniforms.iter().collect();
        let descriptor_set = DescriptorSet::new(
            device.clone(),
            &layout,
            renderer.frames_in_flight(),
            &DescriptorSetDesc {
                uniform_binding: 0,
                uniform_buffers: &uniform_refs,
                sampler_binding: 1,
                texture: &texture,
            },
        )?;

        let vertex_shader = Shader::from_spirv_bytes(
            device.clone(),
            bytemuck::cast_slice(&VERTEX_SPIRV),
            ShaderStage::Vertex,
            DEFAULT_ENTRY_POINT,
        )?;
        let fragment_shader = Shader::from_spirv_bytes(
            device.clone(),
            bytemuck::cast_slice(&FRAGMENT_SPIRV),
            ShaderStage::Fragment,
            DEFAULT_ENTRY_POINT,
        )?;
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .vertex_layout(&ColorVertex::layout()?)
            .render_pass(&render_pass)
            .descriptor_set_layout(layout.handle())
            .build(device)?;

        Ok(Self {
            descriptor_set,
            pipeline,
            layout,
            texture,
            uniforms,
            index_buffer,
            vertex_buffer,
            render_pass,
        })
    }

    pub fn draw(&self, renderer: &mut Renderer) -> Result<(), RenderError> {
        renderer.draw(
            &self.render_pass,
            &self.pipeline,
            &self.vertex_buffer,
            &self.index_buffer,
            &self.descriptor_set,
        )
    }
}
