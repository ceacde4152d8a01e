//! Descriptor set layouts and per-frame descriptor sets.
//!
//! A [`DescriptorSet`] holds one native set per frame in flight, each
//! pointing at that frame's uniform buffer and a shared texture, so a slot
//! can be updated while another is still being read by the GPU.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::{BufferKind, GpuBuffer};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::Texture;

/// Layout binding helpers.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    pub fn uniform_buffer(
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stages)
    }

    pub fn combined_image_sampler(
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(stages)
    }
}

/// Immutable descriptor set layout.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    /// Uniform buffer (vertex + fragment) and a fragment-stage sampler.
    pub fn uniform_and_sampler(
        device: Arc<Device>,
        uniform_binding: u32,
        sampler_binding: u32,
    ) -> RhiResult<Self> {
        Self::new(
            device,
            &[
                DescriptorBindingBuilder::uniform_buffer(
                    uniform_binding,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                ),
                DescriptorBindingBuilder::combined_image_sampler(
                    sampler_binding,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        )
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Resources written into every per-frame set.
pub struct DescriptorSetDesc<'a> {
    pub uniform_binding: u32,
    /// One uniform buffer per frame in flight.
    pub uniform_buffers: &'a [&'a GpuBuffer],
    pub sampler_binding: u32,
    pub texture: &'a Texture,
}

/// Pool sizes for `sets` sets of one uniform buffer and one sampler each.
pub fn pool_sizes(sets: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(sets),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(sets),
    ]
}

fn validate_desc(desc: &DescriptorSetDesc<'_>, sets: usize) -> RhiResult<()> {
    if sets == 0 {
        return Err(RhiError::Unsupported(
            "descriptor set needs at least one frame slot".into(),
        ));
    }
    if desc.uniform_buffers.len() != sets {
        return Err(RhiError::Unsupported(format!(
            "expected {} uniform buffers, got {}",
            sets,
            desc.uniform_buffers.len()
        )));
    }
    for buffer in desc.uniform_buffers {
        if buffer.kind() != BufferKind::Uniform {
            return Err(RhiError::Unsupported(format!(
                "descriptor uniform binding needs a uniform buffer, got {}",
                buffer.kind().name()
            )));
        }
        if buffer.is_destroyed() {
            return Err(RhiError::InvalidHandle(
                "uniform buffer used after cleanup".into(),
            ));
        }
    }
    if desc.texture.is_destroyed() {
        return Err(RhiError::InvalidHandle("texture used after cleanup".into()));
    }
    Ok(())
}

/// One descriptor set per frame slot, allocated from a dedicated pool.
pub struct DescriptorSet {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorSet {
    pub fn new(
        device: Arc<Device>,
        layout: &DescriptorSetLayout,
        frames_in_flight: usize,
        desc: &DescriptorSetDesc<'_>,
    ) -> RhiResult<Self> {
        validate_desc(desc, frames_in_flight)?;

        let set_count = frames_in_flight as u32;
        let sizes = pool_sizes(set_count);
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(set_count)
            .pool_sizes(&sizes);
        let pool = unsafe { device.handle().create_descriptor_pool(&pool_info, None)? };

        let layouts = vec![layout.handle(); frames_in_flight];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = match unsafe { device.handle().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets,
            Err(e) => {
                unsafe { device.handle().destroy_descriptor_pool(pool, None) };
                return Err(e.into());
            }
        };

        let image_info = [vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(desc.texture.view())
            .sampler(desc.texture.sampler())];

        for (&set, buffer) in sets.iter().zip(desc.uniform_buffers) {
            let buffer_info = [vk::DescriptorBufferInfo::default()
                .buffer(buffer.handle())
                .offset(0)
                .range(buffer.size())];

            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(desc.uniform_binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info),
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(desc.sampler_binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info),
            ];

            unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
        }

        debug!("Allocated {} per-frame descriptor sets", sets.len());

        Ok(Self { device, pool, sets })
    }

    /// Native set for frame slot `slot`.
    pub fn handle(&self, slot: usize) -> RhiResult<vk::DescriptorSet> {
        self.sets.get(slot).copied().ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "no descriptor set for frame slot {} ({} allocated)",
                slot,
                self.sets.len()
            ))
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        // Sets are freed with the pool.
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}
