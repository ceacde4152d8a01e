//! Render passes and the framebuffers that target them.
//!
//! A [`RenderPass`] has one colour attachment that ends in
//! `PRESENT_SRC_KHR`. [`Framebuffers`] bind swapchain views to a pass and
//! carry the swapchain generation they were built for.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What happens to the colour attachment when the pass begins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttachmentLoad {
    /// Clear to the given RGBA colour.
    Clear([f32; 4]),
    /// Keep what an earlier pass wrote.
    Load,
}

impl AttachmentLoad {
    fn load_op(self) -> vk::AttachmentLoadOp {
        match self {
            AttachmentLoad::Clear(_) => vk::AttachmentLoadOp::CLEAR,
            AttachmentLoad::Load => vk::AttachmentLoadOp::LOAD,
        }
    }

    /// Layout the attachment must be in when the pass begins.
    fn initial_layout(self) -> vk::ImageLayout {
        match self {
            AttachmentLoad::Clear(_) => vk::ImageLayout::UNDEFINED,
            AttachmentLoad::Load => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub load: AttachmentLoad,
}

/// Immutable single-subpass render pass.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    pub fn new(device: Arc<Device>, desc: RenderPassDesc) -> RhiResult<Self> {
        let attachments = [vk::AttachmentDescription::default()
            .format(desc.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(desc.load.load_op())
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(desc.load.initial_layout())
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];

        // The acquire semaphore is waited at colour output, so the layout
        // transition has to wait there too.
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        debug!(
            "Created render pass ({:?}, {:?})",
            desc.color_format, desc.load
        );

        Ok(Self {
            device,
            render_pass,
            desc,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.desc.color_format
    }

    pub fn initial_layout(&self) -> vk::ImageLayout {
        self.desc.load.initial_layout()
    }

    /// Clear values for `vkCmdBeginRenderPass`. Empty for `Load`.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        match self.desc.load {
            AttachmentLoad::Clear(color) => vec![vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            }],
            AttachmentLoad::Load => Vec::new(),
        }
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Render pass destroyed");
    }
}

/// One framebuffer per swapchain image for a given render pass.
pub struct Framebuffers {
    device: Arc<Device>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    generation: u64,
}

impl Framebuffers {
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
        generation: u64,
    ) -> RhiResult<Self> {
        let mut framebuffers = Vec::with_capacity(views.len());
        for &view in views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            match unsafe { device.handle().create_framebuffer(&create_info, None) } {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    for framebuffer in framebuffers {
                        unsafe { device.handle().destroy_framebuffer(framebuffer, None) };
                    }
                    return Err(e.into());
                }
            }
        }

        debug!(
            "Created {} framebuffers ({}x{}, generation {})",
            framebuffers.len(),
            extent.width,
            extent.height,
            generation
        );

        Ok(Self {
            device,
            framebuffers,
            render_pass: render_pass.handle(),
            extent,
            generation,
        })
    }

    pub fn get(&self, image_index: u32) -> RhiResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!(
                    "no framebuffer for swapchain image {}",
                    image_index
                ))
            })
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.handle().destroy_framebuffer(framebuffer, None);
            }
        }
        debug!("Destroyed {} framebuffers", self.framebuffers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_load_starts_undefined() {
        let load = AttachmentLoad::Clear([0.0, 0.0, 0.0, 1.0]);
        assert_eq!(load.load_op(), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(load.initial_layout(), vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_load_keeps_presented_contents() {
        assert_eq!(AttachmentLoad::Load.load_op(), vk::AttachmentLoadOp::LOAD);
        assert_eq!(
            AttachmentLoad::Load.initial_layout(),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }
}
