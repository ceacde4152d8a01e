//! GPU images and sampled textures.
//!
//! Pixel data reaches a device-local image through the same blocking staging
//! path as buffers:
//!
//! ```text
//! staging buffer <- pixels
//! one-shot: UNDEFINED -> TRANSFER_DST_OPTIMAL
//! one-shot: copy buffer -> image
//! one-shot: TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL
//! ```
//!
//! Each step is its own one-shot command buffer, awaited before the next.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::buffer::{BufferDesc, GpuBuffer, check_capacity};
use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory;
use crate::upload::UploadContext;

/// Decoded pixels handed over by the image-decode collaborator.
#[derive(Clone, Copy, Debug)]
pub struct PixelData<'a> {
    pub bytes: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Declarative 2D image description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDesc {
    /// A sampled colour image that can be filled through a staging copy.
    pub fn sampled(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            format,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        }
    }

    /// Byte size of a tightly packed upload, if the format is known.
    pub fn byte_size(&self) -> RhiResult<vk::DeviceSize> {
        let texel = bytes_per_texel(self.format)?;
        Ok(self.extent.width as u64 * self.extent.height as u64 * texel)
    }
}

fn bytes_per_texel(format: vk::Format) -> RhiResult<vk::DeviceSize> {
    match format {
        vk::Format::R8_UNORM => Ok(1),
        vk::Format::R8G8_UNORM => Ok(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB => Ok(4),
        vk::Format::R32G32B32A32_SFLOAT => Ok(16),
        other => Err(RhiError::Unsupported(format!(
            "no texel size known for {:?}",
            other
        ))),
    }
}

/// Stage and access masks for an image layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// Maps a layout pair to the stages and accesses the barrier must cover.
///
/// Unknown pairs fall back to a full `ALL_COMMANDS` barrier.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> TransitionMasks {
    let (src_stage, src_access, dst_stage, dst_access) = match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => {
            warn!("Unhandled layout transition: {:?} -> {:?}", old, new);
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    };

    TransitionMasks {
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    }
}

/// Records a colour image layout transition into `cmd`.
pub fn record_transition(
    cmd: &CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let masks = transition_masks(old_layout, new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    cmd.pipeline_barrier(masks.src_stage, masks.dst_stage, &[barrier]);
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Creates a 2D colour view of `image`.
pub fn create_color_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(color_subresource_range());

    let view = unsafe { device.handle().create_image_view(&create_info, None)? };
    Ok(view)
}

/// A device-local image with its own memory and a colour view.
pub struct GpuImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    memory: vk::DeviceMemory,
    desc: ImageDesc,
    layout: vk::ImageLayout,
    destroyed: bool,
}

impl GpuImage {
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::Unsupported(
                "image extent must be non-zero".into(),
            ));
        }

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let handle = device.handle();
        let image = unsafe { handle.create_image(&create_info, None)? };
        let requirements = unsafe { handle.get_image_memory_requirements(image) };

        let memory = match memory::allocate(
            &device,
            &requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { handle.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = unsafe { handle.bind_image_memory(image, memory, 0) }
            .map_err(RhiError::from)
            .and_then(|_| create_color_view(&device, image, desc.format));
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    handle.destroy_image(image, None);
                    handle.free_memory(memory, None);
                }
                return Err(e);
            }
        };

        debug!(
            "Created {}x{} {:?} image",
            desc.extent.width, desc.extent.height, desc.format
        );

        Ok(Self {
            device,
            image,
            view,
            memory,
            desc,
            layout: vk::ImageLayout::UNDEFINED,
            destroyed: false,
        })
    }

    /// Uploads tightly packed pixels and leaves the image ready for sampling.
    ///
    /// # Errors
    ///
    /// [`RhiError::CapacityExceeded`] if `pixels` is larger than the image,
    /// [`RhiError::Unsupported`] if it is smaller. Both are checked before any
    /// GPU work.
    pub fn upload_pixels(&mut self, upload: &UploadContext, pixels: &[u8]) -> RhiResult<()> {
        let expected = self.desc.byte_size()?;
        check_capacity(expected, 0, pixels.len())?;
        if (pixels.len() as u64) < expected {
            return Err(RhiError::Unsupported(format!(
                "pixel data holds {} bytes, image needs {}",
                pixels.len(),
                expected
            )));
        }
        if self.destroyed {
            return Err(RhiError::InvalidHandle("image used after cleanup".into()));
        }

        let staging = GpuBuffer::new(self.device.clone(), BufferDesc::staging(expected))?;
        staging.write_mapped(0, pixels)?;

        let image = self.image;
        let old_layout = self.layout;
        upload.one_shot(|cmd| {
            record_transition(cmd, image, old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        })?;
        self.layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: self.desc.extent.width,
                height: self.desc.extent.height,
                depth: 1,
            });
        upload.one_shot(|cmd| {
            cmd.copy_buffer_to_image(
                staging.handle(),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        })?;

        upload.one_shot(|cmd| {
            record_transition(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;
        self.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        debug!(
            "Uploaded {} bytes into {}x{} image",
            pixels.len(),
            self.desc.extent.width,
            self.desc.extent.height
        );
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Layout the image was left in by the last upload.
    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Destroys the view, image and memory. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let handle = self.device.handle();
        unsafe {
            handle.destroy_image_view(self.view, None);
            handle.destroy_image(self.image, None);
            handle.free_memory(self.memory, None);
        }
        self.view = vk::ImageView::null();
        self.image = vk::Image::null();
        self.memory = vk::DeviceMemory::null();

        debug!("Destroyed image");
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// The image behind a texture: owned (cleanup cascades) or shared.
enum TextureImage {
    Owned(GpuImage),
    Shared(Arc<GpuImage>),
}

/// A sampled image plus its sampler.
pub struct Texture {
    device: Arc<Device>,
    image: TextureImage,
    sampler: vk::Sampler,
    destroyed: bool,
}

impl Texture {
    /// Creates an sRGB RGBA8 image from decoded pixels and owns it.
    pub fn from_pixels(
        device: Arc<Device>,
        upload: &UploadContext,
        pixels: PixelData<'_>,
    ) -> RhiResult<Self> {
        let desc = ImageDesc::sampled(pixels.width, pixels.height, vk::Format::R8G8B8A8_SRGB);
        let mut image = GpuImage::new(device.clone(), desc)?;
        image.upload_pixels(upload, pixels.bytes)?;
        let sampler = create_sampler(&device)?;
        Ok(Self {
            device,
            image: TextureImage::Owned(image),
            sampler,
            destroyed: false,
        })
    }

    /// Wraps an image owned elsewhere. Cleaning up the texture leaves the
    /// image alone.
    pub fn wrap(device: Arc<Device>, image: Arc<GpuImage>) -> RhiResult<Self> {
        let sampler = create_sampler(&device)?;
        Ok(Self {
            device,
            image: TextureImage::Shared(image),
            sampler,
            destroyed: false,
        })
    }

    pub fn image(&self) -> &GpuImage {
        match &self.image {
            TextureImage::Owned(image) => image,
            TextureImage::Shared(image) => image,
        }
    }

    /// Whether cleanup cascades into the image.
    pub fn owns_image(&self) -> bool {
        matches!(self.image, TextureImage::Owned(_))
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image().view()
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Destroys the sampler, and the image if owned. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
        self.sampler = vk::Sampler::null();

        if let TextureImage::Owned(image) = &mut self.image {
            image.cleanup();
        }
        debug!("Destroyed texture");
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn create_sampler(device: &Device) -> RhiResult<vk::Sampler> {
    let anisotropy = device.anisotropy_enabled();
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(if anisotropy {
            device.limits().max_sampler_anisotropy
        } else {
            1.0
        })
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .min_lod(0.0)
        .max_lod(0.0);

    let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transitions() {
        let to_dst = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let to_read = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_unknown_transition_falls_back_to_full_barrier() {
        let masks = transition_masks(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn test_image_byte_size() {
        let desc = ImageDesc::sampled(4, 2, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(desc.byte_size().unwrap(), 32);

        let desc = ImageDesc::sampled(4, 2, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(desc.byte_size().unwrap(), 128);

        let desc = ImageDesc::sampled(4, 2, vk::Format::BC1_RGB_UNORM_BLOCK);
        assert!(matches!(desc.byte_size(), Err(RhiError::Unsupported(_))));
    }

    #[test]
    fn test_sampled_desc_usage() {
        let desc = ImageDesc::sampled(1, 1, vk::Format::R8G8B8A8_UNORM);
        assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(desc.usage.contains(vk::ImageUsageFlags::SAMPLED));
    }
}
