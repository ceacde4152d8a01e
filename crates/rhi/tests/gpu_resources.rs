//! Resource tests against a real device.
//!
//! These need a Vulkan driver. On machines without one the tests print a
//! message and return early.

mod common;

use std::sync::Arc;

use ash::vk;
use vkframe_rhi::RhiError;
use vkframe_rhi::buffer::{BufferDesc, GpuBuffer, UploadStrategy};
use vkframe_rhi::command::{CommandPool, RecordingState};
use vkframe_rhi::device::{QueueKind, Submission};
use vkframe_rhi::image::{GpuImage, ImageDesc, PixelData, Texture};
use vkframe_rhi::upload::UploadContext;

use common::headless_device;

#[test]
fn test_staged_vertex_data_reads_back() {
    let Some(device) = headless_device() else {
        return;
    };
    let upload = UploadContext::new(device.clone()).expect("Failed to create upload context");

    let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
    let bytes: &[u8] = bytemuck::cast_slice(&vertices);
    let size = bytes.len() as vk::DeviceSize;

    let desc = BufferDesc::vertex(size).with_usage(vk::BufferUsageFlags::TRANSFER_SRC);
    let vertex_buffer = GpuBuffer::with_data(device.clone(), &upload, desc, bytes)
        .expect("Failed to create vertex buffer");
    assert_eq!(vertex_buffer.strategy(), UploadStrategy::StagingCopy);

    let readback = GpuBuffer::new(device.clone(), BufferDesc::readback(size))
        .expect("Failed to create readback buffer");
    let region = vk::BufferCopy::default().size(size);
    upload
        .one_shot(|cmd| cmd.copy_buffer(vertex_buffer.handle(), readback.handle(), &[region]))
        .expect("Copy to readback failed");

    let out = readback.read(0, bytes.len()).expect("Readback failed");
    assert_eq!(out, bytes);
}

#[test]
fn test_oversized_write_is_rejected() {
    let Some(device) = headless_device() else {
        return;
    };
    let upload = UploadContext::new(device.clone()).expect("Failed to create upload context");
    let buffer = GpuBuffer::new(device, BufferDesc::vertex(16)).expect("Failed to create buffer");

    let result = buffer.write(&upload, 8, &[0u8; 16]);
    assert!(matches!(
        result,
        Err(RhiError::CapacityExceeded {
            requested: 16,
            offset: 8,
            capacity: 16
        })
    ));
}

#[test]
fn test_uniform_buffer_maps_directly() {
    let Some(device) = headless_device() else {
        return;
    };
    let buffer =
        GpuBuffer::new(device, BufferDesc::uniform(64)).expect("Failed to create uniform buffer");
    assert_eq!(buffer.strategy(), UploadStrategy::DirectMap);

    buffer.write_mapped(4, &[1, 2, 3, 4]).expect("Mapped write failed");
    assert_eq!(buffer.read(4, 4).expect("Mapped read failed"), [1, 2, 3, 4]);
}

#[test]
fn test_cleanup_twice_is_harmless() {
    let Some(device) = headless_device() else {
        return;
    };
    let mut buffer =
        GpuBuffer::new(device, BufferDesc::uniform(32)).expect("Failed to create buffer");

    buffer.cleanup();
    buffer.cleanup();
    assert!(buffer.is_destroyed());
    assert!(matches!(
        buffer.write_mapped(0, &[0u8; 4]),
        Err(RhiError::InvalidHandle(_))
    ));
}

#[test]
fn test_submit_requires_ended_buffer() {
    let Some(device) = headless_device() else {
        return;
    };
    let family = device.queue_family(QueueKind::Graphics);
    let pool = CommandPool::new_reusable(device.clone(), family).expect("Failed to create pool");
    let mut cmd = pool.allocate().expect("Failed to allocate command buffer");
    cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        .expect("Failed to begin recording");
    assert_eq!(cmd.state(), RecordingState::Recording);

    let submission = Submission {
        command_buffers: &[&cmd],
        ..Default::default()
    };
    let result = device.submit(QueueKind::Graphics, &submission, vk::Fence::null());
    assert!(matches!(result, Err(RhiError::CommandBufferNotEnded)));

    cmd.end().expect("Failed to end recording");
    assert!(cmd.is_executable());
}

#[test]
fn test_texture_upload_ends_shader_readable() {
    let Some(device) = headless_device() else {
        return;
    };
    let upload = UploadContext::new(device.clone()).expect("Failed to create upload context");

    let pixels = [255u8; 4 * 4 * 4];
    let mut texture = Texture::from_pixels(
        device.clone(),
        &upload,
        PixelData {
            bytes: &pixels,
            width: 4,
            height: 4,
        },
    )
    .expect("Failed to create texture");

    assert!(texture.owns_image());
    assert_eq!(
        texture.image().layout(),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    assert_ne!(texture.sampler(), vk::Sampler::null());

    texture.cleanup();
    texture.cleanup();
    assert!(texture.is_destroyed());
}

#[test]
fn test_shared_image_outlives_texture() {
    let Some(device) = headless_device() else {
        return;
    };
    let upload = UploadContext::new(device.clone()).expect("Failed to create upload context");

    let mut image = GpuImage::new(
        device.clone(),
        ImageDesc::sampled(2, 2, vk::Format::R8G8B8A8_UNORM),
    )
    .expect("Failed to create image");
    assert!(matches!(
        image.upload_pixels(&upload, &[0u8; 32]),
        Err(RhiError::CapacityExceeded { .. })
    ));
    image
        .upload_pixels(&upload, &[0u8; 16])
        .expect("Pixel upload failed");

    let image = Arc::new(image);
    let mut texture = Texture::wrap(device, image.clone()).expect("Failed to wrap image");
    assert!(!texture.owns_image());

    texture.cleanup();
    assert!(texture.is_destroyed());
    assert!(!image.is_destroyed());
}
