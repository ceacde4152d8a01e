//! Device and swapchain setup shared by the GPU tests.

#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use vkframe_rhi::RhiError;
use vkframe_rhi::device::Device;
use vkframe_rhi::instance::Instance;
use vkframe_rhi::physical_device::select_physical_device;
use vkframe_rhi::surface::{HeadlessTarget, Surface, SurfaceSource};
use vkframe_rhi::swapchain::Swapchain;

fn driver_missing(err: &RhiError) -> bool {
    match err {
        RhiError::LoadingError(_) | RhiError::NoSuitableGpu => true,
        RhiError::VulkanError(result) => matches!(
            *result,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT
                | vk::Result::ERROR_INCOMPATIBLE_DRIVER
                | vk::Result::ERROR_INITIALIZATION_FAILED
        ),
        _ => false,
    }
}

fn skip_if_missing<T>(result: Result<T, RhiError>, what: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if driver_missing(&e) => {
            println!("Skipping test: no usable Vulkan {} ({})", what, e);
            None
        }
        Err(e) => panic!("{} creation failed: {}", what, e),
    }
}

/// Device without a surface, or `None` when no driver is installed.
pub fn headless_device() -> Option<Arc<Device>> {
    let result = Instance::new(false, &[]).and_then(|instance| {
        let info = select_physical_device(&instance, None)?;
        Device::new(instance, info, false)
    });
    skip_if_missing(result, "device")
}

/// FIFO swapchain on a 64x64 headless surface.
pub fn headless_swapchain(frames_in_flight: usize) -> Option<Swapchain> {
    let target = HeadlessTarget::new(64, 64);
    let result = target.required_extensions().and_then(|extensions| {
        let instance = Instance::new(false, &extensions)?;
        let surface = Surface::new(instance.clone(), &target)?;
        let info = select_physical_device(&instance, Some(&surface))?;
        let device = Device::new(instance, info, true)?;
        Swapchain::new(
            device,
            surface,
            target.extent(),
            frames_in_flight,
            vk::PresentModeKHR::FIFO,
        )
    });
    skip_if_missing(result, "swapchain")
}
