//! Presentation surfaces.
//!
//! The window itself belongs to the embedding application. This module only
//! needs three things from it, captured by [`SurfaceSource`]: the instance
//! extensions it requires, a way to create a `VkSurfaceKHR`, and the current
//! framebuffer size.
//!
//! Any window that exposes `raw-window-handle` handles gets a [`SurfaceSource`]
//! implementation by implementing [`WindowTarget`]. [`HeadlessTarget`] uses
//! `VK_EXT_headless_surface` so the whole frame loop can run without a window
//! system.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Something a Vulkan surface can be created for.
pub trait SurfaceSource {
    /// Instance extensions needed to create the surface.
    fn required_extensions(&self) -> RhiResult<Vec<*const c_char>>;

    /// Creates the raw surface. Ownership passes to the caller.
    fn create_surface(&self, instance: &Instance) -> RhiResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels.
    fn extent(&self) -> vk::Extent2D;
}

/// A native window handed over by the window/input collaborator.
pub trait WindowTarget: HasDisplayHandle + HasWindowHandle {
    /// Framebuffer size in physical pixels.
    fn framebuffer_size(&self) -> (u32, u32);
}

impl<W: WindowTarget + ?Sized> SurfaceSource for W {
    fn required_extensions(&self) -> RhiResult<Vec<*const c_char>> {
        let display = self
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display.as_raw())?;
        Ok(extensions.to_vec())
    }

    fn create_surface(&self, instance: &Instance) -> RhiResult<vk::SurfaceKHR> {
        let display = self
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(format!("Failed to get display handle: {}", e)))?;
        let window = self
            .window_handle()
            .map_err(|e| RhiError::SurfaceError(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: the handles come from a live window, and the returned surface
        // is wrapped in `Surface`, which destroys it before the instance.
        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                window.as_raw(),
                None,
            )?
        };
        Ok(surface)
    }

    fn extent(&self) -> vk::Extent2D {
        let (width, height) = self.framebuffer_size();
        vk::Extent2D { width, height }
    }
}

/// Window-less surface backed by `VK_EXT_headless_surface`.
#[derive(Debug, Clone, Copy)]
pub struct HeadlessTarget {
    pub width: u32,
    pub height: u32,
}

impl HeadlessTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SurfaceSource for HeadlessTarget {
    fn required_extensions(&self) -> RhiResult<Vec<*const c_char>> {
        Ok(vec![
            ash::khr::surface::NAME.as_ptr(),
            ash::ext::headless_surface::NAME.as_ptr(),
        ])
    }

    fn create_surface(&self, instance: &Instance) -> RhiResult<vk::SurfaceKHR> {
        let loader = ash::ext::headless_surface::Instance::new(instance.entry(), instance.handle());
        let create_info = vk::HeadlessSurfaceCreateInfoEXT::default();
        let surface = unsafe { loader.create_headless_surface(&create_info, None)? };
        Ok(surface)
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// RAII wrapper around a `VkSurfaceKHR`.
///
/// Holds the instance so the surface is always destroyed first.
pub struct Surface {
    instance: Arc<Instance>,
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for `source` on an instance that was created with
    /// `source.required_extensions()` enabled.
    pub fn new(instance: Arc<Instance>, source: &(impl SurfaceSource + ?Sized)) -> RhiResult<Self> {
        let handle = source.create_surface(&instance)?;
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        info!("Vulkan surface created");
        Ok(Self {
            instance,
            handle,
            loader,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Returns whether `family` on `physical_device` can present to this surface.
    pub fn supports_family(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
    ) -> RhiResult<bool> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.handle)?
        };
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_target_extensions() {
        let target = HeadlessTarget::new(64, 32);
        let extensions = target.required_extensions().unwrap();
        let names: Vec<&std::ffi::CStr> = extensions
            .iter()
            .map(|&ptr| unsafe { std::ffi::CStr::from_ptr(ptr) })
            .collect();
        assert_eq!(
            names,
            vec![ash::khr::surface::NAME, ash::ext::headless_surface::NAME]
        );
    }

    #[test]
    fn test_headless_target_extent() {
        let extent = HeadlessTarget::new(640, 480).extent();
        assert_eq!(extent.width, 640);
        assert_eq!(extent.height, 480);
    }
}
