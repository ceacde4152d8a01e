//! Vulkan logical device and queue management.
//!
//! The [`Device`] owns the logical device handle and the graphics, present and
//! transfer queues derived from one [`PhysicalDeviceInfo`]. It is shared through
//! `Arc`; every GPU object keeps a clone, so the device is destroyed only after
//! all of them and right before the instance it holds.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::device::Device;
//! use vkframe_rhi::instance::Instance;
//! use vkframe_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new(false, &[])?;
//! let info = select_physical_device(&instance, None)?;
//! let device = Device::new(instance, info, false)?;
//! device.wait_idle()?;
//! # Ok::<(), vkframe_rhi::RhiError>(())
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use tracing::{debug, error, info};

use crate::command::CommandBuffer;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::PhysicalDeviceInfo;

/// The queues a [`Device`] exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Graphics,
    Present,
    Transfer,
}

/// A queue handle plus the lock serializing host access to it.
///
/// Kinds that resolve to the same family share both the handle and the lock.
struct QueueSlot {
    family: u32,
    handle: vk::Queue,
    lock: Arc<Mutex<()>>,
}

/// Command buffers and semaphores for one queue submission.
#[derive(Default)]
pub struct Submission<'a> {
    pub command_buffers: &'a [&'a CommandBuffer],
    /// Semaphores waited on, paired with the stage that waits.
    pub wait: &'a [(vk::Semaphore, vk::PipelineStageFlags)],
    pub signal: &'a [vk::Semaphore],
}

/// Vulkan logical device wrapper.
pub struct Device {
    device: ash::Device,
    info: PhysicalDeviceInfo,
    graphics: QueueSlot,
    present: QueueSlot,
    transfer: QueueSlot,
    swapchain_enabled: bool,
    anisotropy_enabled: bool,
    /// Destroyed after the device.
    instance: Arc<Instance>,
}

impl Device {
    /// Creates the logical device for the selected adapter.
    ///
    /// `enable_swapchain` adds `VK_KHR_swapchain`; a device used only for
    /// uploads and offscreen work can leave it off.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue families are incomplete or device creation
    /// fails. Neither is retried.
    pub fn new(
        instance: Arc<Instance>,
        info: PhysicalDeviceInfo,
        enable_swapchain: bool,
    ) -> RhiResult<Arc<Self>> {
        let families = info.queue_families;
        let (Some(graphics_family), Some(present_family), Some(transfer_family)) = (
            families.graphics_family,
            families.present_family,
            families.transfer_family,
        ) else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let anisotropy_enabled = info.features.sampler_anisotropy == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy_enabled);

        let extension_names = if enable_swapchain {
            vec![ash::khr::swapchain::NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };

        info!(
            "Logical device created on '{}' (swapchain: {}, anisotropy: {})",
            info.device_name(),
            enable_swapchain,
            anisotropy_enabled
        );

        let locks: Vec<(u32, Arc<Mutex<()>>)> = unique_families
            .iter()
            .map(|&family| (family, Arc::new(Mutex::new(()))))
            .collect();
        let slot = |family: u32| -> QueueSlot {
            let lock = locks
                .iter()
                .find(|(f, _)| *f == family)
                .map(|(_, lock)| lock.clone())
                .unwrap_or_default();
            QueueSlot {
                family,
                handle: unsafe { device.get_device_queue(family, 0) },
                lock,
            }
        };

        let graphics = slot(graphics_family);
        let present = slot(present_family);
        let transfer = slot(transfer_family);

        Ok(Arc::new(Self {
            device,
            info,
            graphics,
            present,
            transfer,
            swapchain_enabled: enable_swapchain,
            anisotropy_enabled,
            instance,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Returns the adapter this device was created from.
    #[inline]
    pub fn physical_device_info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.info.device
    }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.info.memory_properties
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.info.properties.limits
    }

    #[inline]
    pub fn swapchain_enabled(&self) -> bool {
        self.swapchain_enabled
    }

    #[inline]
    pub fn anisotropy_enabled(&self) -> bool {
        self.anisotropy_enabled
    }

    fn slot(&self, kind: QueueKind) -> &QueueSlot {
        match kind {
            QueueKind::Graphics => &self.graphics,
            QueueKind::Present => &self.present,
            QueueKind::Transfer => &self.transfer,
        }
    }

    /// Returns the queue handle for `kind`.
    #[inline]
    pub fn queue(&self, kind: QueueKind) -> vk::Queue {
        self.slot(kind).handle
    }

    /// Returns the queue family index for `kind`.
    #[inline]
    pub fn queue_family(&self, kind: QueueKind) -> u32 {
        self.slot(kind).family
    }

    /// Runs `f` with exclusive host access to the queue for `kind`.
    pub fn with_queue<R>(&self, kind: QueueKind, f: impl FnOnce(vk::Queue) -> R) -> R {
        let slot = self.slot(kind);
        let _guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);
        f(slot.handle)
    }

    /// Submits recorded command buffers to a queue.
    ///
    /// No implicit synchronization is added: completion ordering is up to the
    /// semaphores in `submission` and `fence`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::CommandBufferNotEnded`] before touching the queue if
    /// any command buffer has not been ended.
    pub fn submit(
        &self,
        kind: QueueKind,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let mut handles = Vec::with_capacity(submission.command_buffers.len());
        for cmd in submission.command_buffers {
            if !cmd.is_executable() {
                return Err(RhiError::CommandBufferNotEnded);
            }
            handles.push(cmd.handle());
        }

        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) =
            submission.wait.iter().copied().unzip();

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&handles)
            .signal_semaphores(submission.signal);

        self.with_queue(kind, |queue| unsafe {
            self.device.queue_submit(queue, &[submit_info], fence)
        })?;
        Ok(())
    }

    /// Blocks until all outstanding work on all queues has completed.
    pub fn wait_idle(&self) -> RhiResult<()> {
        // vkDeviceWaitIdle requires host access to every queue.
        let _graphics = self.graphics.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _present = (!Arc::ptr_eq(&self.present.lock, &self.graphics.lock))
            .then(|| self.present.lock.lock().unwrap_or_else(PoisonError::into_inner));
        let _transfer = (!Arc::ptr_eq(&self.transfer.lock, &self.graphics.lock)
            && !Arc::ptr_eq(&self.transfer.lock, &self.present.lock))
            .then(|| self.transfer.lock.lock().unwrap_or_else(PoisonError::into_inner));

        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: the device handle and function table are thread-safe; queue access
// goes through the per-family locks.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }

    #[test]
    fn test_empty_submission_default() {
        let submission = Submission::default();
        assert!(submission.command_buffers.is_empty());
        assert!(submission.wait.is_empty());
        assert!(submission.signal.is_empty());
    }
}
