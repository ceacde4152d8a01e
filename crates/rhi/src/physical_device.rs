//! Physical device (GPU) selection.
//!
//! The selection process:
//! 1. Enumerate all available adapters
//! 2. Discover queue families in a single scan (graphics, present, transfer)
//! 3. Skip adapters without a graphics-capable family
//! 4. Score the rest (discrete bonus + maximum 2D image dimension) and keep the best
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::instance::Instance;
//! use vkframe_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new(false, &[])?;
//! let info = select_physical_device(&instance, None)?;
//! println!("Selected GPU: {}", info.device_name());
//! # Ok::<(), vkframe_rhi::RhiError>(())
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::surface::Surface;

/// Score bonus for discrete GPUs. Larger than any image-dimension limit, so a
/// discrete adapter always beats an integrated one.
const DISCRETE_GPU_BONUS: u32 = 100_000;

/// Queue family indices for the operations the frame pipeline needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family exposing the graphics capability bit.
    pub graphics_family: Option<u32>,
    /// Family used for presentation.
    pub present_family: Option<u32>,
    /// Family used for staging copies and layout transitions.
    pub transfer_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Graphics, present and transfer families are all known.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some()
            && self.present_family.is_some()
            && self.transfer_family.is_some()
    }

    /// Returns the unique queue family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [
            self.graphics_family,
            self.present_family,
            self.transfer_family,
        ]
        .into_iter()
        .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Information about the selected adapter. Never mutated after selection.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        device_name(&self.properties)
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> &str {
    properties
        .device_name_as_c_str()
        .ok()
        .and_then(|name| name.to_str().ok())
        .unwrap_or("Unknown Device")
}

/// Selects the highest-scoring adapter.
///
/// When `surface` is given, each adapter must also have a family that can
/// present to it.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no adapter qualifies.
pub fn select_physical_device(
    instance: &Instance,
    surface: Option<&Surface>,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.handle().enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut best: Option<(PhysicalDeviceInfo, u32)> = None;

    for device in devices {
        let Some(info) = check_device_suitability(instance, device, surface)? else {
            continue;
        };
        let score = rate_device(&info.properties);
        debug!(
            "GPU '{}' ({}) - Score: {}",
            info.device_name(),
            info.device_type_name(),
            score
        );
        let replace = match &best {
            Some((_, best_score)) => score > *best_score,
            None => true,
        };
        if replace {
            best = Some((info, score));
        }
    }

    let Some((selected, score)) = best else {
        warn!("No GPU exposes a graphics-capable queue family");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &Instance,
    device: vk::PhysicalDevice,
    surface: Option<&Surface>,
) -> RhiResult<Option<PhysicalDeviceInfo>> {
    let handle = instance.handle();
    let properties = unsafe { handle.get_physical_device_properties(device) };
    let features = unsafe { handle.get_physical_device_features(device) };
    let memory_properties = unsafe { handle.get_physical_device_memory_properties(device) };
    let families = unsafe { handle.get_physical_device_queue_family_properties(device) };

    let queue_families = match surface {
        Some(surface) => {
            find_queue_families(&families, |family| surface.supports_family(device, family))?
        }
        None => find_queue_families(&families, |_| Ok(true))?,
    };

    if !queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: graphics={:?}, present={:?}",
            device_name(&properties),
            queue_families.graphics_family,
            queue_families.present_family
        );
        return Ok(None);
    }

    Ok(Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    }))
}

/// Discovers queue families in one pass over `families`.
///
/// The first family with the graphics bit becomes the graphics family, and the
/// transfer family reuses it. The present family is the graphics family when
/// `can_present` accepts it, otherwise the first family it accepts.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> RhiResult<bool>,
) -> RhiResult<QueueFamilyIndices> {
    let mut indices = QueueFamilyIndices::default();
    let mut first_presenting: Option<u32> = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        if has_graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }

        if first_presenting.is_none() && can_present(i)? {
            first_presenting = Some(i);
        }
    }

    indices.transfer_family = indices.graphics_family;
    indices.present_family = match (indices.graphics_family, first_presenting) {
        (Some(graphics), Some(_)) if can_present(graphics)? => Some(graphics),
        (_, presenting) => presenting,
    };

    Ok(indices)
}

/// Rates an adapter: discrete-GPU bonus plus the maximum 2D image dimension.
pub fn rate_device(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let bonus = if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        DISCRETE_GPU_BONUS
    } else {
        0
    };
    bonus + properties.limits.max_image_dimension2_d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn properties(device_type: vk::PhysicalDeviceType, max_dim: u32) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            device_type,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension2_d: max_dim,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(indices.transfer_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_unique_families_with_duplicates() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
            transfer_family: Some(0),
        };
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_first_graphics_family_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.transfer_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
        assert!(indices.is_complete());
    }

    #[test]
    fn test_present_defaults_to_graphics_family() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::COMPUTE)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.present_family, indices.graphics_family);
    }

    #[test]
    fn test_separate_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = find_queue_families(&families, |i| Ok(i == 2)).unwrap();
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(2));
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_no_graphics_family_is_incomplete() {
        let families = [family(vk::QueueFlags::COMPUTE), family(vk::QueueFlags::TRANSFER)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert!(indices.graphics_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics_family, Some(1));
    }

    #[test]
    fn test_present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = find_queue_families(&families, |_| {
            Err(RhiError::VulkanError(vk::Result::ERROR_SURFACE_LOST_KHR))
        });
        assert!(matches!(
            result,
            Err(RhiError::VulkanError(vk::Result::ERROR_SURFACE_LOST_KHR))
        ));
    }

    #[test]
    fn test_discrete_gpu_outscores_integrated() {
        let discrete = properties(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let integrated = properties(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        assert!(rate_device(&discrete) > rate_device(&integrated));
        assert_eq!(rate_device(&integrated), 16384);
        assert_eq!(rate_device(&discrete), DISCRETE_GPU_BONUS + 8192);
    }
}
