//! Device memory allocation.
//!
//! Memory types are chosen by a first-match scan: the first type index allowed
//! by the resource's requirement mask whose property flags contain the
//! requested flags wins. There is no cost-based ranking and no sub-allocation;
//! every buffer and image owns one `VkDeviceMemory`.

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Finds the first memory type allowed by `type_bits` that has all of `flags`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableMemoryType`] if no type matches.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            (type_bits & (1 << index)) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _)| index as u32)
        .ok_or(RhiError::NoSuitableMemoryType { type_bits, flags })
}

/// Allocates memory satisfying `requirements` with the given property flags.
pub fn allocate(
    device: &Device,
    requirements: &vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> RhiResult<vk::DeviceMemory> {
    let memory_type_index =
        find_memory_type_index(device.memory_properties(), requirements.memory_type_bits, flags)?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = unsafe { device.handle().allocate_memory(&alloc_info, None)? };

    debug!(
        "Allocated {} bytes from memory type {} ({:?})",
        requirements.size, memory_type_index, flags
    );

    Ok(memory)
}
