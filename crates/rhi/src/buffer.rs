//! GPU buffer management.
//!
//! A [`GpuBuffer`] is created from a [`BufferDesc`] and carries two tags fixed
//! at creation:
//!
//! - its [`BufferKind`], checked by every operation that needs a particular
//!   kind of buffer (vertex, index, uniform, ...), and
//! - its [`UploadStrategy`], derived from usage and memory flags, which decides
//!   how [`GpuBuffer::write`] moves bytes to the GPU.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::buffer::{BufferDesc, GpuBuffer, UploadStrategy};
//! use vkframe_rhi::device::Device;
//! use vkframe_rhi::upload::UploadContext;
//!
//! # fn example(device: Arc<Device>, upload: &UploadContext) -> Result<(), vkframe_rhi::RhiError> {
//! let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
//! let bytes: &[u8] = bytemuck::cast_slice(&vertices);
//! let buffer = GpuBuffer::with_data(device, upload, BufferDesc::vertex(bytes.len() as u64), bytes)?;
//! assert_eq!(buffer.strategy(), UploadStrategy::StagingCopy);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory;
use crate::upload::UploadContext;

/// What a buffer is for. Fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index(vk::IndexType),
    Uniform,
    /// Host-visible source of a staging copy.
    Staging,
    /// Host-visible destination for reading GPU data back.
    Readback,
}

impl BufferKind {
    /// Returns a human-readable name for the buffer kind.
    pub fn name(self) -> &'static str {
        match self {
            BufferKind::Vertex => "vertex",
            BufferKind::Index(_) => "index",
            BufferKind::Uniform => "uniform",
            BufferKind::Staging => "staging",
            BufferKind::Readback => "readback",
        }
    }

    /// Usage bit a buffer of this kind must carry.
    fn required_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index(_) => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferKind::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }
}

/// How writes reach the buffer's memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Host-visible memory, mapped for the buffer's whole life.
    DirectMap,
    /// Device-local memory filled through a transient staging buffer.
    StagingCopy,
}

impl UploadStrategy {
    /// Derives the strategy from usage and memory property flags.
    ///
    /// Uniform buffers are always direct-mapped. Otherwise device-local memory
    /// that can be a transfer destination is staged, and host-visible memory is
    /// mapped.
    pub fn resolve(
        usage: vk::BufferUsageFlags,
        memory: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        let host_visible = memory.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);

        if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            return if host_visible {
                Ok(Self::DirectMap)
            } else {
                Err(RhiError::Unsupported(
                    "uniform buffers must live in host-visible memory".into(),
                ))
            };
        }

        if memory.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
            && usage.contains(vk::BufferUsageFlags::TRANSFER_DST)
        {
            Ok(Self::StagingCopy)
        } else if host_visible {
            Ok(Self::DirectMap)
        } else {
            Err(RhiError::Unsupported(format!(
                "no upload path for usage {:?} with memory {:?}",
                usage, memory
            )))
        }
    }
}

/// Declarative buffer description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory: vk::MemoryPropertyFlags,
    pub kind: BufferKind,
}

impl BufferDesc {
    /// Device-local vertex buffer, filled through staging.
    pub fn vertex(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            kind: BufferKind::Vertex,
        }
    }

    /// Device-local index buffer, filled through staging.
    pub fn index(size: vk::DeviceSize, index_type: vk::IndexType) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            kind: BufferKind::Index(index_type),
        }
    }

    /// Host-coherent uniform buffer.
    pub fn uniform(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            memory: host_coherent(),
            kind: BufferKind::Uniform,
        }
    }

    pub fn staging(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            memory: host_coherent(),
            kind: BufferKind::Staging,
        }
    }

    pub fn readback(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_DST,
            memory: host_coherent(),
            kind: BufferKind::Readback,
        }
    }

    /// Adds usage bits, e.g. `TRANSFER_SRC` to copy a vertex buffer out again.
    pub fn with_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    /// Replaces the memory property flags.
    pub fn with_memory(mut self, memory: vk::MemoryPropertyFlags) -> Self {
        self.memory = memory;
        self
    }

    /// Checks the description and derives its upload strategy.
    pub fn validate(&self) -> RhiResult<UploadStrategy> {
        if self.size == 0 {
            return Err(RhiError::Unsupported(
                "buffer size must be greater than 0".into(),
            ));
        }
        let required = self.kind.required_usage();
        if !self.usage.contains(required) {
            return Err(RhiError::Unsupported(format!(
                "{} buffer requires usage {:?}",
                self.kind.name(),
                required
            )));
        }
        UploadStrategy::resolve(self.usage, self.memory)
    }
}

fn host_coherent() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
}

/// Rejects writes past the end of a resource without touching the GPU.
pub(crate) fn check_capacity(
    capacity: vk::DeviceSize,
    offset: vk::DeviceSize,
    len: usize,
) -> RhiResult<()> {
    let requested = len as u64;
    match offset.checked_add(requested) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(RhiError::CapacityExceeded {
            requested,
            offset,
            capacity,
        }),
    }
}

/// A buffer with its own device memory.
pub struct GpuBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    /// Persistent mapping for [`UploadStrategy::DirectMap`] buffers.
    mapped: Option<*mut u8>,
    desc: BufferDesc,
    strategy: UploadStrategy,
    destroyed: bool,
}

// Safety: the mapped pointer is only dereferenced for bounds-checked copies;
// synchronizing host writes with GPU reads is the caller's responsibility, as
// for the raw handles.
unsafe impl Send for GpuBuffer {}
unsafe impl Sync for GpuBuffer {}

impl GpuBuffer {
    /// Creates a buffer and binds memory whose type matches `desc.memory`.
    ///
    /// # Errors
    ///
    /// [`RhiError::Unsupported`] for an invalid description,
    /// [`RhiError::NoSuitableMemoryType`] if no memory type matches.
    pub fn new(device: Arc<Device>, desc: BufferDesc) -> RhiResult<Self> {
        let strategy = desc.validate()?;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = device.handle();
        let buffer = unsafe { handle.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { handle.get_buffer_memory_requirements(buffer) };

        let memory = match memory::allocate(&device, &requirements, desc.memory) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { handle.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe { handle.bind_buffer_memory(buffer, memory, 0) }.and_then(|_| {
            if strategy == UploadStrategy::DirectMap {
                let ptr = unsafe {
                    handle.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
                };
                Ok(Some(ptr.cast::<u8>()))
            } else {
                Ok(None)
            }
        });

        let mapped = match bound {
            Ok(mapped) => mapped,
            Err(e) => {
                unsafe {
                    handle.destroy_buffer(buffer, None);
                    handle.free_memory(memory, None);
                }
                return Err(e.into());
            }
        };

        debug!(
            "Created {} buffer: {} bytes ({:?})",
            desc.kind.name(),
            desc.size,
            strategy
        );

        Ok(Self {
            device,
            buffer,
            memory,
            mapped,
            desc,
            strategy,
            destroyed: false,
        })
    }

    /// Creates a buffer sized by `desc` and fills it from offset 0.
    pub fn with_data(
        device: Arc<Device>,
        upload: &UploadContext,
        desc: BufferDesc,
        data: &[u8],
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, desc)?;
        buffer.write(upload, 0, data)?;
        Ok(buffer)
    }

    /// Writes `data` at `offset` using the buffer's upload strategy.
    ///
    /// The capacity check runs before anything else, so an oversized write
    /// never reaches the GPU. A staging write blocks until the copy completed.
    pub fn write(&self, upload: &UploadContext, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        check_capacity(self.desc.size, offset, data.len())?;
        self.ensure_alive()?;
        if data.is_empty() {
            return Ok(());
        }

        match self.strategy {
            UploadStrategy::DirectMap => self.write_mapped(offset, data),
            UploadStrategy::StagingCopy => {
                let staging = GpuBuffer::new(
                    self.device.clone(),
                    BufferDesc::staging(data.len() as vk::DeviceSize),
                )?;
                staging.write_mapped(0, data)?;

                let region = vk::BufferCopy::default()
                    .src_offset(0)
                    .dst_offset(offset)
                    .size(data.len() as vk::DeviceSize);
                upload.one_shot(|cmd| cmd.copy_buffer(staging.handle(), self.buffer, &[region]))?;

                debug!(
                    "Staged {} bytes into {} buffer at offset {}",
                    data.len(),
                    self.desc.kind.name(),
                    offset
                );
                Ok(())
            }
        }
    }

    /// Copies `data` straight into the persistent mapping.
    ///
    /// Fails with [`RhiError::Unsupported`] on a staged buffer.
    pub fn write_mapped(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        check_capacity(self.desc.size, offset, data.len())?;
        let ptr = self.mapped_ptr()?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }

        if !self.is_coherent() {
            let range = vk::MappedMemoryRange::default()
                .memory(self.memory)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            unsafe { self.device.handle().flush_mapped_memory_ranges(&[range])? };
        }
        Ok(())
    }

    /// Reads `len` bytes at `offset` from a mapped buffer.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        check_capacity(self.desc.size, offset, len)?;
        let ptr = self.mapped_ptr()?;

        if !self.is_coherent() {
            let range = vk::MappedMemoryRange::default()
                .memory(self.memory)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            unsafe { self.device.handle().invalidate_mapped_memory_ranges(&[range])? };
        }

        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(offset as usize), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        self.ensure_alive()?;
        self.mapped.ok_or_else(|| {
            RhiError::Unsupported(format!(
                "{} buffer is not host-visible; write it through a staging copy",
                self.desc.kind.name()
            ))
        })
    }

    fn is_coherent(&self) -> bool {
        self.desc
            .memory
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    fn ensure_alive(&self) -> RhiResult<()> {
        if self.destroyed {
            Err(RhiError::InvalidHandle(format!(
                "{} buffer used after cleanup",
                self.desc.kind.name()
            )))
        } else {
            Ok(())
        }
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }

    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.desc.kind
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.desc.usage
    }

    #[inline]
    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.desc.memory
    }

    #[inline]
    pub fn strategy(&self) -> UploadStrategy {
        self.strategy
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Number of indices in an index buffer.
    pub fn index_count(&self) -> RhiResult<u32> {
        match self.desc.kind {
            BufferKind::Index(index_type) => {
                Ok((self.desc.size / index_size(index_type)?) as u32)
            }
            other => Err(RhiError::Unsupported(format!(
                "expected an index buffer, got a {} buffer",
                other.name()
            ))),
        }
    }

    /// Releases the buffer and its memory. Safe to call more than once; the
    /// caller must make sure the GPU no longer uses the buffer.
    pub fn cleanup(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let handle = self.device.handle();
        unsafe {
            if self.mapped.take().is_some() {
                handle.unmap_memory(self.memory);
            }
            handle.destroy_buffer(self.buffer, None);
            handle.free_memory(self.memory, None);
        }
        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();

        debug!("Destroyed {} buffer", self.desc.kind.name());
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Size in bytes of one index of `index_type`.
pub fn index_size(index_type: vk::IndexType) -> RhiResult<vk::DeviceSize> {
    match index_type {
        vk::IndexType::UINT16 => Ok(2),
        vk::IndexType::UINT32 => Ok(4),
        other => {
            error!("Unsupported index type {:?}", other);
            Err(RhiError::Unsupported(format!("index type {:?}", other)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_local_transfer_dst_is_staged() {
        let strategy = UploadStrategy::resolve(
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
        assert_eq!(strategy, UploadStrategy::StagingCopy);

        for desc in [
            BufferDesc::vertex(64),
            BufferDesc::index(12, vk::IndexType::UINT16),
            BufferDesc::vertex(64).with_usage(vk::BufferUsageFlags::TRANSFER_SRC),
        ] {
            assert_eq!(desc.validate().unwrap(), UploadStrategy::StagingCopy);
        }
    }

    #[test]
    fn test_uniform_is_direct_mapped() {
        assert_eq!(
            BufferDesc::uniform(256).validate().unwrap(),
            UploadStrategy::DirectMap
        );

        // Even when device-local and a transfer destination
        let strategy = UploadStrategy::resolve(
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )
        .unwrap();
        assert_eq!(strategy, UploadStrategy::DirectMap);
    }

    #[test]
    fn test_device_local_uniform_is_unsupported() {
        let result = UploadStrategy::resolve(
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        assert!(matches!(result, Err(RhiError::Unsupported(_))));
    }

    #[test]
    fn test_host_visible_is_direct_mapped() {
        assert_eq!(
            BufferDesc::staging(16).validate().unwrap(),
            UploadStrategy::DirectMap
        );
        assert_eq!(
            BufferDesc::readback(16).validate().unwrap(),
            UploadStrategy::DirectMap
        );
        assert_eq!(
            BufferDesc::vertex(16)
                .with_memory(vk::MemoryPropertyFlags::HOST_VISIBLE)
                .validate()
                .unwrap(),
            UploadStrategy::DirectMap
        );
    }

    #[test]
    fn test_device_local_without_transfer_dst_is_unsupported() {
        let result = UploadStrategy::resolve(
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        assert!(matches!(result, Err(RhiError::Unsupported(_))));
    }

    #[test]
    fn test_desc_rejects_zero_size_and_missing_usage() {
        assert!(matches!(
            BufferDesc::vertex(0).validate(),
            Err(RhiError::Unsupported(_))
        ));

        let mut desc = BufferDesc::vertex(16);
        desc.usage = vk::BufferUsageFlags::TRANSFER_DST;
        assert!(matches!(desc.validate(), Err(RhiError::Unsupported(_))));
    }

    #[test]
    fn test_capacity_check() {
        assert!(check_capacity(16, 0, 16).is_ok());
        assert!(check_capacity(16, 8, 8).is_ok());
        assert!(check_capacity(16, 16, 0).is_ok());

        match check_capacity(16, 0, 17) {
            Err(RhiError::CapacityExceeded {
                requested,
                offset,
                capacity,
            }) => {
                assert_eq!((requested, offset, capacity), (17, 0, 16));
            }
            other => panic!("Unexpected result: {:?}", other),
        }
        assert!(matches!(
            check_capacity(16, 12, 8),
            Err(RhiError::CapacityExceeded { .. })
        ));
        assert!(matches!(
            check_capacity(16, u64::MAX, 1),
            Err(RhiError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_index_size() {
        assert_eq!(index_size(vk::IndexType::UINT16).unwrap(), 2);
        assert_eq!(index_size(vk::IndexType::UINT32).unwrap(), 4);
        assert!(index_size(vk::IndexType::NONE_KHR).is_err());
    }

    #[test]
    fn test_buffer_kind_name() {
        assert_eq!(BufferKind::Vertex.name(), "vertex");
        assert_eq!(BufferKind::Index(vk::IndexType::UINT32).name(), "index");
        assert_eq!(BufferKind::Uniform.name(), "uniform");
        assert_eq!(BufferKind::Staging.name(), "staging");
        assert_eq!(BufferKind::Readback.name(), "readback");
    }
}
