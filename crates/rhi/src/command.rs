//! Command pool and command buffer management.
//!
//! - [`CommandPool`] is a factory for command buffers bound to one queue family.
//!   Transient pools back one-shot upload and transition work, reusable pools
//!   back per-frame draw recording.
//! - [`CommandBuffer`] records commands between [`begin`](CommandBuffer::begin)
//!   and [`end`](CommandBuffer::end) and tracks its recording state, so that
//!   [`Device::submit`](crate::device::Device::submit) can refuse a buffer
//!   that was never ended.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::command::CommandPool;
//! use vkframe_rhi::device::{Device, QueueKind, Submission};
//! use vkframe_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
//! let family = device.queue_family(QueueKind::Graphics);
//! let pool = CommandPool::new_reusable(device.clone(), family)?;
//! let mut cmd = pool.allocate()?;
//!
//! cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
//! // ... record commands ...
//! cmd.end()?;
//!
//! let submission = Submission { command_buffers: &[&cmd], ..Default::default() };
//! device.submit(QueueKind::Graphics, &submission, vk::Fence::null())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Vulkan command pool wrapper.
///
/// Command pools are not thread-safe; each pool is owned by exactly one
/// recording context.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
    transient: bool,
}

impl CommandPool {
    /// Creates a pool whose buffers are reset and re-recorded every frame.
    pub fn new_reusable(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::create(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            false,
        )
    }

    /// Creates a pool for short-lived, immediately freed command buffers.
    pub fn new_transient(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::create(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::TRANSIENT,
            true,
        )
    }

    fn create(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
        transient: bool,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!(
            "Command pool created for queue family {} ({})",
            queue_family_index,
            if transient { "transient" } else { "reusable" }
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
            transient,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Allocates one primary command buffer.
    pub fn allocate(&self) -> RhiResult<CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        let buffer = buffers
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("driver returned no command buffer".into()))?;

        Ok(CommandBuffer {
            device: self.device.clone(),
            buffer,
            state: RecordingState::Initial,
        })
    }

    /// Returns a command buffer to the pool.
    ///
    /// The caller must make sure the GPU is done with it.
    pub fn free(&self, command_buffer: CommandBuffer) {
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &[command_buffer.buffer]);
        }
    }

    /// Resets every command buffer allocated from this pool.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Lifecycle of a command buffer as seen by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    /// Freshly allocated or reset.
    Initial,
    /// Between `begin` and `end`.
    Recording,
    /// Ended and ready for submission.
    Executable,
}

impl RecordingState {
    fn on_begin(self) -> RhiResult<Self> {
        match self {
            Self::Recording => Err(RhiError::Unsupported(
                "begin() called on a command buffer that is already recording".into(),
            )),
            // Beginning an executable buffer implicitly resets it.
            Self::Initial | Self::Executable => Ok(Self::Recording),
        }
    }

    fn on_end(self) -> RhiResult<Self> {
        match self {
            Self::Recording => Ok(Self::Executable),
            other => Err(RhiError::Unsupported(format!(
                "end() called on a command buffer in state {:?}",
                other
            ))),
        }
    }
}

/// Vulkan command buffer wrapper.
///
/// The handle belongs to the [`CommandPool`] it was allocated from and is
/// freed with it.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
    state: RecordingState,
}

impl CommandBuffer {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// True once `end` has been called and the buffer has not been reset since.
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.state == RecordingState::Executable
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording with the given usage flags.
    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> RhiResult<()> {
        let next = self.state.on_begin()?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);

        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }

        self.state = next;
        Ok(())
    }

    /// Ends recording. After this the buffer can be submitted.
    pub fn end(&mut self) -> RhiResult<()> {
        let next = self.state.on_end()?;

        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }

        self.state = next;
        Ok(())
    }

    /// Resets the buffer to its initial state. The owning pool must have been
    /// created with [`CommandPool::new_reusable`].
    pub fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }

        self.state = RecordingState::Initial;
        Ok(())
    }

    // =========================================================================
    // Render Passes
    // =========================================================================

    pub fn begin_render_pass(&self, begin_info: &vk::RenderPassBeginInfo) {
        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            self.device.handle().cmd_end_render_pass(self.buffer);
        }
    }

    // =========================================================================
    // Pipeline Binding
    // =========================================================================

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Binds vertex buffers starting at `first_binding`.
    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device.handle().cmd_bind_vertex_buffers(
                self.buffer,
                first_binding,
                buffers,
                offsets,
            );
        }
    }

    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    /// Binds descriptor sets for the graphics bind point.
    pub fn bind_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    // =========================================================================
    // Dynamic State
    // =========================================================================

    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    // =========================================================================
    // Draw Commands
    // =========================================================================

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw(
                self.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Inserts a pipeline barrier with image memory barriers only.
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
    }

    // =========================================================================
    // Copy Commands
    // =========================================================================

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }

    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                dst_layout,
                regions,
            );
        }
    }
}
