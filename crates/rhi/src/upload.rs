//! Synchronous one-shot command submission.
//!
//! Staging copies and image layout transitions are recorded into a command
//! buffer from a transient pool on the transfer queue, submitted with a fresh
//! fence, waited on without a timeout, and freed. Nothing overlaps: each call
//! returns only after the GPU has finished the work.
//!
//! This is simple and correct but serializes every upload behind a full queue
//! wait. A pipelined path would batch copies behind a transfer-queue timeline
//! semaphore instead.

use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use tracing::trace;

use crate::command::{CommandBuffer, CommandPool};
use crate::device::{Device, QueueKind, Submission};
use crate::error::RhiResult;
use crate::frame::FrameFence;
use crate::sync::Fence;

/// Owner of the transient command pool used for blocking uploads.
pub struct UploadContext {
    device: Arc<Device>,
    pool: Mutex<CommandPool>,
}

impl UploadContext {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let family = device.queue_family(QueueKind::Transfer);
        let pool = CommandPool::new_transient(device.clone(), family)?;
        Ok(Self {
            device,
            pool: Mutex::new(pool),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Records `record` into a one-time command buffer, submits it to the
    /// transfer queue and blocks until it has executed.
    pub fn one_shot<R>(&self, record: impl FnOnce(&CommandBuffer) -> R) -> RhiResult<R> {
        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cmd = pool.allocate()?;
        let result = self.record_and_wait(&mut cmd, record);
        pool.free(cmd);
        result
    }

    fn record_and_wait<R>(
        &self,
        cmd: &mut CommandBuffer,
        record: impl FnOnce(&CommandBuffer) -> R,
    ) -> RhiResult<R> {
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        let output = record(cmd);
        cmd.end()?;

        let fence = Fence::new(self.device.clone(), false)?;
        let submission = Submission {
            command_buffers: &[&*cmd],
            ..Default::default()
        };
        self.device
            .submit(QueueKind::Transfer, &submission, fence.handle())?;
        fence.wait()?;

        trace!("One-shot command buffer completed");
        Ok(output)
    }
}
