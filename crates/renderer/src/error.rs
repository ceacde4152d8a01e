//! Renderer error types.

use thiserror::Error;
use vkframe_rhi::RhiError;

use crate::frame::FrameState;

/// Errors surfaced by the frame API.
#[derive(Error, Debug)]
pub enum RenderError {
    /// GPU or resource failure from the RHI layer
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Configuration failure
    #[error(transparent)]
    Core(#[from] vkframe_core::Error),

    /// A frame call was made out of order
    #[error("{operation} called while the frame is {state:?}")]
    InvalidFrameState {
        operation: &'static str,
        state: FrameState,
    },

    /// The renderer owning the action queue is gone
    #[error("Action channel closed")]
    ActionChannelClosed,
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
