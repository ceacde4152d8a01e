//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No adapter exposes a graphics-capable queue family
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No memory type satisfies both the requirement mask and the property flags
    #[error("No suitable memory type (type bits {type_bits:#b}, flags {flags:?})")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    /// A write would run past the end of a resource
    #[error("Write of {requested} bytes at offset {offset} exceeds capacity of {capacity} bytes")]
    CapacityExceeded {
        requested: u64,
        offset: u64,
        capacity: u64,
    },

    /// Vertex attribute format outside the supported size table
    #[error("Unsupported vertex format: {0:?}")]
    UnsupportedVertexFormat(vk::Format),

    /// Resource kind or memory combination not accepted by an operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A command buffer was submitted before recording was ended
    #[error("Command buffer submitted before end() was called")]
    CommandBufferNotEnded,

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
