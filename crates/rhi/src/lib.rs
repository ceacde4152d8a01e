//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate wraps `ash` in owned, `Drop`-released objects:
//! - Instance, surface, adapter selection and logical device
//! - Memory allocation, buffers, images and the blocking staging upload path
//! - Command pools, command buffers and synchronization primitives
//! - Swapchain with frame slots and out-of-date recovery
//! - Render passes, pipelines, vertex layouts and descriptor sets

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod frame;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod upload;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
