//! Core utilities shared by the frame pipeline crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Renderer configuration loaded from TOML

mod config;
mod error;
mod logging;

pub use config::{
    ActionQueueConfig, MAX_FRAMES_IN_FLIGHT, PresentModePreference, QueuePolicy, RendererConfig,
};
pub use error::{Error, Result};
pub use logging::{init_logging, try_init_logging};
