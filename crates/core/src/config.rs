//! Renderer configuration.
//!
//! Configuration is read from a TOML document. Every field has a default, so an
//! empty document is a valid configuration:
//!
//! ```toml
//! frames_in_flight = 2
//! enable_validation = true
//! present_mode = "mailbox"
//! clear_color = [0.02, 0.02, 0.04, 1.0]
//!
//! [actions]
//! capacity = 256
//! policy = "block"
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Upper bound on frames in flight accepted by [`RendererConfig::validate`].
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Preferred presentation mode. Falls back to FIFO when the preference is
/// not offered by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    /// Low-latency triple buffering.
    #[default]
    Mailbox,
    /// Classic vsync; always available.
    Fifo,
}

/// What a producer does when the action queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Block the producer until the render thread drains the queue.
    #[default]
    Block,
    /// Discard the action being enqueued.
    DropNewest,
}

/// Bounded action queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ActionQueueConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub policy: QueuePolicy,
}

impl Default for ActionQueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            policy: QueuePolicy::default(),
        }
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RendererConfig {
    /// Number of frame slots the CPU may record ahead of the GPU.
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    /// Enable the Khronos validation layer when it is installed.
    #[serde(default = "default_validation")]
    pub enable_validation: bool,
    #[serde(default)]
    pub present_mode: PresentModePreference,
    /// Clear colour used by render passes created through the renderer.
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub actions: ActionQueueConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: default_frames_in_flight(),
            enable_validation: default_validation(),
            present_mode: PresentModePreference::default(),
            clear_color: default_clear(),
            actions: ActionQueueConfig::default(),
        }
    }
}

fn default_frames_in_flight() -> usize {
    2
}

fn default_validation() -> bool {
    cfg!(debug_assertions)
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

fn default_capacity() -> usize {
    256
}

impl RendererConfig {
    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if self.actions.capacity == 0 {
            return Err(Error::Config(
                "actions.capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
