//! Frame orchestration on top of the RHI layer.
//!
//! - [`Renderer`] drives `begin_frame` / `draw` / `end_frame` / `present`
//! - [`FrameState`] enforces that call order
//! - [`actions`] carries work from other threads to the render thread
//! - [`FrameUniforms`] is the per-frame uniform block

pub mod actions;
mod error;
pub mod frame;
mod renderer;
pub mod uniforms;

pub use actions::{ActionSender, Enqueued};
pub use error::{RenderError, RenderResult};
pub use frame::FrameState;
pub use renderer::Renderer;
pub use uniforms::FrameUniforms;
