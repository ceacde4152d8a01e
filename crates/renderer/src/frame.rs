//! Frame call ordering.
//!
//! `begin_frame`, `draw`, `end_frame` and `present` must be called in that
//! order, with any number of draws:
//!
//! ```text
//! Idle --begin--> Recording --draw--> Recording --end--> Ended --present--> Idle
//! ```

use crate::error::{RenderError, RenderResult};

/// Where the current frame is in its call sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Recording,
    Ended,
}

impl FrameState {
    pub fn begin(self) -> RenderResult<Self> {
        self.transition("begin_frame", Self::Idle, Self::Recording)
    }

    pub fn draw(self) -> RenderResult<Self> {
        self.transition("draw", Self::Recording, Self::Recording)
    }

    pub fn end(self) -> RenderResult<Self> {
        self.transition("end_frame", Self::Recording, Self::Ended)
    }

    pub fn present(self) -> RenderResult<Self> {
        self.transition("present", Self::Ended, Self::Idle)
    }

    fn transition(
        self,
        operation: &'static str,
        expected: Self,
        next: Self,
    ) -> RenderResult<Self> {
        if self == expected {
            Ok(next)
        } else {
            Err(RenderError::InvalidFrameState {
                operation,
                state: self,
            })
        }
    }
}
