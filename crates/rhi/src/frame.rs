//! Frame-slot pacing.
//!
//! A [`FrameRing`] holds one slot per frame in flight and a cursor. Before a
//! slot is re-recorded the host waits on that slot's fence, so the CPU can
//! never get more than `len()` frames ahead of GPU completion.

use crate::error::{RhiError, RhiResult};

/// A host-waitable completion signal for one frame slot.
pub trait FrameFence {
    /// Blocks until the slot's previous GPU work has completed. Never times out.
    fn wait(&self) -> RhiResult<()>;

    /// Returns the fence to the unsignaled state ahead of a new submission.
    fn reset(&self) -> RhiResult<()>;
}

/// Fixed-size ring of frame slots with a cursor that wraps modulo the length.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<T>,
    current: usize,
}

impl<T> FrameRing<T> {
    /// Builds a ring from at least one slot.
    pub fn new(slots: Vec<T>) -> RhiResult<Self> {
        if slots.is_empty() {
            return Err(RhiError::Unsupported(
                "a frame ring needs at least one slot".into(),
            ));
        }
        Ok(Self { slots, current: 0 })
    }

    /// Number of frames that may be in flight.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.current]
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.slots.iter_mut()
    }

    /// Moves the cursor to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }
}

impl<T: FrameFence> FrameRing<T> {
    /// Waits until the current slot may be reused.
    pub fn wait_current(&self) -> RhiResult<()> {
        self.current().wait()
    }
}
