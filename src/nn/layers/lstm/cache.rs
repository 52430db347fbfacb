//! Single-slot cache linking a training forward pass to the next backward pass.

use super::kernel::ForwardOutput;
use crate::tensor::Scalar;

/// Whether training-mode forward passes are kept for the next backward call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Every backward call recomputes its forward pass.
    #[default]
    None,
    /// Keep the forward pass in host memory.
    Host,
    /// Keep the forward pass in the backend's own memory where it has any.
    Device,
}

impl CacheMode {
    pub fn retains(self) -> bool {
        self != CacheMode::None
    }
}

/// Holds at most one forward pass. Taking it empties the slot.
#[derive(Debug)]
pub struct ForwardPassCache<T> {
    slot: Option<ForwardOutput<T>>,
}

impl<T: Scalar> ForwardPassCache<T> {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Stores `forward`, dropping any entry nobody consumed.
    pub fn store(&mut self, forward: ForwardOutput<T>) {
        if self.slot.is_some() {
            log::trace!("replacing an unconsumed cached forward pass");
        }
        self.slot = Some(forward);
    }

    pub fn take(&mut self) -> Option<ForwardOutput<T>> {
        self.slot.take()
    }

    pub fn is_populated(&self) -> bool {
        self.slot.is_some()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

impl<T: Scalar> Default for ForwardPassCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
