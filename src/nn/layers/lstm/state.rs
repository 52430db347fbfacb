//! Recurrent state carried between forward calls.
//!
//! Two stores exist and never share buffers: the stepping store used by
//! stateful inference, and the TBPTT arena holding the state at the end of the
//! last truncated segment.

use crate::tensor::{Scalar, Tensor};

/// Activation and cell state of the last time step, each `[batch, n_out]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LastStepState<T> {
    pub activation: Tensor<T>,
    pub cell: Tensor<T>,
}

impl<T: Scalar> LastStepState<T> {
    pub fn new(activation: Tensor<T>, cell: Tensor<T>) -> Self {
        Self { activation, cell }
    }

    /// Zero state, used at the start of a sequence.
    pub fn zeros(batch: usize, n_out: usize) -> Self {
        Self {
            activation: Tensor::zeros(&[batch, n_out]),
            cell: Tensor::zeros(&[batch, n_out]),
        }
    }

    /// Copies both tensors out of any buffer they share with a forward trace.
    pub fn into_owned(self) -> Self {
        Self {
            activation: self.activation.into_owned(),
            cell: self.cell.into_owned(),
        }
    }
}

/// State written by stateful single-step inference.
#[derive(Debug)]
pub struct SteppingState<T> {
    state: Option<LastStepState<T>>,
}

impl<T: Scalar> SteppingState<T> {
    pub fn new() -> Self {
        Self { state: None }
    }

    pub fn get(&self) -> Option<&LastStepState<T>> {
        self.state.as_ref()
    }

    pub fn set(&mut self, state: Option<LastStepState<T>>) {
        self.state = state;
    }

    pub fn clear(&mut self) {
        self.state = None;
    }
}

impl<T: Scalar> Default for SteppingState<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Longer-lived storage for the state at a TBPTT segment boundary.
///
/// Each relocation starts a new segment: the incoming tensors are detached
/// into buffers owned by the arena and the previous segment's state is dropped.
///
/// A segment relocated by a forward pass ahead of its backward pass also keeps
/// the state that forward pass started from, until the backward pass commits.
/// The stored end state must not seed a recomputation of that same segment.
#[derive(Debug)]
pub struct TbpttArena<T> {
    segment: u64,
    state: Option<LastStepState<T>>,
    /// Start of the uncommitted segment; `Some(None)` is a zero start.
    pending_start: Option<Option<LastStepState<T>>>,
}

impl<T: Scalar> TbpttArena<T> {
    pub fn new() -> Self {
        Self {
            segment: 0,
            state: None,
            pending_start: None,
        }
    }

    pub fn get(&self) -> Option<&LastStepState<T>> {
        self.state.as_ref()
    }

    /// Moves `state` into the arena, replacing the previous segment and
    /// committing any pending one.
    pub fn relocate(&mut self, state: LastStepState<T>) {
        self.segment += 1;
        self.state = Some(state.into_owned());
        self.pending_start = None;
        log::trace!("TBPTT state relocated for segment {}", self.segment);
    }

    /// Relocates the end state of a forward pass that started from `start`,
    /// leaving the segment pending until the next backward pass.
    pub fn relocate_from(&mut self, start: Option<&LastStepState<T>>, state: LastStepState<T>) {
        let start = start.cloned().map(LastStepState::into_owned);
        self.relocate(state);
        self.pending_start = Some(start);
    }

    /// State a truncated backward pass recomputes its forward pass from: the
    /// start of the pending segment if there is one, else the stored state.
    pub fn backprop_seed(&self) -> Option<&LastStepState<T>> {
        match &self.pending_start {
            Some(start) => start.as_ref(),
            None => self.state.as_ref(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_start.is_some()
    }

    /// Replaces the stored state without going through a forward pass.
    pub fn set(&mut self, state: Option<LastStepState<T>>) {
        match state {
            Some(state) => self.relocate(state),
            None => self.clear(),
        }
    }

    pub fn clear(&mut self) {
        self.state = None;
        self.pending_start = None;
    }

    /// Number of segments relocated so far.
    pub fn segment(&self) -> u64 {
        self.segment
    }
}

impl<T: Scalar> Default for TbpttArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocate_detaches_buffers() {
        let activation = Tensor::<f32>::filled(&[1, 2], 0.5);
        let cell = Tensor::<f32>::filled(&[1, 2], -0.5);
        let kept = activation.clone();

        let mut arena = TbpttArena::new();
        arena.relocate(LastStepState::new(activation, cell));

        let stored = arena.get().unwrap();
        assert!(!stored.activation.is_shared());
        assert!(!kept.is_shared());
        assert_eq!(stored.activation, kept);
        assert_eq!(arena.segment(), 1);
    }

    #[test]
    fn test_relocate_replaces_previous_segment() {
        let mut arena = TbpttArena::<f64>::new();
        arena.relocate(LastStepState::zeros(1, 3));
        arena.relocate(LastStepState::new(
            Tensor::filled(&[1, 3], 1.0),
            Tensor::filled(&[1, 3], 2.0),
        ));
        assert_eq!(arena.segment(), 2);
        assert_eq!(arena.get().unwrap().cell.as_slice(), &[2.0, 2.0, 2.0]);
        arena.clear();
        assert!(arena.get().is_none());
    }

    #[test]
    fn test_pending_segment_seeds_from_its_start() {
        let start = LastStepState::new(Tensor::<f64>::filled(&[1, 2], 0.25), Tensor::filled(&[1, 2], 0.5));
        let end = LastStepState::new(Tensor::filled(&[1, 2], 0.75), Tensor::filled(&[1, 2], 1.0));

        let mut arena = TbpttArena::new();
        arena.relocate_from(Some(&start), end.clone());
        assert!(arena.is_pending());
        assert_eq!(arena.get(), Some(&end));
        assert_eq!(arena.backprop_seed(), Some(&start));

        arena.relocate(end.clone());
        assert!(!arena.is_pending());
        assert_eq!(arena.backprop_seed(), Some(&end));
    }

    #[test]
    fn test_pending_segment_from_zero_state() {
        let mut arena = TbpttArena::<f32>::new();
        arena.relocate(LastStepState::zeros(1, 2));
        arena.relocate_from(None, LastStepState::new(Tensor::filled(&[1, 2], 1.0), Tensor::filled(&[1, 2], 1.0)));
        assert!(arena.backprop_seed().is_none());
        assert!(arena.get().is_some());

        arena.clear();
        assert!(!arena.is_pending());
    }

    #[test]
    fn test_stores_are_independent() {
        let mut stepping = SteppingState::<f32>::new();
        let mut arena = TbpttArena::<f32>::new();
        stepping.set(Some(LastStepState::zeros(2, 2)));
        assert!(arena.get().is_none());
        arena.relocate(LastStepState::new(
            Tensor::filled(&[2, 2], 1.0),
            Tensor::filled(&[2, 2], 1.0),
        ));
        assert_eq!(stepping.get().unwrap().activation.sum(), 0.0);
        stepping.clear();
        assert!(arena.get().is_some());
    }
}
