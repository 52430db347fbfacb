//! Contract between the LSTM layer and the gate-math backends.

use super::{
    params::{GateParameters, ParamGradients},
    state::LastStepState,
};
use crate::{
    error::Result,
    nn::{Activation, Gradients},
    tensor::{Scalar, Tensor},
};
use std::fmt::Debug;

/// How far back a backward pass propagates through time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Through every time step of the trace.
    Full,
    /// Through the last `n` time steps only.
    Steps(usize),
}

/// Inputs of one forward pass.
#[derive(Debug)]
pub struct ForwardRequest<'a, T> {
    pub params: &'a GateParameters<T>,
    /// `[batch, time, n_in]`
    pub input: &'a Tensor<T>,
    /// State to continue from; zero state when `None`.
    pub initial: Option<&'a LastStepState<T>>,
    pub gate_activation: Activation,
    pub activation: Activation,
    pub training: bool,
    /// Whether the returned output must carry a [`ForwardTrace`].
    pub retain_trace: bool,
}

/// Everything a backward pass needs from its forward pass.
///
/// Per-time-step vectors are indexed by time step; gate tensors are
/// `[batch, 4 * n_out]` in IFOG order, the others `[batch, n_out]`.
/// A trace is consumed by value by exactly one backward call.
#[derive(Debug)]
pub struct ForwardTrace<T> {
    /// Parameters the forward pass ran with, including any weight noise.
    pub params: GateParameters<T>,
    pub input: Tensor<T>,
    pub initial: LastStepState<T>,
    pub gate_activation: Activation,
    pub activation: Activation,
    /// Gate pre-activations.
    pub gate_pre: Vec<Tensor<T>>,
    /// Gate activations.
    pub gate_act: Vec<Tensor<T>>,
    /// Cell state.
    pub cell: Vec<Tensor<T>>,
    /// Activated cell state.
    pub cell_act: Vec<Tensor<T>>,
    /// Hidden output.
    pub hidden: Vec<Tensor<T>>,
}

impl<T: Scalar> ForwardTrace<T> {
    pub fn time_steps(&self) -> usize {
        self.hidden.len()
    }
}

/// Result of one forward pass.
#[derive(Debug)]
pub struct ForwardOutput<T> {
    /// `[batch, time, n_out]`
    pub output: Tensor<T>,
    pub last: LastStepState<T>,
    pub trace: Option<ForwardTrace<T>>,
}

/// Inputs of one backward pass.
#[derive(Debug)]
pub struct BackwardRequest<'a, T> {
    pub trace: ForwardTrace<T>,
    /// Gradient of the loss with respect to the layer output, `[batch, time, n_out]`.
    pub epsilon: &'a Tensor<T>,
    pub truncation: Truncation,
}

/// Gate-math backend.
///
/// Implementations must be deterministic for identical requests and must leave
/// the trace out of [`ForwardOutput`] when `retain_trace` is false.
pub trait GateKernel<T: Scalar>: Send + Sync + Debug {
    /// Registry name of the implementation.
    fn name(&self) -> &str;

    /// Capability probe, queried once when a layer selects its backend.
    fn supports(&self, gate_activation: Activation, activation: Activation, peephole: bool) -> bool;

    fn forward(&self, request: ForwardRequest<'_, T>) -> Result<ForwardOutput<T>>;

    fn backward(&self, request: BackwardRequest<'_, T>) -> Result<Gradients<T, ParamGradients<T>>>;
}
