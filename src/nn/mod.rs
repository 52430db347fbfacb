//! Neural network building blocks.
//! This module provides the layer traits, activations, weight initialization and the LSTM layer.

mod activations;
pub mod init;
pub mod layers;

pub use activations::Activation;
pub use init::WeightInit;
pub use layers::*;

use crate::{
    error::Result,
    tensor::{Scalar, Tensor},
};

/// Result of a backward pass through a layer.
#[derive(Debug, Clone)]
pub struct Gradients<T, P> {
    /// Gradients of the loss with respect to the layer's parameters.
    pub params: P,
    /// Gradient of the loss with respect to the layer's input, to pass to the layer below.
    pub epsilon: Tensor<T>,
}

/// How a mask array relates to the activations that leave a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskState {
    /// The mask must be applied to this layer's output.
    Active,
    /// The mask is handed on unchanged and applied during backprop.
    Passthrough,
}

/// Trait for all trainable layers.
pub trait Layer<T: Scalar>: Send + std::fmt::Debug {
    /// Per-parameter gradient bundle produced by backprop.
    type ParamGradients;

    /// Sets the input used by the next forward pass.
    fn set_input(&mut self, input: Tensor<T>);

    /// Returns the current input, if any.
    fn input(&self) -> Option<&Tensor<T>>;

    /// Forward pass over `input`.
    fn activate(&mut self, input: Tensor<T>, training: bool) -> Result<Tensor<T>>;

    /// Backward pass given the gradient of the loss with respect to this layer's output.
    fn backprop_gradient(
        &mut self,
        epsilon: &Tensor<T>,
    ) -> Result<Gradients<T, Self::ParamGradients>>;

    /// Layer-local gradient used for unsupervised pretraining.
    fn gradient(&self) -> Result<Self::ParamGradients>;

    /// Whether the layer can be pretrained layer-wise.
    fn is_pretrain_layer(&self) -> bool;

    /// Propagates a feature mask through the layer.
    fn feed_forward_mask(
        &self,
        mask: Option<Tensor<T>>,
        state: MaskState,
    ) -> (Option<Tensor<T>>, MaskState);

    /// Total number of trainable scalars.
    fn num_params(&self) -> usize;

    /// Drops the input and any per-iteration intermediate values.
    fn clear(&mut self);
}

/// Trait for layers that carry state across time steps.
pub trait RecurrentLayer<T: Scalar>: Layer<T> {
    /// Last-time-step state carried between calls.
    type State;

    /// Single stateful inference step; continues from the stored state.
    fn rnn_time_step(&mut self, input: Tensor<T>) -> Result<Tensor<T>>;

    /// Forward pass continuing from the stored state, optionally keeping the
    /// final state for the next truncated backprop segment.
    fn rnn_activate_using_stored_state(
        &mut self,
        input: Tensor<T>,
        training: bool,
        store_last_for_tbptt: bool,
    ) -> Result<Tensor<T>>;

    /// Truncated backprop through the last `tbptt_backward_length` time steps.
    fn tbptt_backprop_gradient(
        &mut self,
        epsilon: &Tensor<T>,
        tbptt_backward_length: usize,
    ) -> Result<Gradients<T, Self::ParamGradients>>;

    fn rnn_get_previous_state(&self) -> Option<&Self::State>;

    fn rnn_set_previous_state(&mut self, state: Option<Self::State>);

    fn rnn_clear_previous_state(&mut self);

    fn rnn_get_tbptt_state(&self) -> Option<&Self::State>;

    fn rnn_set_tbptt_state(&mut self, state: Option<Self::State>);
}
