//! Long Short-Term Memory (LSTM) layer, no-peephole variant.
//!
//! [`LstmLayer`] orchestrates one recurrent layer on top of a pluggable
//! [`GateKernel`]:
//! - plain forward passes ([`Layer::activate`]),
//! - stateful inference across calls ([`RecurrentLayer::rnn_time_step`]),
//! - full and truncated backprop through time, with the final state of each
//!   truncated segment kept for the next one,
//! - an optional single-slot cache so that the forward pass of a training
//!   iteration is not recomputed by the backward pass that follows it.
//!
//! The forward trace is moved out of the cache by the backward call that uses
//! it. A second training forward before that backward replaces the first.

mod backend;
mod cache;
mod config;
mod kernel;
mod params;
mod reference;
mod state;

pub use backend::{BackendFactory, BackendRegistry, BackendSelection, BackendSelector};
pub use cache::{CacheMode, ForwardPassCache};
pub use config::{LstmConfig, WeightNoise, CUDNN_BACKEND};
pub use kernel::{BackwardRequest, ForwardOutput, ForwardRequest, ForwardTrace, GateKernel, Truncation};
pub use params::{Gate, GateParameters, ParamGradients, NUM_GATES};
pub use reference::{ReferenceKernel, REFERENCE_BACKEND};
pub use state::{LastStepState, SteppingState, TbpttArena};

use crate::{
    error::{BackendUnavailable, LstmError, Result},
    nn::{Gradients, Layer, MaskState, RecurrentLayer},
    tensor::{Scalar, Tensor},
};
use rand::{rngs::StdRng, SeedableRng};

/// Where a forward pass takes its initial state from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateSource {
    Zero,
    Stepping,
    /// Start of the segment a truncated backward pass covers.
    TbpttSeed,
}

/// A single LSTM layer.
#[derive(Debug)]
pub struct LstmLayer<T: Scalar> {
    config: LstmConfig,
    params: GateParameters<T>,
    kernel: Box<dyn GateKernel<T>>,
    fallback_reasons: Vec<BackendUnavailable>,
    input: Option<Tensor<T>>,
    cache: ForwardPassCache<T>,
    stepping: SteppingState<T>,
    tbptt: TbpttArena<T>,
    /// Weights with noise applied, shared by the forward and backward pass of one iteration.
    noisy_params: Option<GateParameters<T>>,
    rng: StdRng,
}

impl<T: Scalar> LstmLayer<T> {
    /// Creates a layer with freshly initialized parameters and the default registry.
    pub fn new(config: LstmConfig) -> Result<Self> {
        Self::with_registry(config, None, &BackendRegistry::default())
    }

    /// Creates a layer around existing parameters, using the default registry.
    pub fn with_params(config: LstmConfig, params: GateParameters<T>) -> Result<Self> {
        Self::with_registry(config, Some(params), &BackendRegistry::default())
    }

    /// Creates a layer choosing its kernel from `registry`.
    pub fn with_registry(
        config: LstmConfig,
        params: Option<GateParameters<T>>,
        registry: &BackendRegistry<T>,
    ) -> Result<Self> {
        Self::with_selector(config, params, &BackendSelector::new(registry))
    }

    /// Creates a layer choosing its kernel through `selector`.
    ///
    /// Parameters are initialized from the config when `params` is `None`.
    pub fn with_selector(
        config: LstmConfig,
        params: Option<GateParameters<T>>,
        selector: &BackendSelector<'_, T>,
    ) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let params = match params {
            Some(params) => {
                check_param_sizes(&config, &params)?;
                params
            }
            None => GateParameters::init(
                config.n_in,
                config.n_out,
                config.weight_init,
                config.forget_gate_bias_init,
                &mut rng,
            )?,
        };

        let BackendSelection {
            kernel,
            fallback_reasons,
        } = selector.select(
            &config.backend_preference,
            config.gate_activation,
            config.activation,
        );

        Ok(Self {
            config,
            params,
            kernel,
            fallback_reasons,
            input: None,
            cache: ForwardPassCache::new(),
            stepping: SteppingState::new(),
            tbptt: TbpttArena::new(),
            noisy_params: None,
            rng,
        })
    }

    pub fn config(&self) -> &LstmConfig {
        &self.config
    }

    pub fn params(&self) -> &GateParameters<T> {
        &self.params
    }

    /// Mutable access for the optimizer. Must not be used between a forward
    /// pass and its backward pass.
    pub fn params_mut(&mut self) -> &mut GateParameters<T> {
        &mut self.params
    }

    /// Replaces the parameters after checking their sizes.
    pub fn set_params(&mut self, params: GateParameters<T>) -> Result<()> {
        check_param_sizes(&self.config, &params)?;
        self.params = params;
        self.noisy_params = None;
        Ok(())
    }

    /// Name of the kernel this layer runs on.
    pub fn backend_name(&self) -> &str {
        self.kernel.name()
    }

    /// Why more preferred backends were passed over at construction.
    pub fn fallback_reasons(&self) -> &[BackendUnavailable] {
        &self.fallback_reasons
    }

    /// Whether a training forward pass is waiting for its backward pass.
    pub fn has_cached_forward(&self) -> bool {
        self.cache.is_populated()
    }

    fn prepare_params(&mut self, training: bool) -> Result<()> {
        if !training || self.noisy_params.is_some() {
            return Ok(());
        }
        if let Some(noise) = self.config.weight_noise {
            self.noisy_params = Some(self.params.with_noise(&noise, &mut self.rng)?);
        }
        Ok(())
    }

    fn effective_params(&self, training: bool) -> &GateParameters<T> {
        match &self.noisy_params {
            Some(noisy) if training => noisy,
            _ => &self.params,
        }
    }

    fn activate_helper(
        &mut self,
        training: bool,
        source: StateSource,
        for_backprop: bool,
    ) -> Result<ForwardOutput<T>> {
        if for_backprop {
            if let Some(cached) = self.cache.take() {
                log::trace!("using cached forward pass {}", self.config.layer_id());
                return Ok(cached);
            }
        }

        self.prepare_params(training)?;

        let input = self.input.as_ref().ok_or_else(|| {
            LstmError::InvalidOperation(format!(
                "cannot run a forward pass without input {}",
                self.config.layer_id()
            ))
        })?;
        let initial = match source {
            StateSource::Zero => None,
            StateSource::Stepping => self.stepping.get(),
            StateSource::TbpttSeed => self.tbptt.backprop_seed(),
        };
        let cache_result = training && !for_backprop && self.config.cache_mode.retains();

        let forward = self.kernel.forward(ForwardRequest {
            params: self.effective_params(training),
            input,
            initial,
            gate_activation: self.config.gate_activation,
            activation: self.config.activation,
            training,
            retain_trace: cache_result || for_backprop,
        })?;

        if cache_result {
            let ForwardOutput { output, last, trace } = forward;
            self.cache.store(ForwardOutput {
                output: output.clone(),
                last: last.clone(),
                trace,
            });
            return Ok(ForwardOutput {
                output,
                last,
                trace: None,
            });
        }
        Ok(forward)
    }

    fn backprop_helper(
        &mut self,
        epsilon: &Tensor<T>,
        truncation: Truncation,
    ) -> Result<Gradients<T, ParamGradients<T>>> {
        let result = self.run_backprop(epsilon, truncation);
        self.noisy_params = None;
        result
    }

    fn run_backprop(
        &mut self,
        epsilon: &Tensor<T>,
        truncation: Truncation,
    ) -> Result<Gradients<T, ParamGradients<T>>> {
        let forward = match truncation {
            Truncation::Full => self.activate_helper(true, StateSource::Zero, true)?,
            Truncation::Steps(_) => {
                let forward = self.activate_helper(true, StateSource::TbpttSeed, true)?;
                self.tbptt.relocate(forward.last.clone());
                forward
            }
        };

        let trace = forward.trace.ok_or_else(|| {
            LstmError::InvalidOperation(format!(
                "backend `{}` returned no forward trace for backprop {}",
                self.kernel.name(),
                self.config.layer_id()
            ))
        })?;

        self.kernel.backward(BackwardRequest {
            trace,
            epsilon,
            truncation,
        })
    }
}

fn check_param_sizes<T: Scalar>(config: &LstmConfig, params: &GateParameters<T>) -> Result<()> {
    if params.n_in() != config.n_in || params.n_out() != config.n_out {
        return Err(LstmError::ShapeMismatch {
            expected: vec![config.n_in, config.n_out],
            actual: vec![params.n_in(), params.n_out()],
        });
    }
    Ok(())
}

impl<T: Scalar> Layer<T> for LstmLayer<T> {
    type ParamGradients = ParamGradients<T>;

    fn set_input(&mut self, input: Tensor<T>) {
        self.input = Some(input);
    }

    fn input(&self) -> Option<&Tensor<T>> {
        self.input.as_ref()
    }

    fn activate(&mut self, input: Tensor<T>, training: bool) -> Result<Tensor<T>> {
        self.set_input(input);
        Ok(self.activate_helper(training, StateSource::Zero, false)?.output)
    }

    fn backprop_gradient(&mut self, epsilon: &Tensor<T>) -> Result<Gradients<T, ParamGradients<T>>> {
        self.backprop_helper(epsilon, Truncation::Full)
    }

    fn gradient(&self) -> Result<ParamGradients<T>> {
        Err(LstmError::UnsupportedOperation(format!(
            "gradient() method for layerwise pretraining: not supported for LSTMs (pretraining not possible) {}",
            self.config.layer_id()
        )))
    }

    fn is_pretrain_layer(&self) -> bool {
        false
    }

    fn feed_forward_mask(
        &self,
        mask: Option<Tensor<T>>,
        _state: MaskState,
    ) -> (Option<Tensor<T>>, MaskState) {
        // masks pass through unchanged; this layer does not apply them
        (mask, MaskState::Passthrough)
    }

    fn num_params(&self) -> usize {
        self.params.num_params()
    }

    fn clear(&mut self) {
        self.input = None;
        self.cache.clear();
        self.noisy_params = None;
    }
}

impl<T: Scalar> RecurrentLayer<T> for LstmLayer<T> {
    type State = LastStepState<T>;

    fn rnn_time_step(&mut self, input: Tensor<T>) -> Result<Tensor<T>> {
        self.set_input(input);
        let forward = self.activate_helper(false, StateSource::Stepping, false)?;
        self.stepping.set(Some(forward.last));
        Ok(forward.output)
    }

    fn rnn_activate_using_stored_state(
        &mut self,
        input: Tensor<T>,
        training: bool,
        store_last_for_tbptt: bool,
    ) -> Result<Tensor<T>> {
        self.set_input(input);
        let forward = self.activate_helper(training, StateSource::Stepping, false)?;
        if store_last_for_tbptt {
            self.tbptt.relocate_from(self.stepping.get(), forward.last);
        }
        Ok(forward.output)
    }

    fn tbptt_backprop_gradient(
        &mut self,
        epsilon: &Tensor<T>,
        tbptt_backward_length: usize,
    ) -> Result<Gradients<T, ParamGradients<T>>> {
        if tbptt_backward_length == 0 {
            return Err(LstmError::InvalidInput(format!(
                "TBPTT backward length must be positive {}",
                self.config.layer_id()
            )));
        }
        self.backprop_helper(epsilon, Truncation::Steps(tbptt_backward_length))
    }

    fn rnn_get_previous_state(&self) -> Option<&LastStepState<T>> {
        self.stepping.get()
    }

    fn rnn_set_previous_state(&mut self, state: Option<LastStepState<T>>) {
        self.stepping.set(state);
    }

    fn rnn_clear_previous_state(&mut self) {
        self.stepping.clear();
    }

    fn rnn_get_tbptt_state(&self) -> Option<&LastStepState<T>> {
        self.tbptt.get()
    }

    fn rnn_set_tbptt_state(&mut self, state: Option<LastStepState<T>>) {
        self.tbptt.set(state);
    }
}
