//! Single-layer LSTM with truncated backprop through time, a forward-pass cache
//! and pluggable gate backends.
//!
//! ```
//! use tensorust_lstm::{CacheMode, Layer, LstmConfig, LstmLayer, Tensor};
//!
//! let config = LstmConfig::new(3, 4).with_cache_mode(CacheMode::Host);
//! let mut layer = LstmLayer::<f32>::new(config).unwrap();
//!
//! let input = Tensor::filled(&[2, 5, 3], 0.1);
//! let output = layer.activate(input, true).unwrap();
//! assert_eq!(output.shape(), &[2, 5, 4]);
//!
//! // reuses the cached forward pass
//! let grads = layer.backprop_gradient(&Tensor::filled(&[2, 5, 4], 1.0)).unwrap();
//! assert_eq!(grads.epsilon.shape(), &[2, 5, 3]);
//! ```

pub mod device;
pub mod error;
pub mod nn;
pub mod tensor;

pub use device::ComputeDevice;
pub use error::{BackendUnavailable, LstmError, Result};
pub use nn::lstm::{
    BackendRegistry, BackendSelector, CacheMode, GateKernel, GateParameters, LastStepState,
    LstmConfig, LstmLayer, ParamGradients, ReferenceKernel, WeightNoise,
};
pub use nn::{Activation, Gradients, Layer, MaskState, RecurrentLayer, WeightInit};
pub use tensor::{Scalar, Tensor};
