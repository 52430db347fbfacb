//! Gate parameters and their gradients.
//!
//! All three parameter tensors hold the four gates side by side, in the order
//! input, forget, output, candidate (IFOG). Gate `g` occupies columns
//! `g * n_out .. (g + 1) * n_out`.

use super::config::WeightNoise;
use crate::{
    error::{LstmError, Result},
    nn::{init::sample_normal, WeightInit},
    tensor::{Scalar, Tensor},
};
use rand::Rng;

/// Number of gates in the no-peephole LSTM.
pub const NUM_GATES: usize = 4;

/// Position of each gate block inside the parameter columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Input = 0,
    Forget = 1,
    Output = 2,
    Candidate = 3,
}

impl Gate {
    /// Column range of this gate for a layer with `n_out` units.
    pub fn columns(self, n_out: usize) -> std::ops::Range<usize> {
        let start = self as usize * n_out;
        start..start + n_out
    }
}

/// Learned weights of one LSTM layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GateParameters<T> {
    /// `[n_in, 4 * n_out]`
    input_weights: Tensor<T>,
    /// `[n_out, 4 * n_out]`
    recurrent_weights: Tensor<T>,
    /// `[4 * n_out]`
    bias: Tensor<T>,
}

impl<T: Scalar> GateParameters<T> {
    /// Wraps existing tensors, checking that their shapes agree.
    pub fn new(input_weights: Tensor<T>, recurrent_weights: Tensor<T>, bias: Tensor<T>) -> Result<Self> {
        let (n_in, width) = input_weights.dims2()?;
        if width == 0 || width % NUM_GATES != 0 {
            return Err(LstmError::InvalidShape(format!(
                "input weights must have 4 * n_out columns, got {}",
                width
            )));
        }
        let n_out = width / NUM_GATES;
        recurrent_weights.expect_shape(&[n_out, width])?;
        bias.expect_shape(&[width])?;
        if n_in == 0 {
            return Err(LstmError::InvalidShape("input weights have no rows".to_string()));
        }
        Ok(Self {
            input_weights,
            recurrent_weights,
            bias,
        })
    }

    /// Creates freshly initialized parameters.
    ///
    /// Both weight matrices use `weight_init`; the bias is zero except for the
    /// forget gate block, which is set to `forget_gate_bias_init`.
    pub fn init<R: Rng + ?Sized>(
        n_in: usize,
        n_out: usize,
        weight_init: WeightInit,
        forget_gate_bias_init: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let width = NUM_GATES * n_out;
        let input_weights = weight_init.init(n_in, width, rng)?;
        let recurrent_weights = weight_init.init(n_out, width, rng)?;

        let forget = T::from_f64(forget_gate_bias_init).ok_or_else(|| {
            LstmError::InvalidInput(format!(
                "forget gate bias {} is not representable",
                forget_gate_bias_init
            ))
        })?;
        let mut bias = vec![T::zero(); width];
        for v in &mut bias[Gate::Forget.columns(n_out)] {
            *v = forget;
        }

        Self::new(input_weights, recurrent_weights, Tensor::from_vec(bias, &[width])?)
    }

    pub fn n_in(&self) -> usize {
        self.input_weights.shape()[0]
    }

    pub fn n_out(&self) -> usize {
        self.recurrent_weights.shape()[0]
    }

    pub fn input_weights(&self) -> &Tensor<T> {
        &self.input_weights
    }

    pub fn recurrent_weights(&self) -> &Tensor<T> {
        &self.recurrent_weights
    }

    pub fn bias(&self) -> &Tensor<T> {
        &self.bias
    }

    pub fn num_params(&self) -> usize {
        self.input_weights.len() + self.recurrent_weights.len() + self.bias.len()
    }

    /// Returns a copy with additive Gaussian noise applied to the weights
    /// (and to the bias if the noise config asks for it).
    pub fn with_noise<R: Rng + ?Sized>(&self, noise: &WeightNoise, rng: &mut R) -> Result<Self> {
        let perturb = |t: &Tensor<T>, rng: &mut R| -> Result<Tensor<T>> {
            let samples = sample_normal(0.0, noise.std, t.len(), rng)?;
            let data = t
                .as_slice()
                .iter()
                .zip(samples)
                .map(|(&v, n)| v + T::from_f64(n).unwrap_or_else(T::zero))
                .collect();
            Tensor::from_vec(data, t.shape())
        };

        let input_weights = perturb(&self.input_weights, rng)?;
        let recurrent_weights = perturb(&self.recurrent_weights, rng)?;
        let bias = if noise.apply_to_bias {
            perturb(&self.bias, rng)?
        } else {
            self.bias.clone()
        };
        Ok(Self {
            input_weights,
            recurrent_weights,
            bias,
        })
    }
}

/// Gradients for each parameter of a [`GateParameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGradients<T> {
    pub input_weights: Tensor<T>,
    pub recurrent_weights: Tensor<T>,
    pub bias: Tensor<T>,
}

impl<T: Scalar> ParamGradients<T> {
    /// Parameter key and gradient pairs, in parameter order.
    pub fn named(&self) -> [(&'static str, &Tensor<T>); 3] {
        [
            ("W", &self.input_weights),
            ("RW", &self.recurrent_weights),
            ("b", &self.bias),
        ]
    }

    /// Elementwise sum of two gradient bundles of the same layer.
    pub fn add(&self, other: &Self) -> Result<Self> {
        Ok(Self {
            input_weights: self.input_weights.zip_map(&other.input_weights, |a, b| a + b)?,
            recurrent_weights: self
                .recurrent_weights
                .zip_map(&other.recurrent_weights, |a, b| a + b)?,
            bias: self.bias.zip_map(&other.bias, |a, b| a + b)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_init_shapes_and_forget_bias() {
        let mut rng = StdRng::seed_from_u64(1);
        let p: GateParameters<f64> = GateParameters::init(3, 2, WeightInit::Xavier, 1.0, &mut rng).unwrap();
        assert_eq!(p.input_weights().shape(), &[3, 8]);
        assert_eq!(p.recurrent_weights().shape(), &[2, 8]);
        assert_eq!(p.bias().as_slice(), &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(p.n_in(), 3);
        assert_eq!(p.n_out(), 2);
        assert_eq!(p.num_params(), 24 + 16 + 8);
    }

    #[test]
    fn test_new_rejects_mismatched_shapes() {
        let w = Tensor::<f32>::zeros(&[3, 8]);
        let r = Tensor::<f32>::zeros(&[3, 8]);
        let b = Tensor::<f32>::zeros(&[8]);
        assert!(matches!(
            GateParameters::new(w, r, b),
            Err(LstmError::ShapeMismatch { .. })
        ));

        let w = Tensor::<f32>::zeros(&[3, 7]);
        let r = Tensor::<f32>::zeros(&[2, 7]);
        let b = Tensor::<f32>::zeros(&[7]);
        assert!(matches!(
            GateParameters::new(w, r, b),
            Err(LstmError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_noise_leaves_bias_alone_by_default() {
        let mut rng = StdRng::seed_from_u64(3);
        let p: GateParameters<f64> = GateParameters::init(2, 2, WeightInit::Zero, 1.0, &mut rng).unwrap();
        let noise = WeightNoise {
            std: 0.1,
            apply_to_bias: false,
        };
        let noisy = p.with_noise(&noise, &mut rng).unwrap();
        assert_eq!(noisy.bias(), p.bias());
        assert_ne!(noisy.input_weights(), p.input_weights());
        assert_ne!(noisy.recurrent_weights(), p.recurrent_weights());
    }

    #[test]
    fn test_gate_columns() {
        assert_eq!(Gate::Input.columns(3), 0..3);
        assert_eq!(Gate::Forget.columns(3), 3..6);
        assert_eq!(Gate::Output.columns(3), 6..9);
        assert_eq!(Gate::Candidate.columns(3), 9..12);
    }
}
