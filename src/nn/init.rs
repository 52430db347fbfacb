//! Weight initialization schemes.
//!
//! # Available Initialization Strategies
//! - `Zero`: all zeros
//! - `Uniform`: values from `[low, high)`
//! - `Normal`: values from `N(mean, std)`
//! - `Xavier`: Glorot normal, `std = sqrt(2 / (fan_in + fan_out))`
//! - `XavierUniform`: Glorot uniform, `limit = sqrt(6 / (fan_in + fan_out))`

use crate::{
    error::{LstmError, Result},
    tensor::{Scalar, Tensor},
};
use rand::{
    distributions::{Distribution, Uniform},
    Rng,
};
use rand_distr::Normal;

/// Strategy used to fill a freshly created weight matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightInit {
    Zero,
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
    Xavier,
    XavierUniform,
}

impl Default for WeightInit {
    fn default() -> Self {
        WeightInit::Xavier
    }
}

impl WeightInit {
    /// Creates a `[fan_in, fan_out]` matrix initialized with this scheme.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the distribution parameters are not valid.
    pub fn init<T: Scalar, R: Rng + ?Sized>(
        self,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<Tensor<T>> {
        let shape = [fan_in, fan_out];
        let size = fan_in * fan_out;
        let fans = (fan_in + fan_out).max(1) as f64;

        let values: Vec<f64> = match self {
            WeightInit::Zero => vec![0.0; size],
            WeightInit::Uniform { low, high } => sample_uniform(low, high, size, rng)?,
            WeightInit::Normal { mean, std } => sample_normal(mean, std, size, rng)?,
            WeightInit::Xavier => sample_normal(0.0, (2.0 / fans).sqrt(), size, rng)?,
            WeightInit::XavierUniform => {
                let limit = (6.0 / fans).sqrt();
                sample_uniform(-limit, limit, size, rng)?
            }
        };

        let data = values
            .into_iter()
            .map(|v| T::from_f64(v).unwrap_or_else(T::zero))
            .collect();
        Tensor::from_vec(data, &shape)
    }
}

fn sample_uniform<R: Rng + ?Sized>(low: f64, high: f64, size: usize, rng: &mut R) -> Result<Vec<f64>> {
    if !(low < high) {
        return Err(LstmError::InvalidInput(format!(
            "uniform init requires low < high, got [{}, {})",
            low, high
        )));
    }
    let uniform = Uniform::new(low, high);
    Ok((0..size).map(|_| uniform.sample(rng)).collect())
}

/// Draws `size` samples from `N(mean, std)`.
pub(crate) fn sample_normal<R: Rng + ?Sized>(
    mean: f64,
    std: f64,
    size: usize,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let normal = Normal::new(mean, std)
        .map_err(|e| LstmError::InvalidInput(format!("invalid normal distribution: {}", e)))?;
    Ok((0..size).map(|_| normal.sample(rng)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_zero_init() {
        let mut rng = StdRng::seed_from_u64(0);
        let w: Tensor<f32> = WeightInit::Zero.init(3, 4, &mut rng).unwrap();
        assert_eq!(w.shape(), &[3, 4]);
        assert!(w.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_xavier_uniform_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let w: Tensor<f64> = WeightInit::XavierUniform.init(10, 20, &mut rng).unwrap();
        let limit = (6.0f64 / 30.0).sqrt();
        assert!(w.as_slice().iter().all(|&v| v >= -limit && v < limit));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a: Tensor<f64> = WeightInit::Xavier
            .init(4, 8, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b: Tensor<f64> = WeightInit::Xavier
            .init(4, 8, &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_parameters() {
        let mut rng = StdRng::seed_from_u64(0);
        let bad = WeightInit::Uniform { low: 1.0, high: 1.0 }.init::<f32, _>(2, 2, &mut rng);
        assert!(matches!(bad, Err(LstmError::InvalidInput(_))));
        let bad = WeightInit::Normal { mean: 0.0, std: -1.0 }.init::<f32, _>(2, 2, &mut rng);
        assert!(matches!(bad, Err(LstmError::InvalidInput(_))));
    }
}
