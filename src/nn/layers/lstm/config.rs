use super::cache::CacheMode;
use crate::{
    error::{LstmError, Result},
    nn::{Activation, WeightInit},
};

/// Name under which an accelerated vendor kernel is usually registered.
pub const CUDNN_BACKEND: &str = "cudnn";

/// Additive Gaussian noise applied to the weights during training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightNoise {
    /// Standard deviation of the noise.
    pub std: f64,
    /// Also perturb the bias vector.
    pub apply_to_bias: bool,
}

/// Configuration of an [`LstmLayer`](super::LstmLayer).
#[derive(Debug, Clone, PartialEq)]
pub struct LstmConfig {
    /// Number of input features.
    pub n_in: usize,
    /// Number of hidden units.
    pub n_out: usize,
    /// Nonlinearity of the input, forget and output gates.
    pub gate_activation: Activation,
    /// Nonlinearity of the candidate and of the cell output.
    pub activation: Activation,
    pub cache_mode: CacheMode,
    pub weight_init: WeightInit,
    pub forget_gate_bias_init: f64,
    pub weight_noise: Option<WeightNoise>,
    /// Backends to try, most preferred first. The default kernel is used when none fit.
    pub backend_preference: Vec<String>,
    /// Seed for parameter initialization and weight noise.
    pub seed: u64,
    /// Used in error messages and diagnostics.
    pub name: Option<String>,
}

impl LstmConfig {
    pub fn new(n_in: usize, n_out: usize) -> Self {
        Self {
            n_in,
            n_out,
            gate_activation: Activation::Sigmoid,
            activation: Activation::Tanh,
            cache_mode: CacheMode::None,
            weight_init: WeightInit::Xavier,
            forget_gate_bias_init: 1.0,
            weight_noise: None,
            backend_preference: vec![CUDNN_BACKEND.to_string()],
            seed: 12345,
            name: None,
        }
    }

    pub fn with_gate_activation(mut self, activation: Activation) -> Self {
        self.gate_activation = activation;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn with_weight_init(mut self, weight_init: WeightInit) -> Self {
        self.weight_init = weight_init;
        self
    }

    pub fn with_forget_gate_bias_init(mut self, value: f64) -> Self {
        self.forget_gate_bias_init = value;
        self
    }

    pub fn with_weight_noise(mut self, noise: WeightNoise) -> Self {
        self.weight_noise = Some(noise);
        self
    }

    pub fn with_backend_preference<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backend_preference = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Checks the sizes and noise settings.
    pub fn validate(&self) -> Result<()> {
        if self.n_in == 0 || self.n_out == 0 {
            return Err(LstmError::InvalidInput(format!(
                "LSTM layer sizes must be positive, got n_in={} n_out={}",
                self.n_in, self.n_out
            )));
        }
        if let Some(noise) = &self.weight_noise {
            if !(noise.std >= 0.0) {
                return Err(LstmError::InvalidInput(format!(
                    "weight noise std must be non-negative, got {}",
                    noise.std
                )));
            }
        }
        Ok(())
    }

    /// Identifier used in messages.
    pub fn layer_id(&self) -> String {
        match &self.name {
            Some(name) => format!("(layer name: {})", name),
            None => "(layer name: <unnamed>)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LstmConfig::new(4, 3);
        assert_eq!(config.gate_activation, Activation::Sigmoid);
        assert_eq!(config.activation, Activation::Tanh);
        assert_eq!(config.cache_mode, CacheMode::None);
        assert_eq!(config.backend_preference, vec!["cudnn".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(LstmConfig::new(0, 3).validate().is_err());
        assert!(LstmConfig::new(3, 0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_noise() {
        let config = LstmConfig::new(2, 2).with_weight_noise(WeightNoise {
            std: -0.5,
            apply_to_bias: false,
        });
        assert!(matches!(config.validate(), Err(LstmError::InvalidInput(_))));
    }

    #[test]
    fn test_builder() {
        let config = LstmConfig::new(2, 5)
            .with_cache_mode(CacheMode::Host)
            .with_backend_preference(["fast", "reference"])
            .with_name("encoder");
        assert_eq!(config.cache_mode, CacheMode::Host);
        assert_eq!(config.backend_preference, vec!["fast".to_string(), "reference".to_string()]);
        assert_eq!(config.layer_id(), "(layer name: encoder)");
    }
}
