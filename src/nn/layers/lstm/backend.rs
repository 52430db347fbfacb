//! Backend registry and selection.
//!
//! A layer picks its gate kernel once, at construction: each name in the
//! preference list is looked up in a [`BackendRegistry`], instantiated and
//! probed for the configured activations. The first one that passes is used;
//! if none does, the layer falls back to [`ReferenceKernel`]. Selection
//! failures are never returned to the caller, they only show up as log output
//! (once per process per distinct failure) and in
//! [`BackendSelection::fallback_reasons`].

use super::{
    kernel::GateKernel,
    reference::{ReferenceKernel, REFERENCE_BACKEND},
};
use crate::{
    device::ComputeDevice,
    error::BackendUnavailable,
    nn::Activation,
    tensor::Scalar,
};
use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, OnceLock},
};

/// Creates a kernel instance, or explains why it cannot.
pub type BackendFactory<T> =
    Arc<dyn Fn() -> Result<Box<dyn GateKernel<T>>, BackendUnavailable> + Send + Sync>;

/// Named kernel factories.
pub struct BackendRegistry<T> {
    entries: Vec<(String, BackendFactory<T>)>,
}

impl<T: Scalar> BackendRegistry<T> {
    /// An empty registry.
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers `factory` under `name`, replacing any previous entry of that name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn GateKernel<T>>, BackendUnavailable> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: BackendFactory<T> = Arc::new(factory);
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((name, factory)),
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    fn instantiate(&self, name: &str) -> Result<Box<dyn GateKernel<T>>, BackendUnavailable> {
        let (_, factory) = self
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| BackendUnavailable::NotPresent {
                backend: name.to_string(),
            })?;
        factory()
    }
}

impl<T: Scalar> Default for BackendRegistry<T> {
    /// Registry holding only the reference kernel.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(REFERENCE_BACKEND, || {
            Ok(Box::new(ReferenceKernel::new()) as Box<dyn GateKernel<T>>)
        });
        registry
    }
}

impl<T> fmt::Debug for BackendRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(n, _)| n))
            .finish()
    }
}

/// Outcome of backend selection.
#[derive(Debug)]
pub struct BackendSelection<T> {
    pub kernel: Box<dyn GateKernel<T>>,
    /// Why each more preferred backend was skipped, in preference order.
    pub fallback_reasons: Vec<BackendUnavailable>,
}

/// Picks a kernel from a registry.
#[derive(Debug)]
pub struct BackendSelector<'a, T> {
    registry: &'a BackendRegistry<T>,
    device: ComputeDevice,
}

impl<'a, T: Scalar> BackendSelector<'a, T> {
    pub fn new(registry: &'a BackendRegistry<T>) -> Self {
        Self::with_device(registry, ComputeDevice::detect())
    }

    pub fn with_device(registry: &'a BackendRegistry<T>, device: ComputeDevice) -> Self {
        Self { registry, device }
    }

    /// Returns the first preferred backend that supports the activation pair,
    /// or the reference kernel.
    pub fn select(
        &self,
        preference: &[String],
        gate_activation: Activation,
        activation: Activation,
    ) -> BackendSelection<T> {
        let mut fallback_reasons = Vec::new();

        for name in preference {
            match self.try_backend(name, gate_activation, activation) {
                Ok(kernel) => {
                    log::debug!("{} LSTM backend initialized", kernel.name());
                    return BackendSelection {
                        kernel,
                        fallback_reasons,
                    };
                }
                Err(reason) => {
                    self.report(&reason);
                    fallback_reasons.push(reason);
                }
            }
        }

        BackendSelection {
            kernel: Box::new(ReferenceKernel::new()),
            fallback_reasons,
        }
    }

    fn try_backend(
        &self,
        name: &str,
        gate_activation: Activation,
        activation: Activation,
    ) -> Result<Box<dyn GateKernel<T>>, BackendUnavailable> {
        let kernel = self.registry.instantiate(name)?;
        if !kernel.supports(gate_activation, activation, false) {
            return Err(BackendUnavailable::Unsupported {
                backend: name.to_string(),
                gate_activation,
                activation,
            });
        }
        Ok(kernel)
    }

    fn report(&self, reason: &BackendUnavailable) {
        match reason {
            BackendUnavailable::NotPresent { backend } if self.device.is_gpu_capable() => {
                log_once(log::Level::Info, || {
                    format!(
                        "{} not found: register an accelerated LSTM backend under this name for better GPU performance",
                        backend
                    )
                });
            }
            BackendUnavailable::NotPresent { backend } => {
                log::debug!("{} LSTM backend not present, using the reference kernel", backend);
            }
            other => {
                log_once(log::Level::Warn, || {
                    format!("Could not initialize {} LSTM backend: {}", other.backend(), other)
                });
            }
        }
    }
}

/// Logs `message` at `level` unless the same message was already logged by this process.
fn log_once<F: FnOnce() -> String>(level: log::Level, message: F) {
    static SEEN: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let message = message();
    let mut seen = SEEN
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if seen.insert(message.clone()) {
        log::log!(level, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::lstm::{BackwardRequest, ForwardOutput, ForwardRequest, ParamGradients};
    use crate::{error::Result, nn::Gradients};

    #[derive(Debug)]
    struct SigmoidTanhOnly;

    impl GateKernel<f32> for SigmoidTanhOnly {
        fn name(&self) -> &str {
            "sigmoid-tanh"
        }

        fn supports(&self, gate_activation: Activation, activation: Activation, peephole: bool) -> bool {
            gate_activation == Activation::Sigmoid && activation == Activation::Tanh && !peephole
        }

        fn forward(&self, request: ForwardRequest<'_, f32>) -> Result<ForwardOutput<f32>> {
            GateKernel::<f32>::forward(&ReferenceKernel, request)
        }

        fn backward(&self, request: BackwardRequest<'_, f32>) -> Result<Gradients<f32, ParamGradients<f32>>> {
            GateKernel::<f32>::backward(&ReferenceKernel, request)
        }
    }

    fn registry() -> BackendRegistry<f32> {
        let mut registry = BackendRegistry::default();
        registry.register("sigmoid-tanh", || Ok(Box::new(SigmoidTanhOnly) as Box<dyn GateKernel<f32>>));
        registry.register("broken", || {
            Err(BackendUnavailable::Incompatible {
                backend: "broken".to_string(),
                reason: "driver too old".to_string(),
            })
        });
        registry
    }

    fn prefs(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_selects_first_supported() {
        let registry = registry();
        let selector = BackendSelector::with_device(&registry, ComputeDevice::Cpu);
        let selection = selector.select(
            &prefs(&["missing", "sigmoid-tanh"]),
            Activation::Sigmoid,
            Activation::Tanh,
        );
        assert_eq!(selection.kernel.name(), "sigmoid-tanh");
        assert_eq!(
            selection.fallback_reasons,
            vec![BackendUnavailable::NotPresent {
                backend: "missing".to_string()
            }]
        );
    }

    #[test]
    fn test_unsupported_activations_fall_back() {
        let registry = registry();
        let selector = BackendSelector::with_device(&registry, ComputeDevice::Cpu);
        let selection = selector.select(
            &prefs(&["sigmoid-tanh"]),
            Activation::HardSigmoid,
            Activation::Tanh,
        );
        assert_eq!(selection.kernel.name(), REFERENCE_BACKEND);
        assert!(matches!(
            selection.fallback_reasons.as_slice(),
            [BackendUnavailable::Unsupported { .. }]
        ));
    }

    #[test]
    fn test_factory_failure_is_absorbed() {
        let registry = registry();
        let selector = BackendSelector::with_device(&registry, ComputeDevice::Cuda { devices: 1 });
        let selection = selector.select(&prefs(&["broken"]), Activation::Sigmoid, Activation::Tanh);
        assert_eq!(selection.kernel.name(), REFERENCE_BACKEND);
        assert_eq!(selection.fallback_reasons[0].backend(), "broken");
    }

    #[test]
    fn test_empty_preference_uses_reference() {
        let registry = BackendRegistry::<f32>::empty();
        let selector = BackendSelector::with_device(&registry, ComputeDevice::Cpu);
        let selection = selector.select(&[], Activation::Sigmoid, Activation::Tanh);
        assert_eq!(selection.kernel.name(), REFERENCE_BACKEND);
        assert!(selection.fallback_reasons.is_empty());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = BackendRegistry::<f32>::default();
        registry.register(REFERENCE_BACKEND, || {
            Err(BackendUnavailable::Incompatible {
                backend: REFERENCE_BACKEND.to_string(),
                reason: "disabled".to_string(),
            })
        });
        assert_eq!(registry.names().count(), 1);
        assert!(registry.contains(REFERENCE_BACKEND));
    }
}
