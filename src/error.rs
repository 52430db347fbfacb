use thiserror::Error;

use crate::nn::Activation;

#[derive(Error, Debug)]
pub enum LstmError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Invalid shape: {0}")]
    InvalidShape(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// Reasons a gate backend could not be used.
///
/// These never reach the caller of a layer: the selector falls back to the
/// default kernel and reports them as diagnostics only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendUnavailable {
    #[error("backend `{backend}` is not present")]
    NotPresent { backend: String },
    #[error("backend `{backend}` could not be initialized: {reason}")]
    Incompatible { backend: String, reason: String },
    #[error(
        "backend `{backend}` does not support gate activation {gate_activation:?} with activation {activation:?}"
    )]
    Unsupported {
        backend: String,
        gate_activation: Activation,
        activation: Activation,
    },
}

impl BackendUnavailable {
    /// Name of the backend that failed.
    pub fn backend(&self) -> &str {
        match self {
            Self::NotPresent { backend }
            | Self::Incompatible { backend, .. }
            | Self::Unsupported { backend, .. } => backend,
        }
    }
}

pub type Result<T> = std::result::Result<T, LstmError>;
