//! Error Handling Module
//!
//! Defines the error taxonomy for the inference core.
//! Uses thiserror for ergonomic error definitions.
//!
//! The taxonomy distinguishes bad-input errors (returned to the caller
//! directly), fatal startup errors (the process should not serve traffic),
//! and transient inference failures (retried once, then escalated).

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the inference core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Input bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Image decoded but its format cannot be coerced to RGB
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Classifier invoked before weights were loaded
    #[error("Model weights are not loaded")]
    ModelNotLoaded,

    /// Unrecoverable startup failure (missing weights, bad tables)
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Most TTA variants failed to produce a valid forward pass
    #[error("Ensemble degraded: only {succeeded} of {attempted} variants succeeded")]
    EnsembleDegraded { succeeded: usize, attempted: usize },

    /// Lower-level numeric failure during a forward pass
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Bad-input errors indicate a caller problem, not a system failure,
    /// and are returned directly without escalation.
    pub fn is_bad_input(&self) -> bool {
        matches!(self, CoreError::Decode(_) | CoreError::UnsupportedFormat(_))
    }

    /// Retryable errors may succeed on a second attempt before being
    /// surfaced as an expert-review escalation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::EnsembleDegraded { .. })
    }

    /// Fatal errors mean the engine must not serve traffic.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::Initialization(_) | CoreError::ModelNotLoaded
        )
    }
}

/// Convenience Result type for inference core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Inference("nan in logits".to_string());
        assert_eq!(format!("{}", err), "Inference error: nan in logits");
    }

    #[test]
    fn test_degraded_display() {
        let err = CoreError::EnsembleDegraded {
            succeeded: 2,
            attempted: 5,
        };
        assert!(format!("{}", err).contains("2 of 5"));
    }

    #[test]
    fn test_classification_helpers() {
        assert!(CoreError::Decode("bad".into()).is_bad_input());
        assert!(CoreError::UnsupportedFormat("cmyk".into()).is_bad_input());
        assert!(!CoreError::Inference("x".into()).is_bad_input());

        assert!(CoreError::EnsembleDegraded {
            succeeded: 1,
            attempted: 5
        }
        .is_retryable());
        assert!(!CoreError::Inference("x".into()).is_retryable());

        assert!(CoreError::ModelNotLoaded.is_fatal());
        assert!(CoreError::Initialization("missing".into()).is_fatal());
    }
}
