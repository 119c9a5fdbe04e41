//! Errors raised while building or running conditional normalization layers

use thiserror::Error;

/// Errors that can occur when constructing or applying a normalization layer
///
/// Configuration errors are returned by the `init` methods and never deferred
/// to a forward call. Contract violations are returned by forward calls that
/// receive conditioning the layer cannot use.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormError {
    #[error("Epsilon must be positive, got {0}")]
    InvalidEpsilon(f64),

    #[error("{channels} channels cannot be split into {groups} groups")]
    GroupMismatch { channels: usize, groups: usize },

    #[error("Unknown norm type: {0}")]
    UnknownNormType(String),

    #[error("Unknown activation function: {0}")]
    UnknownActivation(String),

    #[error("Invalid dimension for {name}: {reason}")]
    InvalidDimension { name: &'static str, reason: String },

    #[error("Missing conditioning input: {0}")]
    MissingConditioning(&'static str),

    #[error("Index {index} out of range for embedding table of size {size}")]
    IndexOutOfRange { index: i64, size: usize },
}

/// Rejects non-positive (and NaN) epsilon values
pub(crate) fn check_epsilon(eps: f64) -> Result<f64, NormError> {
    if eps > 0.0 {
        Ok(eps)
    } else {
        Err(NormError::InvalidEpsilon(eps))
    }
}
