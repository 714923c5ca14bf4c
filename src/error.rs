//! Error types for Atender operations.
//!
//! Provides rich error context for library consumers.

use std::fmt;

/// Main error type for Atender operations.
///
/// Covers the failure modes of layer construction and forward computation:
/// dimension disagreements, mixed connectivity representations, unknown
/// layer variants, and invalid hyperparameters.
///
/// # Examples
///
/// ```
/// use atender::error::AtenderError;
///
/// let err = AtenderError::ShapeMismatch {
///     expected: "(5, 5)".to_string(),
///     actual: "(5, 4)".to_string(),
/// };
/// assert!(err.to_string().contains("shape mismatch"));
/// ```
#[derive(Debug)]
pub enum AtenderError {
    /// Tensor dimensions don't match for the operation.
    ShapeMismatch {
        /// Expected dimensions description
        expected: String,
        /// Actual dimensions found
        actual: String,
    },

    /// A layer received the wrong connectivity representation
    /// (dense mask vs. edge list).
    ConnectivityMismatch {
        /// Representation the layer operates on
        expected: String,
        /// Representation it was given
        actual: String,
    },

    /// Unknown or unsupported layer variant tag.
    UnsupportedVariant {
        /// The tag that failed to resolve
        name: String,
    },

    /// Invalid hyperparameter value provided.
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Generic error with string message.
    Other(String),
}

impl fmt::Display for AtenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtenderError::ShapeMismatch { expected, actual } => {
                write!(f, "shape mismatch: expected {expected}, got {actual}")
            }
            AtenderError::ConnectivityMismatch { expected, actual } => {
                write!(
                    f,
                    "connectivity mismatch: layer expects {expected}, got {actual}"
                )
            }
            AtenderError::UnsupportedVariant { name } => {
                write!(f, "unsupported layer variant: {name}")
            }
            AtenderError::InvalidHyperparameter {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "Invalid hyperparameter: {param} = {value}, expected {constraint}"
                )
            }
            AtenderError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for AtenderError {}

impl From<&str> for AtenderError {
    fn from(msg: &str) -> Self {
        AtenderError::Other(msg.to_string())
    }
}

impl From<String> for AtenderError {
    fn from(msg: String) -> Self {
        AtenderError::Other(msg)
    }
}

impl AtenderError {
    /// Create a shape mismatch error with descriptive context.
    #[must_use]
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a connectivity mismatch error.
    #[must_use]
    pub fn connectivity_mismatch(expected: &str, actual: &str) -> Self {
        Self::ConnectivityMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an invalid hyperparameter error.
    #[must_use]
    pub fn invalid_hyperparameter(param: &str, value: impl fmt::Display, constraint: &str) -> Self {
        Self::InvalidHyperparameter {
            param: param.to_string(),
            value: value.to_string(),
            constraint: constraint.to_string(),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, AtenderError>;
