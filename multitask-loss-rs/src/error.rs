//! Error types for multi-task loss combination.

use std::fmt;

use candle_core::DType;
use thiserror::Error;

use crate::task::Task;

/// Result type alias for loss combination operations.
pub type Result<T> = std::result::Result<T, LossError>;

/// Where a non-finite value was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossScope {
    /// A single task's loss, rate or weight.
    Task(Task),
    /// The combined scalar loss.
    Total,
}

impl fmt::Display for LossScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(task) => write!(f, "{task} task"),
            Self::Total => write!(f, "total loss"),
        }
    }
}

/// Errors that can occur while computing or combining task losses.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LossError {
    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Prediction and target shapes are incompatible for the task's loss.
    #[error(
        "shape mismatch for {task} loss: prediction {prediction:?} vs target {target:?} ({reason})"
    )]
    ShapeMismatch {
        /// Task whose tensors disagree.
        task: Task,
        /// Prediction shape.
        prediction: Vec<usize>,
        /// Target shape.
        target: Vec<usize>,
        /// What the loss function expected.
        reason: &'static str,
    },

    /// Target tensor has a dtype the loss cannot consume.
    #[error("dtype mismatch for {task} target: expected {expected}, got {actual:?}")]
    DTypeMismatch {
        /// Task whose target has the wrong dtype.
        task: Task,
        /// Accepted dtypes.
        expected: &'static str,
        /// Actual dtype.
        actual: DType,
    },

    /// A class-index target lies outside `0..classes`.
    #[error("class index {index} out of range for {task} with {classes} classes")]
    ClassIndexOutOfRange {
        /// Task whose target holds the index.
        task: Task,
        /// Offending index.
        index: i64,
        /// Number of classes in the logits.
        classes: usize,
    },

    /// An enabled task was given no tensors.
    #[error("missing {0} tensors for an enabled task")]
    MissingInput(Task),

    /// A loss, rate or weight became NaN or infinite.
    #[error("numeric instability in {quantity} of {scope}: {value}")]
    NumericInstability {
        /// Task (or total) that produced the value.
        scope: LossScope,
        /// Which quantity was non-finite, e.g. "base loss" or "weight".
        quantity: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Negative task loss under a fractional exponent.
    #[error("negative loss under fractional exponent: product {product}, losses {losses:?}")]
    DomainError {
        /// Product of the enabled task losses.
        product: f64,
        /// Individual enabled task losses.
        losses: Vec<f64>,
    },

    /// Invalid YAML configuration.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// JSON export failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Fail with [`LossError::NumericInstability`] unless `value` is finite.
pub(crate) fn ensure_finite(scope: LossScope, quantity: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(LossError::NumericInstability {
            scope,
            quantity,
            value,
        })
    }
}
