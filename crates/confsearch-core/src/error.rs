//! Error types for confsearch.

use thiserror::Error;

/// Main error type for optimizer operations.
///
/// Deadline expiry is deliberately not represented here: budget checks are
/// control-flow decisions, not failures. A run that runs out of time with an
/// empty candidate pool ends in [`OptimizerError::NoSolutionFound`].
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The open list was exhausted (or the deadline hit) without any
    /// complete configuration being found.
    #[error("no solution found")]
    NoSolutionFound,

    /// The benchmark failed to evaluate a complete configuration.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The run was cancelled cooperatively before completion.
    #[error("optimizer run was cancelled")]
    Cancelled,

    /// Invalid operation for the current component state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Internal invariant violation (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for optimizer operations.
pub type Result<T> = std::result::Result<T, OptimizerError>;

impl From<crate::graph::EvaluationError> for OptimizerError {
    fn from(e: crate::graph::EvaluationError) -> Self {
        Self::Evaluation(e.reason)
    }
}
