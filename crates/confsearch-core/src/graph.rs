//! External seams: the configuration graph and the benchmark evaluator.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;

/// The incrementally generated space of partial configurations.
///
/// Implementations must be deterministic per node value: `successors` and
/// `is_goal` may be called repeatedly for equal nodes and have to return
/// equal answers, otherwise path-keyed caching inside the engine is unsound.
///
/// Successors are action-tagged; the action label is carried on the search
/// tree edge for diagnostics and path reconstruction.
pub trait ConfigurationGraph: Send + Sync {
    /// A partial configuration. Paths of nodes are used as cache keys by
    /// value, hence the `Eq + Hash` bound.
    type Node: Clone + Eq + Hash + Debug + Send + Sync;

    /// The label of the refinement step leading to a successor.
    type Action: Clone + Debug + Send + Sync;

    /// Returns the root (empty) configuration.
    fn root(&self) -> Self::Node;

    /// Expands a partial configuration into its refinements.
    ///
    /// An empty result for a non-goal node marks a dead end.
    fn successors(&self, node: &Self::Node) -> Vec<(Self::Action, Self::Node)>;

    /// Returns whether the node is a complete, evaluable configuration.
    fn is_goal(&self, node: &Self::Node) -> bool;
}

/// The outcome of benchmarking one complete configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Benchmark score; lower is better.
    pub score: f64,
    /// Wall-clock time the benchmark consumed. Feeds the phase-2 runtime
    /// model, so it must reflect the real evaluation cost.
    pub wall_clock: Duration,
}

impl Evaluation {
    pub fn new(score: f64, wall_clock: Duration) -> Self {
        Self { score, wall_clock }
    }
}

/// Raised by an [`Evaluator`] that cannot score a configuration.
#[derive(Debug, Error)]
#[error("evaluation failed: {reason}")]
pub struct EvaluationError {
    pub reason: String,
}

impl EvaluationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Scores a complete configuration, i.e. a root-to-goal path.
///
/// Implementations are shared across the phase-2 worker pool and must be
/// thread-safe. The engine guarantees that within one run each distinct
/// complete path is passed to [`Evaluator::evaluate`] at most once.
pub trait Evaluator<N>: Send + Sync {
    /// Evaluates a complete configuration given as its root-to-goal path.
    fn evaluate(&self, configuration: &[N]) -> Result<Evaluation, EvaluationError>;
}
