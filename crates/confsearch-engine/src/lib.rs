//! Anytime two-phase search engine for configuration optimization.
//!
//! Phase 1 explores the configuration graph best-first, estimating partial
//! configurations by randomized rollouts against a benchmark evaluator and
//! reporting every scored complete configuration as a candidate. Phase 2
//! re-validates a small finalist pool under a second evaluator and picks
//! the winner by a robust statistic. A global wall-clock budget, when set,
//! is split between the phases by a runtime model.
//!
//! The entry point is [`TwoPhaseOptimizer`]; callers supply a
//! [`confsearch_core::ConfigurationGraph`] and one or two
//! [`confsearch_core::Evaluator`]s.

pub mod arena;
pub mod budget;
pub mod cache;
pub mod event;
pub mod optimizer;
pub mod rollout;
pub mod scheduler;
pub mod selection;

#[cfg(test)]
pub(crate) mod test_utils;

pub use arena::{NodeArena, NodeId, SearchNode};
pub use budget::{Phase2Estimator, PhaseBudgetController};
pub use cache::RolloutCache;
pub use event::{event_channel, CountingListener, EventSink, SearchEvent, SearchListener};
pub use optimizer::{OptimizerReport, TwoPhaseOptimizer};
pub use rollout::{NodeEvaluator, RandomRolloutEvaluator};
pub use scheduler::{BestFirstScheduler, SchedulerState, StepOutcome};
pub use selection::{select_finalists, CandidateStats, FinalistSelector, SelectionOutcome};
