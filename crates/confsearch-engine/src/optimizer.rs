//! The two-phase optimizer driver.
//!
//! Phase 1 runs anytime best-first search over the configuration graph,
//! collecting every scored complete configuration as a candidate. Phase 2
//! re-validates a finalist pool under a second evaluator and returns the
//! winner. A global deadline, when set, is enforced by the budget watchdog;
//! without one, phase 1 runs to graph exhaustion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;

use confsearch_config::OptimizerConfig;
use confsearch_core::{Candidate, ConfigurationGraph, Evaluator, OptimizerError, Result};

use crate::budget::{Phase2Estimator, PhaseBudgetController};
use crate::cache::RolloutCache;
use crate::event::{event_channel, SearchEvent, SearchListener};
use crate::rollout::{PriorEstimate, RandomRolloutEvaluator, StepUnchangedPredicate};
use crate::scheduler::{BestFirstScheduler, StepOutcome};
use crate::selection::{select_finalists, FinalistSelector};

/// Summary of a finished run.
#[derive(Debug)]
pub struct OptimizerReport<N> {
    /// The selected configuration.
    pub winner: Candidate<N>,
    /// The best candidate by in-search score, regardless of phase 2.
    pub phase1_best: Candidate<N>,
    /// Phase-2 selection statistic of the winner; `None` when phase 2 was
    /// skipped or produced no usable sample.
    pub selection_score: Option<f64>,
    /// Distinct complete configurations scored in phase 1.
    pub candidates_found: usize,
    /// Size of the finalist pool handed to phase 2.
    pub finalists: usize,
    /// Phase-2 runs that produced a counted sample.
    pub validated: usize,
    /// Phase-2 tasks skipped for lack of budget.
    pub skipped: usize,
    /// Nodes expanded by the phase-1 scheduler.
    pub nodes_expanded: usize,
    pub phase1_duration: Duration,
    pub total_duration: Duration,
}

/// Builder and entry point for a two-phase optimization run.
pub struct TwoPhaseOptimizer<G: ConfigurationGraph> {
    graph: Arc<G>,
    search_evaluator: Arc<dyn Evaluator<G::Node>>,
    selection_evaluator: Option<Arc<dyn Evaluator<G::Node>>>,
    listeners: Vec<Arc<dyn SearchListener<G::Node>>>,
    prior: Option<PriorEstimate<G::Node>>,
    step_unchanged: Option<StepUnchangedPredicate<G::Node>>,
    config: OptimizerConfig,
}

impl<G> TwoPhaseOptimizer<G>
where
    G: ConfigurationGraph + 'static,
    G::Node: 'static,
{
    pub fn new(
        graph: Arc<G>,
        search_evaluator: Arc<dyn Evaluator<G::Node>>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            graph,
            search_evaluator,
            selection_evaluator: None,
            listeners: Vec::new(),
            prior: None,
            step_unchanged: None,
            config,
        }
    }

    /// Sets the evaluator used for phase-2 re-validation. Without one, the
    /// phase-1 best wins directly.
    pub fn with_selection_evaluator(mut self, evaluator: Arc<dyn Evaluator<G::Node>>) -> Self {
        self.selection_evaluator = Some(evaluator);
        self
    }

    /// Registers a progress listener. Listeners are invoked on the driving
    /// thread, in registration order.
    pub fn with_listener(mut self, listener: Arc<dyn SearchListener<G::Node>>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Installs a cheap f-value prior consulted before sampling.
    pub fn with_prior_estimate(mut self, prior: PriorEstimate<G::Node>) -> Self {
        self.prior = Some(prior);
        self
    }

    /// Installs the reuse-if-unchanged predicate for f-value inheritance.
    pub fn with_step_unchanged_predicate(
        mut self,
        predicate: StepUnchangedPredicate<G::Node>,
    ) -> Self {
        self.step_unchanged = Some(predicate);
        self
    }

    /// Runs both phases and returns the report.
    ///
    /// # Errors
    ///
    /// [`OptimizerError::NoSolutionFound`] when phase 1 ends without a
    /// single scored configuration; [`OptimizerError::InvalidState`] for a
    /// rejected configuration; [`OptimizerError::Internal`] for engine
    /// defects.
    pub fn run(mut self) -> Result<OptimizerReport<G::Node>> {
        self.config
            .validate()
            .map_err(|e| OptimizerError::InvalidState(e.to_string()))?;

        let started = Instant::now();
        let deadline = self.config.global_deadline().map(|d| started + d);
        let cancel = Arc::new(AtomicBool::new(false));
        let cache = Arc::new(RolloutCache::new());
        let (sink, rx) = event_channel();
        let candidates: Arc<Mutex<Vec<Candidate<G::Node>>>> = Arc::new(Mutex::new(Vec::new()));
        let estimator = Phase2Estimator::new(
            self.config.blowup_factor,
            self.config.cache_factor,
            self.config.num_workers,
        );
        let selection_seed = self.config.random_seed.unwrap_or(0);
        let listeners = std::mem::take(&mut self.listeners);

        let mut evaluator = RandomRolloutEvaluator::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.search_evaluator),
            Arc::clone(&cache),
            sink,
            Arc::clone(&cancel),
            self.config.samples,
            self.config.effective_max_sample_attempts(),
            self.config.random_seed,
        );
        if let Some(prior) = self.prior.take() {
            evaluator = evaluator.with_prior(prior);
        }
        if let Some(predicate) = self.step_unchanged.take() {
            evaluator = evaluator.with_step_unchanged_predicate(predicate);
        }
        let mut scheduler =
            BestFirstScheduler::new(Arc::clone(&self.graph), evaluator, Arc::clone(&cancel));

        let watchdog = deadline.map(|deadline| {
            PhaseBudgetController::new(
                deadline,
                self.config.safety_margin(),
                self.config.budget_poll_interval(),
                estimator,
                self.config.selection_pool_size,
                self.config.selection_margin,
                selection_seed,
                Arc::clone(&candidates),
                Arc::clone(&cancel),
            )
            .spawn()
        });

        tracing::info!(
            deadline_ms = self.config.global_deadline_ms,
            samples = self.config.samples,
            "starting phase 1"
        );
        let phase1_result = loop {
            match scheduler.step() {
                Ok(StepOutcome::Exhausted) => break Ok(()),
                Ok(_) => {}
                // A budget stop is the normal anytime ending, not a failure.
                Err(OptimizerError::Cancelled) => break Ok(()),
                Err(e) => break Err(e),
            }
            Self::drain_events(&rx, &candidates, &listeners);
        };
        Self::drain_events(&rx, &candidates, &listeners);

        // The watchdog exits once the flag is set, whoever set it.
        cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = watchdog {
            let _ = handle.join();
        }
        phase1_result?;

        let phase1_duration = started.elapsed();
        let nodes_expanded = scheduler.expanded();
        let pool: Vec<Candidate<G::Node>> = candidates.lock().unwrap().clone();
        tracing::info!(
            candidates = pool.len(),
            nodes_expanded,
            phase1_ms = phase1_duration.as_millis() as u64,
            "phase 1 finished"
        );
        if pool.is_empty() {
            return Err(OptimizerError::NoSolutionFound);
        }
        let phase1_best = pool
            .iter()
            .min_by(|a, b| a.score().total_cmp(&b.score()))
            .cloned()
            .ok_or_else(|| OptimizerError::Internal("non-empty pool without a best".into()))?;

        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let run_phase2 = self.selection_evaluator.is_some()
            && remaining.map_or(true, |r| r > Duration::ZERO);

        let (winner, selection_score, finalists, validated, skipped) = if run_phase2 {
            let fallback = phase1_best.clone();
            let selection_evaluator = self
                .selection_evaluator
                .take()
                .ok_or_else(|| OptimizerError::Internal("selection evaluator vanished".into()))?;
            let finalist_pool = select_finalists(
                &pool,
                self.config.selection_pool_size,
                self.config.selection_margin,
                selection_seed,
                &estimator,
                remaining,
            );
            let finalists = finalist_pool.len();
            let selector = FinalistSelector::new(
                selection_evaluator,
                estimator,
                self.config.num_workers,
                self.config.repeats_per_candidate,
                self.config.per_task_timeout(),
                deadline,
            );
            let outcome = selector.select(finalist_pool, fallback);
            (
                outcome.winner,
                outcome.selection_score,
                finalists,
                outcome.validated,
                outcome.skipped,
            )
        } else {
            tracing::info!("skipping phase 2, keeping phase-1 best");
            (phase1_best.clone(), None, 0, 0, 0)
        };

        let total_duration = started.elapsed();
        tracing::info!(
            winner_score = winner.score(),
            selection_score,
            total_ms = total_duration.as_millis() as u64,
            "run finished"
        );
        Ok(OptimizerReport {
            winner,
            phase1_best,
            selection_score,
            candidates_found: pool.len(),
            finalists,
            validated,
            skipped,
            nodes_expanded,
            phase1_duration,
            total_duration,
        })
    }

    fn drain_events(
        rx: &Receiver<SearchEvent<G::Node>>,
        candidates: &Mutex<Vec<Candidate<G::Node>>>,
        listeners: &[Arc<dyn SearchListener<G::Node>>],
    ) {
        for event in rx.try_iter() {
            match event {
                SearchEvent::SolutionFound { path, evaluation } => {
                    for listener in listeners {
                        listener.on_solution_found(&path, evaluation.score);
                    }
                    candidates.lock().unwrap().push(Candidate::new(
                        path,
                        evaluation.score,
                        evaluation.wall_clock,
                    ));
                }
                SearchEvent::NodeAnnotated { node, key, value } => {
                    for listener in listeners {
                        listener.on_node_annotated(node, key, &value);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "optimizer_tests.rs"]
mod tests;
