//! Randomized rollout evaluation of partial configurations.
//!
//! The f-value of a partial configuration is estimated by completing it to a
//! goal with randomized descents and benchmarking the completions. The
//! estimator is an explicit ordered chain:
//!
//! 1. a cheap graph-specific prior, if one is configured and applies;
//! 2. parent reuse, when the inbound step is known not to change anything
//!    solution-relevant;
//! 3. a cached completion subsuming this path;
//! 4. sampling: up to `samples` successful randomized rollouts, keeping the
//!    lowest score, folded with the best score already observed under the
//!    path by earlier batches.
//!
//! Every complete configuration is benchmarked at most once per run and
//! reported as a solution exactly once, at its first successful scoring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::prelude::IndexedRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use confsearch_core::{
    ConfigurationGraph, Evaluation, Evaluator, OptimizerError, Result,
};

use crate::arena::{NodeArena, NodeId};
use crate::cache::RolloutCache;
use crate::event::EventSink;

/// Computes f-values for search nodes.
///
/// Returning `Ok(None)` means "no estimate": the node leads nowhere useful
/// and the scheduler drops it as a dead branch.
pub trait NodeEvaluator<N, A> {
    fn evaluate(&mut self, arena: &NodeArena<N, A>, node: NodeId) -> Result<Option<f64>>;
}

/// Optional cheap estimator consulted before any sampling.
pub type PriorEstimate<N> = Box<dyn Fn(&N) -> Option<f64> + Send>;

/// Optional predicate `(parent, child) -> true` when the refinement step
/// between them cannot have changed anything solution-relevant.
pub type StepUnchangedPredicate<N> = Box<dyn Fn(&N, &N) -> bool + Send>;

/// f-value computation via cached or freshly sampled rollouts.
pub struct RandomRolloutEvaluator<G: ConfigurationGraph> {
    graph: Arc<G>,
    benchmark: Arc<dyn Evaluator<G::Node>>,
    cache: Arc<RolloutCache<G::Node>>,
    sink: EventSink<G::Node>,
    cancel: Arc<AtomicBool>,
    rng: ChaCha8Rng,
    samples: usize,
    max_attempts: usize,
    prior: Option<PriorEstimate<G::Node>>,
    step_unchanged: Option<StepUnchangedPredicate<G::Node>>,
}

impl<G: ConfigurationGraph> RandomRolloutEvaluator<G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<G>,
        benchmark: Arc<dyn Evaluator<G::Node>>,
        cache: Arc<RolloutCache<G::Node>>,
        sink: EventSink<G::Node>,
        cancel: Arc<AtomicBool>,
        samples: usize,
        max_attempts: usize,
        seed: Option<u64>,
    ) -> Self {
        debug_assert!(samples >= 1, "sample budget must be positive");
        debug_assert!(max_attempts >= samples, "attempt bound below sample budget");
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_os_rng(),
        };
        Self {
            graph,
            benchmark,
            cache,
            sink,
            cancel,
            rng,
            samples,
            max_attempts,
            prior: None,
            step_unchanged: None,
        }
    }

    /// Installs a cheap prior estimator (chain step 1).
    pub fn with_prior(mut self, prior: PriorEstimate<G::Node>) -> Self {
        self.prior = Some(prior);
        self
    }

    /// Installs the reuse-if-unchanged predicate (chain step 2).
    pub fn with_step_unchanged_predicate(
        mut self,
        predicate: StepUnchangedPredicate<G::Node>,
    ) -> Self {
        self.step_unchanged = Some(predicate);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Scores a complete root-to-goal path through the score cache.
    ///
    /// `Ok(None)` means the path is memoized (or was just found) to fail
    /// evaluation; the failure never crashes the rollout batch.
    fn score_complete_path(&self, path: &[G::Node]) -> Result<Option<Evaluation>> {
        if self.cache.is_unsuccessful(path) {
            tracing::debug!(len = path.len(), "skipping path known to fail evaluation");
            return Ok(None);
        }
        if let Some(evaluation) = self.cache.score_of(path) {
            tracing::trace!(score = evaluation.score, "score cache hit");
            return Ok(Some(evaluation));
        }

        match self.benchmark.evaluate(path) {
            Ok(evaluation) => {
                let newly_inserted = self.cache.try_record_score(path, evaluation);
                if newly_inserted {
                    self.cache.update_best_under(path, evaluation.score);
                    if !self.cache.mark_posted(path) {
                        return Err(OptimizerError::Internal(
                            "complete configuration posted twice".into(),
                        ));
                    }
                    tracing::info!(
                        score = evaluation.score,
                        wall_clock_ms = evaluation.wall_clock.as_millis() as u64,
                        "new solution found"
                    );
                    self.sink.post_solution(path.to_vec(), evaluation)?;
                }
                Ok(Some(evaluation))
            }
            Err(e) => {
                tracing::warn!(error = %e, "benchmark failed; memoizing path as unsuccessful");
                self.cache.mark_unsuccessful(path);
                Ok(None)
            }
        }
    }

    /// Completes `path` to a goal by randomized descent.
    ///
    /// Returns `None` when the descent hits a non-goal node with no
    /// successors; such a dead end counts as one failed sample.
    fn draw_rollout(&mut self, path: &[G::Node]) -> Option<Vec<G::Node>> {
        let mut completion = path.to_vec();
        let mut current = path.last()?.clone();
        while !self.graph.is_goal(&current) {
            let successors = self.graph.successors(&current);
            let (_, next) = successors.choose(&mut self.rng)?.clone();
            completion.push(next.clone());
            current = next;
        }
        Some(completion)
    }

    /// Chain step 4: sampling. Keeps the best (lowest) score over up to
    /// `samples` successful rollouts, bounded by `max_attempts` total tries.
    fn sample(&mut self, path: &[G::Node]) -> Result<Option<(f64, Vec<G::Node>)>> {
        let mut best: Option<(f64, Vec<G::Node>)> = None;
        let mut successes = 0usize;
        let mut attempts = 0usize;

        while successes < self.samples && attempts < self.max_attempts {
            if self.is_cancelled() {
                // Keep what the batch already found; only an empty-handed
                // interruption aborts the computation.
                if best.is_some() {
                    tracing::debug!(successes, "cancelled mid-batch, keeping best value");
                    break;
                }
                return Err(OptimizerError::Cancelled);
            }
            attempts += 1;

            let completion = match self.draw_rollout(path) {
                Some(c) => c,
                None => {
                    tracing::trace!(attempt = attempts, "rollout hit a dead end");
                    continue;
                }
            };
            match self.score_complete_path(&completion)? {
                Some(evaluation) => {
                    successes += 1;
                    let better = best
                        .as_ref()
                        .map(|(s, _)| evaluation.score < *s)
                        .unwrap_or(true);
                    if better {
                        best = Some((evaluation.score, completion));
                    }
                }
                None => {
                    tracing::debug!(attempt = attempts, "rollout sample failed evaluation");
                }
            }
        }
        tracing::debug!(attempts, successes, "finished rollout batch");
        Ok(best)
    }
}

impl<G: ConfigurationGraph> NodeEvaluator<G::Node, G::Action> for RandomRolloutEvaluator<G> {
    fn evaluate(
        &mut self,
        arena: &NodeArena<G::Node, G::Action>,
        node: NodeId,
    ) -> Result<Option<f64>> {
        if self.is_cancelled() {
            return Err(OptimizerError::Cancelled);
        }
        let search_node = arena.node(node);
        if let Some(f) = search_node.f() {
            return Ok(Some(f));
        }

        let path = arena.path_of(node);

        // Goal nodes get their exact score, not an estimate.
        if search_node.is_goal() {
            return Ok(self.score_complete_path(&path)?.map(|e| e.score));
        }

        // 1. Cheap prior.
        if let Some(prior) = &self.prior {
            if let Some(estimate) = prior(search_node.payload()) {
                tracing::trace!(estimate, "prior estimate short-circuits sampling");
                return Ok(Some(estimate));
            }
        }

        // 2. Reuse the parent's f when the step changed nothing relevant.
        if let (Some(predicate), Some(parent)) = (&self.step_unchanged, search_node.parent()) {
            let parent_node = arena.node(parent);
            if let Some(parent_f) = parent_node.f() {
                if predicate(parent_node.payload(), search_node.payload()) {
                    tracing::debug!(parent_f, "reusing parent f-value for unchanged step");
                    return Ok(Some(parent_f));
                }
            }
        }

        // 3. A cached completion subsuming this path.
        if let Some(completion) = self.cache.completion_for(&path) {
            if let Some(evaluation) = self.cache.score_of(&completion) {
                tracing::debug!(score = evaluation.score, "subsumed by cached completion");
                return Ok(Some(evaluation.score));
            }
        }

        // 4. Sampling, folded with the best score any earlier batch already
        //    observed under this path.
        let sampled = self.sample(&path)?;
        let known = self.cache.best_score_under(&path);
        match sampled {
            Some((score, completion)) => {
                self.cache.store_completion(&path, completion);
                let f = match known {
                    Some(k) if k < score => k,
                    _ => score,
                };
                self.sink
                    .post_annotation(node, "rollout_best", format!("{f}"))?;
                Ok(Some(f))
            }
            None => match known {
                Some(k) => {
                    tracing::debug!(
                        score = k,
                        "no fresh sample, using best known score under path"
                    );
                    Ok(Some(k))
                }
                None => {
                    tracing::debug!("all rollout samples failed; node has no estimate");
                    Ok(None)
                }
            },
        }
    }
}
