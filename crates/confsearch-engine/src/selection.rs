//! Phase 2: finalist selection and re-validation.
//!
//! Phase 1 scores candidates inside the search, under its caches and with a
//! single benchmark run each. Phase 2 picks a small finalist pool, re-runs
//! the benchmark `repeats` times per finalist on a worker pool, and selects
//! the winner by a robustified statistic over the fresh samples.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use confsearch_core::{Candidate, Evaluator};

use crate::budget::Phase2Estimator;

/// Fresh re-validation samples of one finalist.
#[derive(Debug, Default)]
pub struct CandidateStats {
    samples: Vec<f64>,
}

impl CandidateStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, score: f64) {
        self.samples.push(score);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Nearest-rank 75th percentile.
    pub fn p75(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        let rank = (0.75 * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.max(1) - 1])
    }

    /// Selection statistic: the mean averaged with the 75th percentile, so
    /// a candidate with a good mean but a heavy upper tail loses to a
    /// consistently decent one.
    pub fn selection_score(&self) -> Option<f64> {
        Some((self.mean()? + self.p75()?) / 2.0)
    }
}

/// Picks the finalist pool out of the phase-1 candidates.
///
/// Eligible candidates lie within `margin` of the best phase-1 score. If
/// more than `k` are eligible, the best half of the slots (rounded up) goes
/// to the top scorers and the rest is drawn at random from the remaining
/// eligibles, seeded for reproducibility. With `remaining` time given, the
/// pool is then greedily trimmed from the worst end until the phase-2
/// estimate fits, but never below one finalist.
pub fn select_finalists<N: Clone>(
    candidates: &[Candidate<N>],
    k: usize,
    margin: f64,
    seed: u64,
    estimator: &Phase2Estimator,
    remaining: Option<Duration>,
) -> Vec<Candidate<N>> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut sorted: Vec<Candidate<N>> = candidates.to_vec();
    // Stable sort keeps discovery order among equal scores.
    sorted.sort_by(|a, b| a.score().total_cmp(&b.score()));

    let best_score = sorted[0].score();
    let eligible: Vec<Candidate<N>> = sorted
        .into_iter()
        .filter(|c| c.score() <= best_score + margin)
        .collect();

    let mut pool = if eligible.len() <= k {
        eligible
    } else {
        let guaranteed = k.div_ceil(2);
        let mut pool: Vec<Candidate<N>> = eligible[..guaranteed].to_vec();
        let mut rest: Vec<Candidate<N>> = eligible[guaranteed..].to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rest.shuffle(&mut rng);
        pool.extend(rest.into_iter().take(k - guaranteed));
        pool.sort_by(|a, b| a.score().total_cmp(&b.score()));
        pool
    };

    if let Some(remaining) = remaining {
        while pool.len() > 1 {
            let needed = estimator.phase2_runtime(&pool) + estimator.final_build_time(&pool[0]);
            if needed <= remaining {
                break;
            }
            let dropped = pool.pop();
            if let Some(dropped) = dropped {
                tracing::debug!(score = dropped.score(), "trimming finalist to fit budget");
            }
        }
    }
    pool
}

/// Result of phase 2.
#[derive(Debug)]
pub struct SelectionOutcome<N> {
    /// The chosen configuration.
    pub winner: Candidate<N>,
    /// Selection statistic of the winner; `None` when phase 2 produced no
    /// usable sample and the phase-1 best was kept.
    pub selection_score: Option<f64>,
    /// Re-validation runs that produced a counted sample.
    pub validated: usize,
    /// Tasks skipped because the remaining budget could not cover them.
    pub skipped: usize,
}

/// Phase-2 executor: re-validates finalists on a bounded worker pool.
pub struct FinalistSelector<N> {
    evaluator: Arc<dyn Evaluator<N>>,
    estimator: Phase2Estimator,
    num_workers: usize,
    repeats: usize,
    per_task_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl<N> FinalistSelector<N>
where
    N: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync,
{
    pub fn new(
        evaluator: Arc<dyn Evaluator<N>>,
        estimator: Phase2Estimator,
        num_workers: usize,
        repeats: usize,
        per_task_timeout: Option<Duration>,
        deadline: Option<Instant>,
    ) -> Self {
        debug_assert!(num_workers >= 1);
        debug_assert!(repeats >= 1);
        Self {
            evaluator,
            estimator,
            num_workers,
            repeats,
            per_task_timeout,
            deadline,
        }
    }

    /// Re-validates the pool and picks the winner.
    ///
    /// `fallback` is the phase-1 best; it wins whenever no finalist collects
    /// a single usable sample. A pool of one skips re-validation entirely,
    /// since no comparison can change the outcome.
    pub fn select(&self, pool: Vec<Candidate<N>>, fallback: Candidate<N>) -> SelectionOutcome<N> {
        if pool.len() <= 1 {
            let winner = pool.into_iter().next().unwrap_or(fallback);
            tracing::debug!(score = winner.score(), "single finalist, skipping re-validation");
            return SelectionOutcome {
                winner,
                selection_score: None,
                validated: 0,
                skipped: 0,
            };
        }

        let stats: Vec<Mutex<CandidateStats>> =
            pool.iter().map(|_| Mutex::new(CandidateStats::new())).collect();
        let validated = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        let (tx, rx) = crossbeam::channel::unbounded::<usize>();
        for index in 0..pool.len() {
            for _ in 0..self.repeats {
                let _ = tx.send(index);
            }
        }
        drop(tx);

        let workers = self.num_workers.min(pool.len() * self.repeats).max(1);
        tracing::info!(
            finalists = pool.len(),
            repeats = self.repeats,
            workers,
            "starting finalist re-validation"
        );
        // Scope join guarantees every task is finished or skipped before the
        // winner is read off.
        thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let pool = &pool;
                let stats = &stats;
                let validated = &validated;
                let skipped = &skipped;
                scope.spawn(move || {
                    while let Ok(index) = rx.recv() {
                        self.run_task(pool, index, stats, validated, skipped);
                    }
                });
            }
        });

        let mut winner_index = None;
        let mut winner_score = f64::INFINITY;
        for (index, entry) in stats.iter().enumerate() {
            let entry = entry.lock().unwrap();
            if let Some(score) = entry.selection_score() {
                if score < winner_score {
                    winner_score = score;
                    winner_index = Some(index);
                }
            }
        }

        let validated = validated.load(Ordering::SeqCst);
        let skipped = skipped.load(Ordering::SeqCst);
        match winner_index {
            Some(index) => {
                tracing::info!(
                    selection_score = winner_score,
                    validated,
                    skipped,
                    "finalist selected"
                );
                SelectionOutcome {
                    winner: pool[index].clone(),
                    selection_score: Some(winner_score),
                    validated,
                    skipped,
                }
            }
            None => {
                tracing::warn!(
                    skipped,
                    "no finalist collected a sample, keeping phase-1 best"
                );
                SelectionOutcome {
                    winner: fallback,
                    selection_score: None,
                    validated,
                    skipped,
                }
            }
        }
    }

    fn run_task(
        &self,
        pool: &[Candidate<N>],
        index: usize,
        stats: &[Mutex<CandidateStats>],
        validated: &AtomicUsize,
        skipped: &AtomicUsize,
    ) {
        let candidate = &pool[index];

        // Budget re-check at task start: this run plus the final build of
        // the currently best-looking finalist must still fit.
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let best_looking = self.best_looking(pool, stats);
            let needed = self.estimator.final_build_time(&pool[best_looking])
                + self.estimator.final_build_time(candidate);
            if needed >= remaining {
                tracing::debug!(
                    candidate = index,
                    remaining_ms = remaining.as_millis() as u64,
                    "skipping re-validation task, budget too tight"
                );
                skipped.fetch_add(1, Ordering::SeqCst);
                return;
            }
        }

        let started = Instant::now();
        match self.evaluator.evaluate(candidate.configuration()) {
            Ok(evaluation) => {
                let elapsed = started.elapsed();
                if let Some(timeout) = self.per_task_timeout {
                    if elapsed > timeout {
                        tracing::debug!(
                            candidate = index,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "discarding overran re-validation sample"
                        );
                        return;
                    }
                }
                if let Some(deadline) = self.deadline {
                    if Instant::now() > deadline {
                        tracing::debug!(candidate = index, "discarding sample past the deadline");
                        return;
                    }
                }
                stats[index].lock().unwrap().push(evaluation.score);
                validated.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::warn!(candidate = index, error = %e, "re-validation run failed");
            }
        }
    }

    /// Index of the finalist currently most likely to win: lowest selection
    /// statistic among sampled finalists, else the best phase-1 score.
    fn best_looking(&self, pool: &[Candidate<N>], stats: &[Mutex<CandidateStats>]) -> usize {
        let mut best = None;
        let mut best_score = f64::INFINITY;
        for (index, entry) in stats.iter().enumerate() {
            if let Some(score) = entry.lock().unwrap().selection_score() {
                if score < best_score {
                    best_score = score;
                    best = Some(index);
                }
            }
        }
        best.unwrap_or_else(|| {
            let mut index = 0;
            for (i, c) in pool.iter().enumerate() {
                if c.score() < pool[index].score() {
                    index = i;
                }
            }
            index
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedEvaluator, SequencedEvaluator};

    fn candidate(path: &[u32], score: f64, wall_clock_ms: u64) -> Candidate<u32> {
        Candidate::new(path.to_vec(), score, Duration::from_millis(wall_clock_ms))
    }

    fn estimator() -> Phase2Estimator {
        Phase2Estimator::new(2.0, 0.8, 4)
    }

    #[test]
    fn stats_mean_p75_and_selection_score() {
        let mut stats = CandidateStats::new();
        for s in [1.0, 2.0, 3.0, 4.0] {
            stats.push(s);
        }
        assert_eq!(stats.mean(), Some(2.5));
        // Nearest rank: ceil(0.75 * 4) = 3rd smallest.
        assert_eq!(stats.p75(), Some(3.0));
        assert_eq!(stats.selection_score(), Some(2.75));
    }

    #[test]
    fn stats_single_sample_degenerates_to_the_sample() {
        let mut stats = CandidateStats::new();
        stats.push(0.4);
        assert_eq!(stats.mean(), Some(0.4));
        assert_eq!(stats.p75(), Some(0.4));
        assert_eq!(stats.selection_score(), Some(0.4));
    }

    #[test]
    fn empty_stats_have_no_score() {
        let stats = CandidateStats::new();
        assert_eq!(stats.selection_score(), None);
    }

    #[test]
    fn margin_filter_excludes_distant_candidates() {
        let candidates = vec![
            candidate(&[1, 2, 4], 0.1, 10),
            candidate(&[1, 2, 5], 0.2, 10),
            candidate(&[1, 3, 6], 0.3, 10),
            candidate(&[1, 3, 7], 0.4, 10),
        ];
        let pool = select_finalists(&candidates, 4, 0.15, 0, &estimator(), None);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].score(), 0.1);
        assert_eq!(pool[1].score(), 0.2);
    }

    #[test]
    fn oversized_eligible_set_keeps_the_best_half_guaranteed() {
        let candidates: Vec<_> = (0..6)
            .map(|i| candidate(&[1, i], 0.10 + 0.001 * i as f64, 10))
            .collect();
        let pool = select_finalists(&candidates, 4, 0.5, 42, &estimator(), None);
        assert_eq!(pool.len(), 4);
        // ceil(4 / 2) = 2 guaranteed best slots.
        assert!(pool.iter().any(|c| c.score() == 0.10));
        assert!(pool.iter().any(|c| c.score() == 0.101));
        // Deterministic under the same seed.
        let again = select_finalists(&candidates, 4, 0.5, 42, &estimator(), None);
        let scores: Vec<f64> = pool.iter().map(|c| c.score()).collect();
        let again_scores: Vec<f64> = again.iter().map(|c| c.score()).collect();
        assert_eq!(scores, again_scores);
    }

    #[test]
    fn trimming_drops_the_worst_until_the_estimate_fits_but_keeps_one() {
        let candidates = vec![
            candidate(&[1, 2, 4], 0.1, 1000),
            candidate(&[1, 2, 5], 0.2, 1000),
            candidate(&[1, 3, 6], 0.3, 1000),
        ];
        let flat = Phase2Estimator::new(1.0, 1.0, 1);
        // Nothing fits; the best candidate survives regardless.
        let pool = select_finalists(
            &candidates,
            3,
            1.0,
            0,
            &flat,
            Some(Duration::from_millis(1)),
        );
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].score(), 0.1);
    }

    #[test]
    fn winner_follows_the_re_validation_statistic_not_phase1() {
        // Phase 1 preferred leaf 4, but re-validation shows leaf 5 is better.
        let evaluator = Arc::new(ScriptedEvaluator::uniform(&[(4, 0.5), (5, 0.2)]));
        let selector = FinalistSelector::new(
            evaluator,
            estimator(),
            2,
            3,
            None,
            None,
        );
        let pool = vec![
            candidate(&[1, 2, 4], 0.10, 10),
            candidate(&[1, 2, 5], 0.15, 10),
        ];
        let fallback = pool[0].clone();
        let outcome = selector.select(pool, fallback);
        assert_eq!(outcome.winner.configuration(), &[1, 2, 5]);
        assert_eq!(outcome.selection_score, Some(0.2));
        assert_eq!(outcome.validated, 6);
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn tied_means_are_split_by_the_upper_tail() {
        // Both finalists average 0.2; leaf 5 has the heavier tail and loses.
        let evaluator = Arc::new(SequencedEvaluator::new(&[
            (4, &[0.2, 0.2, 0.2, 0.2]),
            (5, &[0.1, 0.1, 0.3, 0.3]),
        ]));
        let selector = FinalistSelector::new(evaluator, estimator(), 2, 4, None, None);
        let pool = vec![
            candidate(&[1, 2, 4], 0.10, 10),
            candidate(&[1, 2, 5], 0.10, 10),
        ];
        let fallback = pool[0].clone();
        let outcome = selector.select(pool, fallback);
        // p75 of leaf 4 is 0.2 (selection score 0.2); leaf 5's is 0.3
        // (selection score 0.25).
        assert_eq!(outcome.winner.configuration(), &[1, 2, 4]);
        assert_eq!(outcome.selection_score, Some(0.2));
    }

    #[test]
    fn all_failures_fall_back_to_the_phase1_best() {
        let evaluator =
            Arc::new(ScriptedEvaluator::uniform(&[(4, 0.5), (5, 0.2)]).failing_on(&[4, 5]));
        let selector = FinalistSelector::new(evaluator, estimator(), 2, 2, None, None);
        let pool = vec![
            candidate(&[1, 2, 4], 0.10, 10),
            candidate(&[1, 2, 5], 0.15, 10),
        ];
        let fallback = pool[0].clone();
        let outcome = selector.select(pool, fallback);
        assert_eq!(outcome.winner.configuration(), &[1, 2, 4]);
        assert_eq!(outcome.selection_score, None);
        assert_eq!(outcome.validated, 0);
    }

    #[test]
    fn single_finalist_skips_re_validation() {
        let evaluator = Arc::new(ScriptedEvaluator::uniform(&[(4, 0.5)]));
        let selector =
            FinalistSelector::new(Arc::clone(&evaluator) as _, estimator(), 2, 3, None, None);
        let pool = vec![candidate(&[1, 2, 4], 0.10, 10)];
        let fallback = pool[0].clone();
        let outcome = selector.select(pool, fallback);
        assert_eq!(outcome.winner.configuration(), &[1, 2, 4]);
        assert_eq!(evaluator.total_calls(), 0);
    }

    #[test]
    fn exhausted_budget_skips_tasks_silently() {
        let evaluator = Arc::new(ScriptedEvaluator::uniform(&[(4, 0.5), (5, 0.2)]));
        let selector = FinalistSelector::new(
            Arc::clone(&evaluator) as _,
            estimator(),
            2,
            2,
            None,
            // Deadline effectively now; huge candidates cannot fit.
            Some(Instant::now()),
        );
        let pool = vec![
            candidate(&[1, 2, 4], 0.10, 60_000),
            candidate(&[1, 2, 5], 0.15, 60_000),
        ];
        let fallback = pool[0].clone();
        let outcome = selector.select(pool, fallback);
        assert_eq!(outcome.winner.configuration(), &[1, 2, 4]);
        assert_eq!(outcome.skipped, 4);
        assert_eq!(evaluator.total_calls(), 0);
    }

    #[test]
    fn overran_samples_are_discarded() {
        let evaluator = Arc::new(
            ScriptedEvaluator::uniform(&[(4, 0.5), (5, 0.2)])
                .with_real_sleep(Duration::from_millis(20)),
        );
        let selector = FinalistSelector::new(
            evaluator,
            estimator(),
            2,
            2,
            Some(Duration::from_millis(1)),
            None,
        );
        let pool = vec![
            candidate(&[1, 2, 4], 0.10, 10),
            candidate(&[1, 2, 5], 0.15, 10),
        ];
        let fallback = pool[0].clone();
        let outcome = selector.select(pool, fallback);
        assert_eq!(outcome.validated, 0);
        assert_eq!(outcome.selection_score, None);
        assert_eq!(outcome.winner.configuration(), &[1, 2, 4]);
    }
}
