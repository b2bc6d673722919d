//! Time budget control for the two-phase run.
//!
//! Phase 1 must leave enough of the global budget for phase 2 to re-validate
//! a finalist pool and build the winner once more. A watchdog thread polls
//! the clock and the current candidate pool and flips the shared cancel flag
//! when continuing phase 1 would starve phase 2.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use confsearch_core::Candidate;

use crate::selection::select_finalists;

/// Runtime model of phase 2.
///
/// Re-validation runs outside the search caches and under more repeats, so
/// every observed phase-1 wall clock is inflated by the blowup factor
/// (squared for the pool, where both the repeat count and the per-run cost
/// grow) and discounted by the cache factor for work the caches still cover.
#[derive(Debug, Clone, Copy)]
pub struct Phase2Estimator {
    blowup_factor: f64,
    cache_factor: f64,
    num_workers: usize,
}

impl Phase2Estimator {
    pub fn new(blowup_factor: f64, cache_factor: f64, num_workers: usize) -> Self {
        debug_assert!(blowup_factor >= 1.0);
        debug_assert!((0.0..=1.0).contains(&cache_factor));
        Self {
            blowup_factor,
            cache_factor,
            num_workers,
        }
    }

    /// Expected wall clock of re-validating the whole pool, accounting for
    /// worker parallelism.
    pub fn phase2_runtime<N>(&self, pool: &[Candidate<N>]) -> Duration {
        if pool.is_empty() {
            return Duration::ZERO;
        }
        let total: f64 = pool.iter().map(|c| c.wall_clock().as_secs_f64()).sum();
        let effective_workers = self.num_workers.min(pool.len()).max(1) as f64;
        Duration::from_secs_f64(
            total * self.blowup_factor * self.blowup_factor * self.cache_factor
                / effective_workers,
        )
    }

    /// Expected wall clock of one final, cache-cold build of a candidate.
    pub fn final_build_time<N>(&self, candidate: &Candidate<N>) -> Duration {
        candidate.wall_clock().mul_f64(self.blowup_factor)
    }
}

/// Watchdog that stops phase 1 in time for phase 2.
///
/// The controller only ever writes the shared cancel flag; it never touches
/// the scheduler. It exits either after triggering or once someone else set
/// the flag (e.g. the search exhausted the graph and the driver shut the
/// run down).
pub struct PhaseBudgetController<N> {
    deadline: Instant,
    safety_margin: Duration,
    poll_interval: Duration,
    estimator: Phase2Estimator,
    selection_pool_size: usize,
    selection_margin: f64,
    selection_seed: u64,
    candidates: Arc<Mutex<Vec<Candidate<N>>>>,
    cancel: Arc<AtomicBool>,
}

impl<N> PhaseBudgetController<N>
where
    N: Clone + Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deadline: Instant,
        safety_margin: Duration,
        poll_interval: Duration,
        estimator: Phase2Estimator,
        selection_pool_size: usize,
        selection_margin: f64,
        selection_seed: u64,
        candidates: Arc<Mutex<Vec<Candidate<N>>>>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            deadline,
            safety_margin,
            poll_interval,
            estimator,
            selection_pool_size,
            selection_margin,
            selection_seed,
            candidates,
            cancel,
        }
    }

    /// Spawns the watchdog thread.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(self) {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::debug!("budget watchdog exiting, run already stopping");
                return;
            }
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if self.should_stop(remaining) {
                tracing::info!(
                    remaining_ms = remaining.as_millis() as u64,
                    "phase-1 budget exhausted, stopping search"
                );
                self.cancel.store(true, Ordering::SeqCst);
                return;
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Two independent stop conditions: the unconditional safety-margin
    /// floor, and the runtime model saying the rest of phase 2 no longer
    /// fits into `remaining`.
    fn should_stop(&self, remaining: Duration) -> bool {
        if remaining <= self.safety_margin {
            return true;
        }
        let pool = self.candidates.lock().unwrap().clone();
        if pool.is_empty() {
            // Nothing to validate yet; let the search keep going until it
            // finds something or the margin hits.
            return false;
        }
        // The untrimmed finalist pool: what phase 2 would have to handle if
        // it started now.
        let finalists = select_finalists(
            &pool,
            self.selection_pool_size,
            self.selection_margin,
            self.selection_seed,
            &self.estimator,
            None,
        );
        let best = finalists
            .iter()
            .min_by(|a, b| a.score().total_cmp(&b.score()));
        let needed = self.estimator.phase2_runtime(&finalists)
            + best
                .map(|c| self.estimator.final_build_time(c))
                .unwrap_or(Duration::ZERO);
        needed > remaining
    }
}
