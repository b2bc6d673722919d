//! Memoization for rollout evaluation.
//!
//! All maps are keyed by the path value (the ordered payload sequence from
//! the root), not by node identity, so equal paths reached through different
//! tree nodes share one cache entry. Each constituent map sits behind its own
//! lock; there is no global cache lock and no eviction within a run.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Mutex;

use confsearch_core::Evaluation;

/// Shared memo state of one optimizer run.
///
/// Owned by the run instance and injected explicitly into the components
/// that need it, so independent runs can execute concurrently.
pub struct RolloutCache<N> {
    /// Partial path -> a goal path whose prefix equals the keyed path.
    completions: Mutex<HashMap<Vec<N>, Vec<N>>>,
    /// Complete path -> benchmark outcome; inserted at most once per path.
    scores: Mutex<HashMap<Vec<N>, Evaluation>>,
    /// Complete paths known to fail evaluation; never retried.
    unsuccessful: Mutex<HashSet<Vec<N>>>,
    /// Complete paths already reported as solutions.
    posted: Mutex<HashSet<Vec<N>>>,
    /// Prefix path -> best score observed under any completion of it.
    best_under_prefix: Mutex<HashMap<Vec<N>, f64>>,
}

impl<N> RolloutCache<N>
where
    N: Clone + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(HashMap::new()),
            scores: Mutex::new(HashMap::new()),
            unsuccessful: Mutex::new(HashSet::new()),
            posted: Mutex::new(HashSet::new()),
            best_under_prefix: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up a cached completion subsuming `path`.
    ///
    /// The stored completion's prefix equals the keyed path by construction
    /// (checked on insert), so a hit can be reused verbatim.
    pub fn completion_for(&self, path: &[N]) -> Option<Vec<N>> {
        self.completions.lock().unwrap().get(path).cloned()
    }

    /// Stores a goal completion for `path`.
    ///
    /// # Panics
    ///
    /// Debug-asserts the prefix invariant: `completion` must start with
    /// `path`.
    pub fn store_completion(&self, path: &[N], completion: Vec<N>) {
        debug_assert!(
            completion.len() >= path.len() && completion[..path.len()] == *path,
            "completion does not subsume its key path"
        );
        self.completions
            .lock()
            .unwrap()
            .entry(path.to_vec())
            .or_insert(completion);
    }

    /// Returns the cached benchmark outcome of a complete path.
    pub fn score_of(&self, path: &[N]) -> Option<Evaluation> {
        self.scores.lock().unwrap().get(path).copied()
    }

    /// Records the benchmark outcome of a complete path.
    ///
    /// Returns `true` iff this call newly inserted the entry; the caller
    /// gates solution reporting on this result to keep it exactly-once.
    pub fn try_record_score(&self, path: &[N], evaluation: Evaluation) -> bool {
        let mut scores = self.scores.lock().unwrap();
        if scores.contains_key(path) {
            false
        } else {
            scores.insert(path.to_vec(), evaluation);
            true
        }
    }

    /// Number of distinct complete paths scored so far.
    pub fn scored_paths(&self) -> usize {
        self.scores.lock().unwrap().len()
    }

    /// Whether this complete path is known to fail evaluation.
    pub fn is_unsuccessful(&self, path: &[N]) -> bool {
        self.unsuccessful
            .lock()
            .unwrap()
            .contains(path)
    }

    /// Memoizes a complete path as failing evaluation.
    pub fn mark_unsuccessful(&self, path: &[N]) {
        self.unsuccessful
            .lock()
            .unwrap()
            .insert(path.to_vec());
    }

    /// Number of paths memoized as unsuccessful.
    pub fn unsuccessful_paths(&self) -> usize {
        self.unsuccessful.lock().unwrap().len()
    }

    /// Marks a complete path as posted. Returns `true` iff it was not
    /// posted before; a `false` result means a re-post was attempted,
    /// which is a programming error on the caller's side.
    pub fn mark_posted(&self, path: &[N]) -> bool {
        self.posted.lock().unwrap().insert(path.to_vec())
    }

    /// Best score observed under any scored completion of `prefix`.
    pub fn best_score_under(&self, prefix: &[N]) -> Option<f64> {
        self.best_under_prefix
            .lock()
            .unwrap()
            .get(prefix)
            .copied()
    }

    /// Folds `score` into the best-known score of every prefix of
    /// `completion`, stopping early once an ancestor already knows a value
    /// at least as good.
    pub fn update_best_under(&self, completion: &[N], score: f64) {
        let mut map = self
            .best_under_prefix
            .lock()
            .unwrap();
        for end in (1..=completion.len()).rev() {
            let prefix = &completion[..end];
            match map.get(prefix) {
                Some(&known) if known <= score => break,
                _ => {
                    map.insert(prefix.to_vec(), score);
                }
            }
        }
    }
}

impl<N> Default for RolloutCache<N>
where
    N: Clone + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn eval(score: f64) -> Evaluation {
        Evaluation::new(score, Duration::from_millis(10))
    }

    #[test]
    fn score_cache_inserts_at_most_once() {
        let cache: RolloutCache<u32> = RolloutCache::new();
        let path = vec![1, 2, 4];
        assert!(cache.try_record_score(&path, eval(0.3)));
        assert!(!cache.try_record_score(&path, eval(0.9)));
        // The first value wins.
        assert_eq!(cache.score_of(&path).unwrap().score, 0.3);
        assert_eq!(cache.scored_paths(), 1);
    }

    #[test]
    fn completion_lookup_subsumes_prefix() {
        let cache: RolloutCache<u32> = RolloutCache::new();
        cache.store_completion(&[1, 2], vec![1, 2, 4]);
        assert_eq!(cache.completion_for(&[1, 2]), Some(vec![1, 2, 4]));
        assert_eq!(cache.completion_for(&[1, 3]), None);
    }

    #[test]
    fn unsuccessful_paths_are_remembered() {
        let cache: RolloutCache<u32> = RolloutCache::new();
        assert!(!cache.is_unsuccessful(&[1, 2, 4]));
        cache.mark_unsuccessful(&[1, 2, 4]);
        assert!(cache.is_unsuccessful(&[1, 2, 4]));
        assert_eq!(cache.unsuccessful_paths(), 1);
    }

    #[test]
    fn posting_is_idempotence_guarded() {
        let cache: RolloutCache<u32> = RolloutCache::new();
        assert!(cache.mark_posted(&[1, 2, 4]));
        assert!(!cache.mark_posted(&[1, 2, 4]));
    }

    #[test]
    fn best_under_prefix_tracks_minimum() {
        let cache: RolloutCache<u32> = RolloutCache::new();
        cache.update_best_under(&[1, 2, 4], 0.4);
        cache.update_best_under(&[1, 2, 5], 0.2);
        assert_eq!(cache.best_score_under(&[1, 2]), Some(0.2));
        assert_eq!(cache.best_score_under(&[1, 2, 4]), Some(0.4));
        assert_eq!(cache.best_score_under(&[1]), Some(0.2));
        // Worse scores never overwrite.
        cache.update_best_under(&[1, 2, 6], 0.9);
        assert_eq!(cache.best_score_under(&[1, 2]), Some(0.2));
    }
}
