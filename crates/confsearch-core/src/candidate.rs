//! Solution candidates discovered during search.

use std::time::Duration;

/// An immutable record of one complete configuration found in phase 1.
///
/// Carries the in-search score and the wall-clock time the in-search
/// benchmark consumed; the latter drives the phase-2 runtime estimate.
#[derive(Debug, Clone)]
pub struct Candidate<N> {
    configuration: Vec<N>,
    score: f64,
    wall_clock: Duration,
}

impl<N> Candidate<N> {
    pub fn new(configuration: Vec<N>, score: f64, wall_clock: Duration) -> Self {
        Self {
            configuration,
            score,
            wall_clock,
        }
    }

    /// The root-to-goal path of the complete configuration.
    pub fn configuration(&self) -> &[N] {
        &self.configuration
    }

    /// Consumes the candidate and returns the configuration path.
    pub fn into_configuration(self) -> Vec<N> {
        self.configuration
    }

    /// The score observed during phase-1 search (lower is better).
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Wall-clock time of the in-search evaluation.
    pub fn wall_clock(&self) -> Duration {
        self.wall_clock
    }
}
