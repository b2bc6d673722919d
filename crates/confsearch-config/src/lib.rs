//! Configuration system for the confsearch optimizer.
//!
//! Load optimizer knobs from TOML or YAML files to control sampling,
//! deadlines, and the selection phase without code changes.
//!
//! # Examples
//!
//! Load configuration from a TOML string:
//!
//! ```
//! use confsearch_config::OptimizerConfig;
//! use std::time::Duration;
//!
//! let config = OptimizerConfig::from_toml_str(r#"
//!     samples = 3
//!     num_workers = 4
//!     selection_pool_size = 10
//!     global_deadline_ms = 60000
//! "#).unwrap();
//!
//! assert_eq!(config.samples, 3);
//! assert_eq!(config.global_deadline(), Some(Duration::from_secs(60)));
//! ```
//!
//! Use the defaults when a file is missing:
//!
//! ```
//! use confsearch_config::OptimizerConfig;
//!
//! let config = OptimizerConfig::load("optimizer.toml").unwrap_or_default();
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// All tuning knobs of a two-phase optimizer run.
///
/// Every knob has a fixed effect; see the field docs. Time quantities are
/// configured in milliseconds and exposed as [`Duration`] accessors.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct OptimizerConfig {
    /// Successful rollouts drawn per f-value computation.
    pub samples: usize,

    /// Upper bound on total rollout attempts (successful or failed) per
    /// f-value computation. `0` derives the bound as `2 * samples`.
    pub max_sample_attempts: usize,

    /// Size of the phase-2 worker pool.
    pub num_workers: usize,

    /// Ensemble size `k` for the selection phase.
    pub selection_pool_size: usize,

    /// Score tolerance for inclusion in the finalist pool: candidates whose
    /// in-search score is within this margin of the best are eligible.
    pub selection_margin: f64,

    /// Expected runtime growth from partial-data to full-data evaluation.
    pub blowup_factor: f64,

    /// Multiplier below 1 modeling reuse savings across phase-2 repetitions.
    pub cache_factor: f64,

    /// Hard wall-clock deadline for the whole run. `None` disables the
    /// budget watchdog and phase 1 runs until graph exhaustion.
    pub global_deadline_ms: Option<u64>,

    /// Phase 1 is force-stopped no later than this long before the deadline.
    pub safety_margin_ms: u64,

    /// Per phase-2 task timeout; results arriving later are abandoned.
    pub per_task_timeout_ms: Option<u64>,

    /// Phase-2 evaluation repetitions per finalist.
    pub repeats_per_candidate: usize,

    /// Poll interval of the phase budget watchdog.
    pub budget_poll_interval_ms: u64,

    /// Random seed for reproducible rollouts and finalist sampling.
    pub random_seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            samples: 10,
            max_sample_attempts: 0,
            num_workers: 4,
            selection_pool_size: 10,
            selection_margin: 0.03,
            blowup_factor: 2.0,
            cache_factor: 0.8,
            global_deadline_ms: None,
            safety_margin_ms: 2_000,
            per_task_timeout_ms: None,
            repeats_per_candidate: 3,
            budget_poll_interval_ms: 100,
            random_seed: None,
        }
    }
}

impl OptimizerConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist or contains invalid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)
    }

    /// Loads configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Sets the global deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.global_deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    /// Sets the random seed.
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Sets the rollout sample budget.
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    /// Returns the hard deadline, if configured.
    pub fn global_deadline(&self) -> Option<Duration> {
        self.global_deadline_ms.map(Duration::from_millis)
    }

    /// Returns the safety margin before the deadline.
    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }

    /// Returns the per phase-2 task timeout, if configured.
    pub fn per_task_timeout(&self) -> Option<Duration> {
        self.per_task_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the watchdog poll interval.
    pub fn budget_poll_interval(&self) -> Duration {
        Duration::from_millis(self.budget_poll_interval_ms)
    }

    /// The effective rollout attempt bound (`max_sample_attempts`, or
    /// `2 * samples` when left at `0`).
    pub fn effective_max_sample_attempts(&self) -> usize {
        if self.max_sample_attempts == 0 {
            self.samples * 2
        } else {
            self.max_sample_attempts
        }
    }

    /// Checks that all knobs are in their valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending knob.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples == 0 {
            return Err(ConfigError::Invalid("samples must be at least 1".into()));
        }
        if self.max_sample_attempts != 0 && self.max_sample_attempts < self.samples {
            return Err(ConfigError::Invalid(
                "max_sample_attempts must be 0 (derived) or >= samples".into(),
            ));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid(
                "num_workers must be at least 1".into(),
            ));
        }
        if self.selection_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "selection_pool_size must be at least 1".into(),
            ));
        }
        if !self.selection_margin.is_finite() || self.selection_margin < 0.0 {
            return Err(ConfigError::Invalid(
                "selection_margin must be a finite non-negative number".into(),
            ));
        }
        if !self.blowup_factor.is_finite() || self.blowup_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "blowup_factor must be finite and at least 1.0".into(),
            ));
        }
        if !self.cache_factor.is_finite() || self.cache_factor <= 0.0 || self.cache_factor > 1.0 {
            return Err(ConfigError::Invalid(
                "cache_factor must be in (0.0, 1.0]".into(),
            ));
        }
        if self.repeats_per_candidate == 0 {
            return Err(ConfigError::Invalid(
                "repeats_per_candidate must be at least 1".into(),
            ));
        }
        if self.budget_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "budget_poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
