//! Shared fixtures: tiny deterministic graphs and scripted benchmarks.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use confsearch_core::{ConfigurationGraph, Evaluation, EvaluationError, Evaluator};

/// Complete binary tree with heap-indexed nodes: root is `1`, the children
/// of `n` are `2n` and `2n + 1`, and every node at `depth` is a goal leaf.
pub struct BinaryTreeGraph {
    depth: u32,
}

impl BinaryTreeGraph {
    pub fn new(depth: u32) -> Self {
        Self { depth }
    }
}

impl ConfigurationGraph for BinaryTreeGraph {
    type Node = u32;
    type Action = &'static str;

    fn root(&self) -> u32 {
        1
    }

    fn successors(&self, node: &u32) -> Vec<(&'static str, u32)> {
        if self.is_goal(node) {
            Vec::new()
        } else {
            vec![("left", node * 2), ("right", node * 2 + 1)]
        }
    }

    fn is_goal(&self, node: &u32) -> bool {
        *node >= 1 << self.depth
    }
}

/// Root `1` with a dead-end child `2` (no successors, not a goal) and a goal
/// child `3`.
pub struct DeadEndGraph;

impl ConfigurationGraph for DeadEndGraph {
    type Node = u32;
    type Action = &'static str;

    fn root(&self) -> u32 {
        1
    }

    fn successors(&self, node: &u32) -> Vec<(&'static str, u32)> {
        match node {
            1 => vec![("dead", 2), ("goal", 3)],
            _ => Vec::new(),
        }
    }

    fn is_goal(&self, node: &u32) -> bool {
        *node == 3
    }
}

/// A single chain `0 -> 1 -> ... -> len`; the only goal is `len`.
pub struct ChainGraph {
    len: u32,
}

impl ChainGraph {
    pub fn new(len: u32) -> Self {
        Self { len }
    }
}

impl ConfigurationGraph for ChainGraph {
    type Node = u32;
    type Action = &'static str;

    fn root(&self) -> u32 {
        0
    }

    fn successors(&self, node: &u32) -> Vec<(&'static str, u32)> {
        if *node < self.len {
            vec![("step", node + 1)]
        } else {
            Vec::new()
        }
    }

    fn is_goal(&self, node: &u32) -> bool {
        *node == self.len
    }
}

/// Benchmark stub keyed by the goal leaf (last path element).
///
/// Counts every call per distinct path so tests can assert the at-most-once
/// evaluation guarantee.
pub struct ScriptedEvaluator {
    scores: HashMap<u32, f64>,
    failing: HashSet<u32>,
    reported_wall_clock: Duration,
    real_sleep: Option<Duration>,
    calls: Mutex<HashMap<Vec<u32>, usize>>,
}

impl ScriptedEvaluator {
    /// Each listed leaf always evaluates to its fixed score.
    pub fn uniform(leaf_scores: &[(u32, f64)]) -> Self {
        Self {
            scores: leaf_scores.iter().copied().collect(),
            failing: HashSet::new(),
            reported_wall_clock: Duration::from_millis(10),
            real_sleep: None,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// The listed leaves fail every evaluation.
    pub fn failing_on(mut self, leaves: &[u32]) -> Self {
        self.failing.extend(leaves.iter().copied());
        self
    }

    /// Sets the wall clock reported in every outcome (no actual sleeping).
    pub fn with_reported_wall_clock(mut self, wall_clock: Duration) -> Self {
        self.reported_wall_clock = wall_clock;
        self
    }

    /// Makes every evaluation actually block for `latency`, for timeout and
    /// deadline tests.
    pub fn with_real_sleep(mut self, latency: Duration) -> Self {
        self.real_sleep = Some(latency);
        self
    }

    pub fn calls_for(&self, path: &[u32]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_calls_per_path(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }
}

/// Benchmark stub that replays a fixed score sequence per goal leaf, for
/// tests where repeated evaluations of one configuration must differ.
pub struct SequencedEvaluator {
    scripts: HashMap<u32, Vec<f64>>,
    calls: Mutex<HashMap<u32, usize>>,
}

impl SequencedEvaluator {
    pub fn new(scripts: &[(u32, &[f64])]) -> Self {
        Self {
            scripts: scripts
                .iter()
                .map(|(leaf, scores)| (*leaf, scores.to_vec()))
                .collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl Evaluator<u32> for SequencedEvaluator {
    fn evaluate(&self, configuration: &[u32]) -> Result<Evaluation, EvaluationError> {
        let leaf = configuration
            .last()
            .ok_or_else(|| EvaluationError::new("empty configuration"))?;
        let script = self
            .scripts
            .get(leaf)
            .ok_or_else(|| EvaluationError::new(format!("no script for leaf {leaf}")))?;
        let mut calls = self.calls.lock().unwrap();
        let index = calls.entry(*leaf).or_insert(0);
        let score = script[*index % script.len()];
        *index += 1;
        Ok(Evaluation::new(score, Duration::from_millis(10)))
    }
}

impl Evaluator<u32> for ScriptedEvaluator {
    fn evaluate(&self, configuration: &[u32]) -> Result<Evaluation, EvaluationError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(configuration.to_vec())
            .or_insert(0) += 1;

        if let Some(latency) = self.real_sleep {
            std::thread::sleep(latency);
        }

        let leaf = configuration
            .last()
            .ok_or_else(|| EvaluationError::new("empty configuration"))?;
        if self.failing.contains(leaf) {
            return Err(EvaluationError::new(format!("scripted failure for {leaf}")));
        }
        let score = self
            .scores
            .get(leaf)
            .copied()
            .ok_or_else(|| EvaluationError::new(format!("no script for leaf {leaf}")))?;
        Ok(Evaluation::new(score, self.reported_wall_clock))
    }
}
