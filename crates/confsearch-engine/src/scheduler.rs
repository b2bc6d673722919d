//! Best-first expansion over the configuration graph.
//!
//! The scheduler owns the node arena and the OPEN heap. Nodes are expanded
//! in ascending f-order; ties fall back to insertion order, so equal-f nodes
//! come out in the order they were generated. Children whose evaluator
//! returns no estimate are dropped as dead branches and never enter OPEN.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use confsearch_core::{ConfigurationGraph, OptimizerError, Result};

use crate::arena::{NodeArena, NodeId};
use crate::rollout::NodeEvaluator;

/// Lifecycle of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, root not yet evaluated.
    Created,
    /// Stepping.
    Active,
    /// OPEN ran empty (graph exhausted) or a step failed; terminal either
    /// way.
    Terminated,
    /// Stopped by the cancel flag.
    Cancelled,
}

/// Outcome of a single scheduler step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A non-goal node was expanded.
    Expanded(NodeId),
    /// A goal node reached the top of OPEN. It was already scored when it
    /// was generated and is not expanded further.
    GoalReached(NodeId),
    /// OPEN is empty; nothing left to do.
    Exhausted,
}

/// Heap entry ordered for a min-heap on f, then insertion order.
struct OpenEntry {
    f: f64,
    seq: u64,
    node: NodeId,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest f (and,
        // among equals, the earliest-generated node) on top.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Anytime best-first search driven one step at a time.
pub struct BestFirstScheduler<G: ConfigurationGraph, V> {
    graph: Arc<G>,
    evaluator: V,
    arena: NodeArena<G::Node, G::Action>,
    open: BinaryHeap<OpenEntry>,
    next_seq: u64,
    cancel: Arc<AtomicBool>,
    state: SchedulerState,
    expanded: usize,
}

impl<G, V> BestFirstScheduler<G, V>
where
    G: ConfigurationGraph,
    V: NodeEvaluator<G::Node, G::Action>,
{
    pub fn new(graph: Arc<G>, evaluator: V, cancel: Arc<AtomicBool>) -> Self {
        Self {
            graph,
            evaluator,
            arena: NodeArena::new(),
            open: BinaryHeap::new(),
            next_seq: 0,
            cancel,
            state: SchedulerState::Created,
            expanded: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Nodes expanded so far.
    pub fn expanded(&self) -> usize {
        self.expanded
    }

    pub fn arena(&self) -> &NodeArena<G::Node, G::Action> {
        &self.arena
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(AtomicOrdering::SeqCst)
    }

    /// Terminal state for a failed step: only a cooperative stop counts as
    /// cancellation, anything else is an ordinary terminal failure.
    fn mark_failed(&mut self, error: &OptimizerError) {
        self.state = match error {
            OptimizerError::Cancelled => SchedulerState::Cancelled,
            _ => SchedulerState::Terminated,
        };
    }

    fn push_open(&mut self, node: NodeId, f: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.open.push(OpenEntry { f, seq, node });
    }

    /// Evaluates `node` and, if it has an estimate, memoizes the f-value and
    /// enqueues it.
    fn admit(&mut self, node: NodeId) -> Result<()> {
        match self.evaluator.evaluate(&self.arena, node)? {
            Some(f) => {
                self.arena.set_f(node, f);
                self.push_open(node, f);
            }
            None => {
                tracing::debug!(node = node.index(), "dropping branch without estimate");
            }
        }
        Ok(())
    }

    fn bootstrap(&mut self) -> Result<()> {
        let payload = self.graph.root();
        let is_goal = self.graph.is_goal(&payload);
        let root = self.arena.insert_root(payload, is_goal);
        self.admit(root)?;
        self.state = SchedulerState::Active;
        Ok(())
    }

    /// Runs one expansion step.
    ///
    /// Returns [`OptimizerError::Cancelled`] when the shared cancel flag is
    /// set; the scheduler is then in the `Cancelled` state and must not be
    /// stepped again.
    pub fn step(&mut self) -> Result<StepOutcome> {
        match self.state {
            SchedulerState::Terminated | SchedulerState::Cancelled => {
                return Err(OptimizerError::InvalidState(
                    "scheduler stepped after termination".into(),
                ));
            }
            SchedulerState::Created => {
                if let Err(e) = self.bootstrap() {
                    self.mark_failed(&e);
                    return Err(e);
                }
            }
            SchedulerState::Active => {}
        }

        if self.is_cancelled() {
            self.state = SchedulerState::Cancelled;
            return Err(OptimizerError::Cancelled);
        }

        let entry = match self.open.pop() {
            Some(entry) => entry,
            None => {
                tracing::debug!(expanded = self.expanded, "search space exhausted");
                self.state = SchedulerState::Terminated;
                return Ok(StepOutcome::Exhausted);
            }
        };

        if self.arena.node(entry.node).is_goal() {
            // Scored when generated; never expanded.
            return Ok(StepOutcome::GoalReached(entry.node));
        }

        let payload = self.arena.node(entry.node).payload().clone();
        let successors = self.graph.successors(&payload);
        tracing::trace!(
            node = entry.node.index(),
            f = entry.f,
            children = successors.len(),
            "expanding node"
        );
        for (action, child_payload) in successors {
            let is_goal = self.graph.is_goal(&child_payload);
            let child = self
                .arena
                .insert_child(entry.node, action, child_payload, is_goal);
            if let Err(e) = self.admit(child) {
                self.mark_failed(&e);
                return Err(e);
            }
        }
        self.expanded += 1;
        Ok(StepOutcome::Expanded(entry.node))
    }
}
