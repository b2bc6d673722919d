//! Search events and listeners.
//!
//! Solution reporting runs over a bounded channel: producers are the
//! scheduler/evaluator (on the phase-1 thread), the consumer is the run
//! driver, and exactly-once emission is guaranteed by gating on the score
//! cache's newly-inserted result before anything is sent.

use std::fmt::Debug;
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use confsearch_core::{Evaluation, OptimizerError, Result};

use crate::arena::NodeId;

/// Capacity of the solution event channel. The channel is drained between
/// scheduler steps, so this only has to cover the solutions discovered
/// within a single step.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An event emitted by the phase-1 search.
#[derive(Debug, Clone)]
pub enum SearchEvent<N> {
    /// A complete configuration was scored successfully for the first time.
    SolutionFound {
        path: Vec<N>,
        evaluation: Evaluation,
    },
    /// Diagnostic annotation attached to a node.
    NodeAnnotated {
        node: NodeId,
        key: &'static str,
        value: String,
    },
}

/// Sending half handed to the evaluator/scheduler.
pub struct EventSink<N> {
    tx: Sender<SearchEvent<N>>,
}

impl<N> Clone for EventSink<N> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<N: Debug> EventSink<N> {
    /// Posts a solution event.
    ///
    /// The producer shares the phase-1 thread with the consumer, so a full
    /// channel cannot be waited out; overflow is surfaced as an internal
    /// error instead of blocking.
    pub fn post_solution(&self, path: Vec<N>, evaluation: Evaluation) -> Result<()> {
        self.post(SearchEvent::SolutionFound { path, evaluation })
    }

    /// Posts a node annotation event.
    pub fn post_annotation(&self, node: NodeId, key: &'static str, value: String) -> Result<()> {
        self.post(SearchEvent::NodeAnnotated { node, key, value })
    }

    fn post(&self, event: SearchEvent<N>) -> Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(OptimizerError::Internal(
                "search event channel overflow".into(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(OptimizerError::Internal(
                "search event channel disconnected".into(),
            )),
        }
    }
}

/// Creates the bounded event channel for one run.
pub fn event_channel<N>() -> (EventSink<N>, Receiver<SearchEvent<N>>) {
    let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
    (EventSink { tx }, rx)
}

/// Observer of search progress.
///
/// All methods have no-op defaults; implement only what you need.
/// Listeners are invoked synchronously by the run driver in registration
/// order.
pub trait SearchListener<N>: Send + Sync {
    /// Called exactly once per distinct complete configuration, at its
    /// first successful scoring.
    fn on_solution_found(&self, _path: &[N], _score: f64) {}

    /// Called for diagnostic node annotations.
    fn on_node_annotated(&self, _node: NodeId, _key: &str, _value: &str) {}
}

/// A listener that counts events, for tests and statistics.
#[derive(Debug, Default)]
pub struct CountingListener {
    solutions: std::sync::atomic::AtomicUsize,
    annotations: std::sync::atomic::AtomicUsize,
}

impl CountingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn solution_count(&self) -> usize {
        self.solutions.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl<N> SearchListener<N> for CountingListener {
    fn on_solution_found(&self, _path: &[N], _score: f64) {
        self.solutions
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn on_node_annotated(&self, _node: NodeId, _key: &str, _value: &str) {
        self.annotations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn events_flow_through_the_channel() {
        let (sink, rx) = event_channel::<u32>();
        sink.post_solution(vec![1, 2], Evaluation::new(0.5, Duration::from_millis(1)))
            .unwrap();
        match rx.try_recv().unwrap() {
            SearchEvent::SolutionFound { path, evaluation } => {
                assert_eq!(path, vec![1, 2]);
                assert_eq!(evaluation.score, 0.5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn overflow_is_an_internal_error() {
        let (sink, _rx) = event_channel::<u32>();
        for _ in 0..EVENT_CHANNEL_CAPACITY {
            sink.post_solution(vec![1], Evaluation::new(0.0, Duration::ZERO))
                .unwrap();
        }
        let err = sink
            .post_solution(vec![1], Evaluation::new(0.0, Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, OptimizerError::Internal(_)));
    }

    #[test]
    fn counting_listener_counts() {
        let mut arena: crate::arena::NodeArena<u32, ()> = crate::arena::NodeArena::new();
        let root = arena.insert_root(1, false);
        let listener = CountingListener::new();
        SearchListener::<u32>::on_solution_found(&*listener, &[1], 0.1);
        SearchListener::<u32>::on_node_annotated(&*listener, root, "k", "v");
        assert_eq!(listener.solution_count(), 1);
        assert_eq!(listener.annotation_count(), 1);
    }
}
