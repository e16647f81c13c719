//! Per-key sliding operation queue.
//!
//! Slot depth is 1: a pending operation not yet executing is *replaced* by
//! a newer push with the same key (the newer snapshot subsumes the older);
//! while a key executes, at most one successor waits. Convergence is
//! idempotent, so coalescing redundant snapshots is correct and reduces
//! load, and per-key serialization prevents races between the bulker's
//! stale snapshot and an event-driven reaction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use metrics::{counter, gauge};
use tokio::sync::{watch, Notify};

use crate::metrics::names;

use super::BoxedOperation;

#[derive(Default)]
struct QueueState {
    /// Operations not yet started, newest per key.
    pending: HashMap<String, BoxedOperation>,
    /// Keys eligible to start, in arrival order.
    ready: VecDeque<String>,
    /// Keys currently executing.
    executing: HashSet<String>,
}

impl QueueState {
    fn depth(&self) -> usize {
        self.pending.len() + self.executing.len()
    }
}

/// The serialization point for all mutating reconciliation logic.
pub struct OperationQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }
}

impl OperationQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepts an operation without blocking. A pending operation with the
    /// same key is replaced; an executing key holds the newcomer until its
    /// slot frees.
    pub fn push(&self, operation: BoxedOperation) {
        let key = operation.key().as_str().to_string();
        {
            let mut state = self.lock();
            let replaced = state.pending.insert(key.clone(), operation).is_some();
            if replaced {
                counter!(names::OPERATIONS_REPLACED_TOTAL).increment(1);
            } else if !state.executing.contains(&key) {
                state.ready.push_back(key);
            }
            counter!(names::OPERATIONS_ENQUEUED_TOTAL).increment(1);
            set_depth_gauge(&state);
        }
        self.notify.notify_one();
    }

    /// Number of operations pending or executing.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().depth()
    }

    /// Runs one worker until shutdown. Workers drain eligible keys, execute
    /// each operation to completion, and free the key's slot only when the
    /// operation returns.
    pub async fn run_worker(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            if let Some((key, operation)) = self.claim_next() {
                operation.execute().await;
                counter!(names::OPERATIONS_COMPLETED_TOTAL).increment(1);
                self.finish(&key);
                continue;
            }
            tokio::select! {
                () = self.notify.notified() => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    fn claim_next(&self) -> Option<(String, BoxedOperation)> {
        let mut state = self.lock();
        while let Some(key) = state.ready.pop_front() {
            if let Some(operation) = state.pending.remove(&key) {
                state.executing.insert(key.clone());
                set_depth_gauge(&state);
                return Some((key, operation));
            }
        }
        None
    }

    fn finish(&self, key: &str) {
        let mut state = self.lock();
        state.executing.remove(key);
        if state.pending.contains_key(key) {
            state.ready.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
            return;
        }
        set_depth_gauge(&state);
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_depth_gauge(state: &QueueState) {
    gauge!(names::OPERATION_QUEUE_DEPTH).set(state.depth() as f64);
}
