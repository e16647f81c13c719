//! Keyed reconciliation operations.
//!
//! An operation pairs a container identity (its queue key) with an execute
//! behavior. The queue never inspects the payload; processors fetch fresh
//! state when the operation runs, so an operation carries only routing
//! data. Operations never raise: failures are logged and the next bulker
//! cycle re-derives truth.

mod generator;
mod queue;

pub use generator::{BatchSnapshot, Generator};
pub use queue::OperationQueue;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use corral_core::identity::{ContainerIdentity, ProcessId, TaskId};
use corral_core::observability::operation_span;
use corral_core::BbsClient;

use crate::delegate::ContainerDelegate;
use crate::processors::{LrpProcessor, TaskProcessor};

/// A keyed reconciliation unit. At most one operation per key is in flight
/// at any instant; the queue enforces that.
#[async_trait]
pub trait Operation: Send + Sync {
    /// The container identity this operation serializes on.
    fn key(&self) -> &ContainerIdentity;

    /// Runs the operation to completion. Never raises.
    async fn execute(self: Box<Self>);
}

/// Boxed operation as stored by the queue.
pub type BoxedOperation = Box<dyn Operation>;

/// Reconciles one LRP slot attempt.
pub struct LrpOperation {
    identity: ContainerIdentity,
    process_id: ProcessId,
    index: i32,
    processor: Arc<LrpProcessor>,
}

impl LrpOperation {
    /// Creates an operation for the given slot attempt.
    #[must_use]
    pub fn new(
        identity: ContainerIdentity,
        process_id: ProcessId,
        index: i32,
        processor: Arc<LrpProcessor>,
    ) -> Self {
        Self {
            identity,
            process_id,
            index,
            processor,
        }
    }
}

#[async_trait]
impl Operation for LrpOperation {
    fn key(&self) -> &ContainerIdentity {
        &self.identity
    }

    async fn execute(self: Box<Self>) {
        let span = operation_span("lrp", self.identity.as_str());
        async move {
            if let Err(err) = self
                .processor
                .process(&self.identity, &self.process_id, self.index)
                .await
            {
                tracing::error!(identity = %self.identity, error = %err, "lrp operation failed");
            }
        }
        .instrument(span)
        .await;
    }
}

/// Reconciles one task.
pub struct TaskOperation {
    identity: ContainerIdentity,
    task_id: TaskId,
    processor: Arc<TaskProcessor>,
}

impl TaskOperation {
    /// Creates an operation for the given task.
    #[must_use]
    pub fn new(task_id: TaskId, processor: Arc<TaskProcessor>) -> Self {
        Self {
            identity: ContainerIdentity::for_task(&task_id),
            task_id,
            processor,
        }
    }
}

#[async_trait]
impl Operation for TaskOperation {
    fn key(&self) -> &ContainerIdentity {
        &self.identity
    }

    async fn execute(self: Box<Self>) {
        let span = operation_span("task", self.identity.as_str());
        async move {
            if let Err(err) = self.processor.process(&self.task_id).await {
                tracing::error!(task_id = %self.task_id, error = %err, "task operation failed");
            }
        }
        .instrument(span)
        .await;
    }
}

/// Stops one LRP instance's container gracefully.
pub struct StopLrpInstanceOperation {
    identity: ContainerIdentity,
    delegate: Arc<ContainerDelegate>,
}

impl StopLrpInstanceOperation {
    /// Creates a stop operation for the given instance container.
    #[must_use]
    pub fn new(identity: ContainerIdentity, delegate: Arc<ContainerDelegate>) -> Self {
        Self { identity, delegate }
    }
}

#[async_trait]
impl Operation for StopLrpInstanceOperation {
    fn key(&self) -> &ContainerIdentity {
        &self.identity
    }

    async fn execute(self: Box<Self>) {
        let span = operation_span("stop-lrp", self.identity.as_str());
        async move {
            match self.delegate.stop_container(&self.identity).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    tracing::info!(identity = %self.identity, "container already gone");
                }
                Err(err) => {
                    tracing::error!(identity = %self.identity, error = %err, "stop operation failed");
                }
            }
        }
        .instrument(span)
        .await;
    }
}

/// Cancels one task in the BBS and destroys its container.
pub struct CancelTaskOperation {
    identity: ContainerIdentity,
    task_id: TaskId,
    bbs: Arc<dyn BbsClient>,
    delegate: Arc<ContainerDelegate>,
}

impl CancelTaskOperation {
    /// Creates a cancel operation for the given task.
    #[must_use]
    pub fn new(task_id: TaskId, bbs: Arc<dyn BbsClient>, delegate: Arc<ContainerDelegate>) -> Self {
        Self {
            identity: ContainerIdentity::for_task(&task_id),
            task_id,
            bbs,
            delegate,
        }
    }
}

#[async_trait]
impl Operation for CancelTaskOperation {
    fn key(&self) -> &ContainerIdentity {
        &self.identity
    }

    async fn execute(self: Box<Self>) {
        let span = operation_span("cancel-task", self.identity.as_str());
        async move {
            match self.bbs.cancel_task(&self.task_id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    tracing::error!(task_id = %self.task_id, error = %err, "cancel request failed");
                    return;
                }
            }
            if let Err(err) = self.delegate.delete_container(&self.identity).await {
                tracing::error!(task_id = %self.task_id, error = %err, "cancel cleanup failed");
            }
        }
        .instrument(span)
        .await;
    }
}
