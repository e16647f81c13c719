//! Periodic state snapshot and batch operation generation.

use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use tokio::sync::watch;

use corral_core::error::Result;

use crate::evacuation::EvacuationHandle;
use crate::metrics::{names, TimingGuard};
use crate::operations::{Generator, OperationQueue};

/// Drives convergence on a timer.
///
/// Ticks at the polling interval, or the shorter evacuation interval while
/// draining. Each tick generates batch operations and pushes them into the
/// queue; when the evacuation flag is set and the snapshot shows no local
/// work, the drained notifier fires.
pub struct Bulker {
    polling_interval: Duration,
    evacuation_polling_interval: Duration,
    generator: Arc<Generator>,
    queue: Arc<OperationQueue>,
    evacuation: Arc<EvacuationHandle>,
}

impl Bulker {
    /// Creates a bulker.
    #[must_use]
    pub fn new(
        polling_interval: Duration,
        evacuation_polling_interval: Duration,
        generator: Arc<Generator>,
        queue: Arc<OperationQueue>,
        evacuation: Arc<EvacuationHandle>,
    ) -> Self {
        Self {
            polling_interval,
            evacuation_polling_interval,
            generator,
            queue,
            evacuation,
        }
    }

    /// Runs until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            interval_secs = self.polling_interval.as_secs(),
            "bulker started"
        );
        loop {
            let interval = if self.evacuation.is_evacuating() {
                self.evacuation_polling_interval
            } else {
                self.polling_interval
            };
            tokio::select! {
                () = tokio::time::sleep(interval) => self.sync().await,
                _ = shutdown.changed() => {
                    tracing::info!("bulker stopped");
                    return Ok(());
                }
            }
        }
    }

    /// One snapshot-and-enqueue pass.
    pub async fn sync(&self) {
        tracing::debug!("bulk sync started");
        let _timing = TimingGuard::new(|duration| {
            histogram!(names::BULK_SYNC_DURATION_SECONDS).record(duration.as_secs_f64());
        });

        let snapshot = match self.generator.batch_operations().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!(error = %err, "failed to generate batch operations");
                return;
            }
        };

        let count = snapshot.operations.len();
        let drained = self.evacuation.is_evacuating() && snapshot.is_drained();
        for operation in snapshot.operations {
            self.queue.push(operation);
        }
        tracing::debug!(operations = count, "bulk sync done");

        if drained {
            tracing::info!("no local work remains; signalling drained");
            self.evacuation.signal_drained();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use corral_core::identity::{CellId, InstanceId, TaskId};
    use corral_core::lrp::{ActualLrp, ActualLrpState, LrpInstanceKey, LrpKey};
    use corral_core::resources::Resources;
    use corral_core::task::{Task, TaskDefinition, TaskState};
    use corral_test_utils::{FakeBbs, FakeExecutor};

    use crate::delegate::ContainerDelegate;
    use crate::evacuation::{EvacuationController, EvacuationFlag};
    use crate::processors::{LrpProcessor, TaskProcessor};

    struct Harness {
        bbs: Arc<FakeBbs>,
        executor: Arc<FakeExecutor>,
        queue: Arc<OperationQueue>,
        evacuation: Arc<EvacuationHandle>,
        controller: EvacuationController,
        bulker: Bulker,
    }

    fn harness() -> Harness {
        let bbs = Arc::new(FakeBbs::new());
        let executor = Arc::new(FakeExecutor::new(Resources::new(1024, 2048, 4)));
        let delegate = Arc::new(ContainerDelegate::new(executor.clone()));
        let flag = Arc::new(EvacuationFlag::new());
        let lrp_processor = Arc::new(LrpProcessor::new(
            CellId::new("cell-1"),
            "10.0.0.5".to_string(),
            Duration::from_secs(600),
            bbs.clone(),
            delegate.clone(),
            flag.clone(),
        ));
        let task_processor = Arc::new(TaskProcessor::new(
            CellId::new("cell-1"),
            bbs.clone(),
            executor.clone(),
            delegate,
            flag.clone(),
        ));
        let generator = Arc::new(Generator::new(
            CellId::new("cell-1"),
            bbs.clone(),
            executor.clone(),
            lrp_processor,
            task_processor,
        ));
        let queue = Arc::new(OperationQueue::new());
        let (controller, evacuation) =
            EvacuationController::new(flag.clone(), Duration::from_secs(600));
        let bulker = Bulker::new(
            Duration::from_secs(30),
            Duration::from_secs(10),
            generator,
            queue.clone(),
            evacuation.clone(),
        );
        Harness {
            bbs,
            executor,
            queue,
            evacuation,
            controller,
            bulker,
        }
    }

    async fn run_queue_until_empty(queue: &Arc<OperationQueue>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.run_worker(shutdown_rx).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.depth() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue drained");
        let _ = shutdown_tx.send(true);
        worker.await.expect("worker");
    }

    fn seed_converged_state(h: &Harness) {
        // A task running here with its container, already in sync.
        let task = Task {
            id: TaskId::new("t-1"),
            domain: "batch".to_string(),
            cell_id: Some(CellId::new("cell-1")),
            state: TaskState::Running,
            definition: TaskDefinition {
                root_fs: "preloaded:base".to_string(),
                resources: Resources::new(64, 64, 1),
                action: serde_json::Value::Null,
            },
            result: String::new(),
            failed: false,
            failure_reason: String::new(),
        };
        h.bbs.set_task(task);

        let mut tags = std::collections::BTreeMap::new();
        tags.insert(
            corral_core::container::tags::LIFECYCLE.to_string(),
            corral_core::container::tags::TASK_LIFECYCLE.to_string(),
        );
        h.executor.set_container(corral_core::container::Container {
            identity: corral_core::identity::ContainerIdentity::new("t-1"),
            state: corral_core::container::ContainerState::Running,
            tags,
            resources: Resources::new(64, 64, 1),
            ports: vec![],
            run_result: None,
        });
    }

    #[tokio::test]
    async fn two_syncs_over_identical_state_issue_no_second_mutation() {
        let h = harness();
        seed_converged_state(&h);

        h.bulker.sync().await;
        run_queue_until_empty(&h.queue).await;
        h.bbs.drain_calls();
        h.executor.drain_calls();

        h.bulker.sync().await;
        run_queue_until_empty(&h.queue).await;

        assert!(h.bbs.mutating_calls().is_empty(), "no BBS writes on second tick");
        assert!(
            h.executor.mutating_calls().is_empty(),
            "no mutating executor calls on second tick"
        );
    }

    #[tokio::test]
    async fn orphaned_lrp_container_is_deleted_within_one_sync() {
        let h = harness();
        let mut tags = std::collections::BTreeMap::new();
        tags.insert(
            corral_core::container::tags::LIFECYCLE.to_string(),
            corral_core::container::tags::LRP_LIFECYCLE.to_string(),
        );
        tags.insert(
            corral_core::container::tags::PROCESS_ID.to_string(),
            "p".to_string(),
        );
        tags.insert(
            corral_core::container::tags::INSTANCE_ID.to_string(),
            "i".to_string(),
        );
        tags.insert(corral_core::container::tags::INDEX.to_string(), "0".to_string());
        tags.insert(
            corral_core::container::tags::DOMAIN.to_string(),
            "apps".to_string(),
        );
        h.executor.set_container(corral_core::container::Container {
            identity: corral_core::identity::ContainerIdentity::new("orphan"),
            state: corral_core::container::ContainerState::Running,
            tags,
            resources: Resources::new(64, 64, 1),
            ports: vec![],
            run_result: None,
        });

        h.bulker.sync().await;
        run_queue_until_empty(&h.queue).await;

        assert!(h
            .executor
            .container(&corral_core::identity::ContainerIdentity::new("orphan"))
            .is_none());
        assert!(h.bbs.mutating_calls().is_empty(), "orphan cleanup writes nothing to the BBS");
    }

    #[tokio::test]
    async fn drained_signal_fires_once_evacuating_cell_is_empty() {
        let h = harness();
        let controller = h.controller;
        let (exit_tx, mut exit_rx) = tokio::sync::mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller_task = tokio::spawn(controller.run(shutdown_rx, exit_tx));

        h.evacuation.evacuate();

        // Non-empty cell: a running LRP row.
        h.bbs.set_actual_lrp(ActualLrp {
            key: LrpKey::new("p", 0, "apps"),
            instance: Some(LrpInstanceKey {
                instance_id: InstanceId::new("i"),
                cell_id: CellId::new("cell-1"),
            }),
            state: ActualLrpState::Running,
            net_info: None,
            crash_count: 0,
            since: Utc::now(),
        });

        h.bulker.sync().await;
        run_queue_until_empty(&h.queue).await;
        // The sync evacuated the row; the next snapshot is empty and the
        // drained signal fires.
        h.bulker.sync().await;

        let group = h.bbs.group(&corral_core::identity::ProcessId::new("p"), 0);
        assert!(group.expect("group").evacuating.is_some());

        let request = tokio::time::timeout(Duration::from_secs(5), exit_rx.recv())
            .await
            .expect("exit requested")
            .expect("exit request");
        assert!(matches!(
            request,
            crate::supervisor::ExitRequest::Evacuated {
                outcome: crate::evacuation::EvacuationOutcome::Drained
            }
        ));
        controller_task.await.expect("join").expect("controller");
    }
}
