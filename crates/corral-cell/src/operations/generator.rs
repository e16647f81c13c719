//! Operation generation from state snapshots and executor events.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use metrics::gauge;

use corral_core::container::tags;
use corral_core::error::Result;
use corral_core::executor::ContainerEvent;
use corral_core::identity::{CellId, ContainerIdentity, ProcessId, TaskId};
use corral_core::{BbsClient, ExecutorClient};

use crate::processors::{LrpProcessor, TaskProcessor};

use super::{BoxedOperation, LrpOperation, TaskOperation};

/// One bulker pass: the operations to enqueue plus the inventory counts
/// the evacuation controller drains on.
pub struct BatchSnapshot {
    /// One operation per distinct container identity.
    pub operations: Vec<BoxedOperation>,
    /// LRP work still tied to this cell: local containers plus instance
    /// rows. Evacuating shadows do not count; their TTL is the BBS's
    /// concern.
    pub lrps_remaining: usize,
    /// Task work still tied to this cell: local containers plus
    /// non-terminal rows.
    pub tasks_remaining: usize,
}

impl BatchSnapshot {
    /// Returns true when no work remains on this cell.
    #[must_use]
    pub const fn is_drained(&self) -> bool {
        self.lrps_remaining == 0 && self.tasks_remaining == 0
    }
}

/// Derives operations from authoritative state and from executor events.
pub struct Generator {
    cell_id: CellId,
    bbs: Arc<dyn BbsClient>,
    executor: Arc<dyn ExecutorClient>,
    lrp_processor: Arc<LrpProcessor>,
    task_processor: Arc<TaskProcessor>,
}

impl Generator {
    /// Creates a generator for this cell.
    #[must_use]
    pub fn new(
        cell_id: CellId,
        bbs: Arc<dyn BbsClient>,
        executor: Arc<dyn ExecutorClient>,
        lrp_processor: Arc<LrpProcessor>,
        task_processor: Arc<TaskProcessor>,
    ) -> Self {
        Self {
            cell_id,
            bbs,
            executor,
            lrp_processor,
            task_processor,
        }
    }

    /// Builds an LRP operation for the given slot attempt.
    #[must_use]
    pub fn lrp_operation(
        &self,
        identity: ContainerIdentity,
        process_id: ProcessId,
        index: i32,
    ) -> BoxedOperation {
        Box::new(LrpOperation::new(
            identity,
            process_id,
            index,
            self.lrp_processor.clone(),
        ))
    }

    /// Builds a task operation.
    #[must_use]
    pub fn task_operation(&self, task_id: TaskId) -> BoxedOperation {
        Box::new(TaskOperation::new(task_id, self.task_processor.clone()))
    }

    /// Snapshots BBS inventory and executor containers and produces one
    /// operation per distinct identity in their union. Performs no
    /// mutations itself.
    pub async fn batch_operations(&self) -> Result<BatchSnapshot> {
        let groups = self.bbs.actual_lrp_groups_for_cell(&self.cell_id).await?;
        let task_rows = self.bbs.tasks_for_cell(&self.cell_id).await?;
        let containers = self.executor.list_containers(&BTreeMap::new()).await?;
        #[allow(clippy::cast_precision_loss)]
        gauge!(crate::metrics::names::CONTAINERS).set(containers.len() as f64);

        let mut seen: HashSet<String> = HashSet::new();
        let mut lrp_identities: HashSet<String> = HashSet::new();
        let mut task_identities: HashSet<String> = HashSet::new();
        let mut operations: Vec<BoxedOperation> = Vec::new();

        for container in &containers {
            match container.lifecycle() {
                Some(tags::LRP_LIFECYCLE) => {
                    let Some(meta) = container.lrp_meta() else {
                        tracing::warn!(
                            identity = %container.identity,
                            "lrp container is missing metadata tags; skipping"
                        );
                        continue;
                    };
                    lrp_identities.insert(container.identity.as_str().to_string());
                    if seen.insert(container.identity.as_str().to_string()) {
                        operations.push(self.lrp_operation(
                            container.identity.clone(),
                            meta.process_id,
                            meta.index,
                        ));
                    }
                }
                Some(tags::TASK_LIFECYCLE) => {
                    task_identities.insert(container.identity.as_str().to_string());
                    if seen.insert(container.identity.as_str().to_string()) {
                        operations.push(
                            self.task_operation(TaskId::new(container.identity.as_str())),
                        );
                    }
                }
                lifecycle => {
                    tracing::warn!(
                        identity = %container.identity,
                        ?lifecycle,
                        "container has no recognized lifecycle tag; ignoring"
                    );
                }
            }
        }

        for group in &groups {
            for (row, is_instance) in [(group.instance.as_ref(), true), (group.evacuating.as_ref(), false)]
            {
                let Some(row) = row else { continue };
                if !row.is_on_cell(&self.cell_id) {
                    continue;
                }
                let Some(identity) = row.container_identity() else {
                    continue;
                };
                if is_instance {
                    lrp_identities.insert(identity.as_str().to_string());
                }
                if seen.insert(identity.as_str().to_string()) {
                    operations.push(self.lrp_operation(
                        identity,
                        row.key.process_id.clone(),
                        row.key.index,
                    ));
                }
            }
        }

        for task in &task_rows {
            let identity = ContainerIdentity::for_task(&task.id);
            if !task.state.is_terminal() {
                task_identities.insert(identity.as_str().to_string());
            }
            if seen.insert(identity.as_str().to_string()) {
                operations.push(self.task_operation(task.id.clone()));
            }
        }

        Ok(BatchSnapshot {
            operations,
            lrps_remaining: lrp_identities.len(),
            tasks_remaining: task_identities.len(),
        })
    }

    /// Maps an executor event to an operation by its `lifecycle` tag.
    /// Events without a recognized tag are dropped.
    #[must_use]
    pub fn operation_from_event(&self, event: &ContainerEvent) -> Option<BoxedOperation> {
        let container = event.container();
        match container.lifecycle() {
            Some(tags::LRP_LIFECYCLE) => {
                let Some(meta) = container.lrp_meta() else {
                    tracing::warn!(
                        identity = %container.identity,
                        event = event.name(),
                        "lrp event container is missing metadata tags; dropping"
                    );
                    return None;
                };
                Some(self.lrp_operation(
                    container.identity.clone(),
                    meta.process_id,
                    meta.index,
                ))
            }
            Some(tags::TASK_LIFECYCLE) => {
                Some(self.task_operation(TaskId::new(container.identity.as_str())))
            }
            lifecycle => {
                tracing::warn!(
                    identity = %container.identity,
                    event = event.name(),
                    ?lifecycle,
                    "event container has no recognized lifecycle tag; dropping"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use chrono::Utc;

    use corral_core::container::{Container, ContainerState};
    use corral_core::lrp::{ActualLrp, ActualLrpState, LrpInstanceKey, LrpKey};
    use corral_core::identity::InstanceId;
    use corral_core::resources::Resources;
    use corral_core::task::{Task, TaskDefinition, TaskState};
    use corral_test_utils::{FakeBbs, FakeExecutor};

    use crate::delegate::ContainerDelegate;
    use crate::evacuation::EvacuationFlag;

    fn generator() -> (Arc<FakeBbs>, Arc<FakeExecutor>, Generator) {
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
            flag,
        ));
        let generator = Generator::new(
            CellId::new("cell-1"),
            bbs.clone(),
            executor.clone(),
            lrp_processor,
            task_processor,
        );
        (bbs, executor, generator)
    }

    fn lrp_container(identity: &str, process: &str, instance: &str, index: i32) -> Container {
        let mut container_tags = BTreeMap::new();
        container_tags.insert(tags::LIFECYCLE.to_string(), tags::LRP_LIFECYCLE.to_string());
        container_tags.insert(tags::PROCESS_ID.to_string(), process.to_string());
        container_tags.insert(tags::INSTANCE_ID.to_string(), instance.to_string());
        container_tags.insert(tags::INDEX.to_string(), index.to_string());
        container_tags.insert(tags::DOMAIN.to_string(), "apps".to_string());
        Container {
            identity: ContainerIdentity::new(identity),
            state: ContainerState::Running,
            tags: container_tags,
            resources: Resources::new(64, 64, 1),
            ports: vec![],
            run_result: None,
        }
    }

    fn running_task(id: &str) -> Task {
        Task {
            id: TaskId::new(id),
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
        }
    }

    #[tokio::test]
    async fn union_of_bbs_and_executor_yields_one_operation_per_identity() {
        let (bbs, executor, generator) = generator();

        // A container with a matching BBS row, a BBS row with no container,
        // and a task row.
        executor.set_container(lrp_container("p-i", "p", "i", 0));
        bbs.set_actual_lrp(ActualLrp {
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
        bbs.set_actual_lrp(ActualLrp {
            key: LrpKey::new("q", 2, "apps"),
            instance: Some(LrpInstanceKey {
                instance_id: InstanceId::new("j"),
                cell_id: CellId::new("cell-1"),
            }),
            state: ActualLrpState::Claimed,
            net_info: None,
            crash_count: 0,
            since: Utc::now(),
        });
        bbs.set_task(running_task("t-1"));

        let snapshot = generator.batch_operations().await.expect("batch");

        let mut keys: Vec<String> = snapshot
            .operations
            .iter()
            .map(|op| op.key().as_str().to_string())
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["p-i", "q-j", "t-1"]);
        assert_eq!(snapshot.lrps_remaining, 2);
        assert_eq!(snapshot.tasks_remaining, 1);
        assert!(!snapshot.is_drained());
    }

    #[tokio::test]
    async fn empty_cell_is_drained() {
        let (_bbs, _executor, generator) = generator();
        let snapshot = generator.batch_operations().await.expect("batch");
        assert!(snapshot.operations.is_empty());
        assert!(snapshot.is_drained());
    }

    #[tokio::test]
    async fn evacuating_shadows_do_not_block_drain() {
        let (bbs, _executor, generator) = generator();
        bbs.set_evacuating_actual_lrp(ActualLrp {
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

        let snapshot = generator.batch_operations().await.expect("batch");
        assert_eq!(snapshot.operations.len(), 1, "shadow still reconciles");
        assert!(snapshot.is_drained(), "shadow does not count as local work");
    }

    #[tokio::test]
    async fn event_mapping_follows_lifecycle_tag() {
        let (_bbs, _executor, generator) = generator();

        let lrp_event =
            ContainerEvent::Running(lrp_container("p-i", "p", "i", 0));
        let op = generator.operation_from_event(&lrp_event).expect("lrp op");
        assert_eq!(op.key().as_str(), "p-i");

        let mut task_container = lrp_container("t-9", "p", "i", 0);
        task_container
            .tags
            .insert(tags::LIFECYCLE.to_string(), tags::TASK_LIFECYCLE.to_string());
        let task_event = ContainerEvent::Completed(task_container);
        let op = generator.operation_from_event(&task_event).expect("task op");
        assert_eq!(op.key().as_str(), "t-9");

        let mut untagged = lrp_container("x", "p", "i", 0);
        untagged.tags.clear();
        assert!(generator
            .operation_from_event(&ContainerEvent::Created(untagged))
            .is_none());
    }

    #[tokio::test]
    async fn terminal_tasks_do_not_count_as_remaining_work() {
        let (bbs, _executor, generator) = generator();
        let mut task = running_task("t-1");
        task.state = TaskState::Completed;
        bbs.set_task(task);

        let snapshot = generator.batch_operations().await.expect("batch");
        assert_eq!(snapshot.operations.len(), 1, "terminal rows still reconcile");
        assert!(snapshot.is_drained());
    }
}
