//! Reconciliation of one task on this cell.

use std::collections::BTreeMap;
use std::sync::Arc;

use corral_core::container::{tags, Container, ContainerSpec, ContainerState};
use corral_core::error::{Error, Result};
use corral_core::identity::{CellId, ContainerIdentity, TaskId};
use corral_core::task::{Task, TaskState};
use corral_core::{BbsClient, ExecutorClient};

use crate::delegate::ContainerDelegate;
use crate::evacuation::EvacuationFlag;

/// Reconciles one task row against its local container.
///
/// Pending work placed here is reserved, started in the BBS, and run.
/// Running work with no container is fail-completed ("container missing").
/// Completed containers propagate their result into the task-completion
/// call. Terminal or foreign rows get their local container destroyed.
pub struct TaskProcessor {
    cell_id: CellId,
    bbs: Arc<dyn BbsClient>,
    executor: Arc<dyn ExecutorClient>,
    delegate: Arc<ContainerDelegate>,
    evacuating: Arc<EvacuationFlag>,
}

impl TaskProcessor {
    /// Creates a processor for this cell.
    #[must_use]
    pub fn new(
        cell_id: CellId,
        bbs: Arc<dyn BbsClient>,
        executor: Arc<dyn ExecutorClient>,
        delegate: Arc<ContainerDelegate>,
        evacuating: Arc<EvacuationFlag>,
    ) -> Self {
        Self {
            cell_id,
            bbs,
            executor,
            delegate,
            evacuating,
        }
    }

    /// Runs one reconciliation for the given task.
    pub async fn process(&self, task_id: &TaskId) -> Result<()> {
        let identity = ContainerIdentity::for_task(task_id);
        let task = self.bbs.task_by_id(task_id).await?;
        let container = match self.delegate.get_container(&identity).await {
            Ok(container) => Some(container),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        match task {
            None => self.delete_if_present(&identity, container.as_ref()).await,
            Some(task) if !task.is_on_cell(&self.cell_id) => {
                self.delete_if_present(&identity, container.as_ref()).await
            }
            Some(task) => match task.state {
                TaskState::Pending => {
                    self.handle_pending(&identity, &task, container.as_ref()).await
                }
                TaskState::Running => {
                    self.handle_running(&identity, &task, container.as_ref()).await
                }
                TaskState::Completed | TaskState::Resolving => {
                    self.delete_if_present(&identity, container.as_ref()).await
                }
            },
        }
    }

    async fn delete_if_present(
        &self,
        identity: &ContainerIdentity,
        container: Option<&Container>,
    ) -> Result<()> {
        if container.is_some() {
            self.delegate.delete_container(identity).await?;
        }
        Ok(())
    }

    async fn handle_pending(
        &self,
        identity: &ContainerIdentity,
        task: &Task,
        container: Option<&Container>,
    ) -> Result<()> {
        match container {
            None => {
                if self.evacuating.is_set() {
                    // Never start new work while draining; the task goes
                    // back through the placement system.
                    return self.bbs.fail_task(&task.id, "cell is evacuating").await;
                }
                self.executor
                    .allocate_container(self.container_spec(identity, task))
                    .await?;
                self.start_and_run(identity, task).await
            }
            Some(container) => match container.state {
                ContainerState::Reserved
                | ContainerState::Initializing
                | ContainerState::Created => self.start_and_run(identity, task).await,
                ContainerState::Running => {
                    // The container outran the BBS row; record Running.
                    self.bbs.start_task(&task.id, &self.cell_id).await.map(|_| ())
                }
                ContainerState::Completed => {
                    if self.bbs.start_task(&task.id, &self.cell_id).await? {
                        self.complete(task, container).await?;
                    }
                    self.delegate.delete_container(identity).await
                }
            },
        }
    }

    async fn handle_running(
        &self,
        identity: &ContainerIdentity,
        task: &Task,
        container: Option<&Container>,
    ) -> Result<()> {
        match container {
            None => {
                self.bbs
                    .complete_task(&task.id, &self.cell_id, true, "container missing", "")
                    .await
            }
            Some(container) => match container.state {
                ContainerState::Reserved
                | ContainerState::Initializing
                | ContainerState::Created => self.delegate.run_container(identity).await,
                ContainerState::Running => Ok(()),
                ContainerState::Completed => {
                    self.complete(task, container).await?;
                    self.delegate.delete_container(identity).await
                }
            },
        }
    }

    /// Marks the task Running and runs the container; a refused start means
    /// the work was lost to another actor and the reservation is released.
    async fn start_and_run(&self, identity: &ContainerIdentity, task: &Task) -> Result<()> {
        if self.bbs.start_task(&task.id, &self.cell_id).await? {
            self.delegate.run_container(identity).await
        } else {
            tracing::info!(task_id = %task.id, "task should not run; releasing reservation");
            self.delegate.delete_container(identity).await
        }
    }

    async fn complete(&self, task: &Task, container: &Container) -> Result<()> {
        let result = container.run_result.clone().unwrap_or_default();
        match self
            .bbs
            .complete_task(
                &task.id,
                &self.cell_id,
                result.failed,
                &result.failure_reason,
                &result.result,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(Error::StateConflict { message }) => {
                tracing::info!(task_id = %task.id, message = %message, "completion superseded");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn container_spec(&self, identity: &ContainerIdentity, task: &Task) -> ContainerSpec {
        let mut container_tags = BTreeMap::new();
        container_tags.insert(tags::LIFECYCLE.to_string(), tags::TASK_LIFECYCLE.to_string());
        container_tags.insert(tags::DOMAIN.to_string(), task.domain.clone());
        ContainerSpec {
            identity: identity.clone(),
            tags: container_tags,
            resources: task.definition.resources,
            root_fs: task.definition.root_fs.clone(),
            ports: Vec::new(),
            action: task.definition.action.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use corral_core::container::RunResult;
    use corral_core::resources::Resources;
    use corral_core::task::TaskDefinition;
    use corral_test_utils::{FakeBbs, FakeExecutor};

    struct Harness {
        bbs: Arc<FakeBbs>,
        executor: Arc<FakeExecutor>,
        flag: Arc<EvacuationFlag>,
        processor: TaskProcessor,
    }

    fn harness() -> Harness {
        let bbs = Arc::new(FakeBbs::new());
        let executor = Arc::new(FakeExecutor::new(Resources::new(1024, 2048, 4)));
        let delegate = Arc::new(ContainerDelegate::new(executor.clone()));
        let flag = Arc::new(EvacuationFlag::new());
        let processor = TaskProcessor::new(
            CellId::new("cell-1"),
            bbs.clone(),
            executor.clone(),
            delegate,
            flag.clone(),
        );
        Harness {
            bbs,
            executor,
            flag,
            processor,
        }
    }

    fn pending_task(id: &str) -> Task {
        Task {
            id: TaskId::new(id),
            domain: "batch".to_string(),
            cell_id: Some(CellId::new("cell-1")),
            state: TaskState::Pending,
            definition: TaskDefinition {
                root_fs: "preloaded:base".to_string(),
                resources: Resources::new(64, 64, 1),
                action: serde_json::json!({"run": {"path": "date"}}),
            },
            result: String::new(),
            failed: false,
            failure_reason: String::new(),
        }
    }

    async fn process(h: &Harness, id: &str) {
        h.processor.process(&TaskId::new(id)).await.expect("process");
    }

    #[tokio::test]
    async fn pending_task_without_container_is_reserved_started_and_run() {
        let h = harness();
        h.bbs.set_task(pending_task("t-1"));

        process(&h, "t-1").await;

        let container = h.executor.container(&ContainerIdentity::new("t-1")).expect("container");
        assert_eq!(container.state, ContainerState::Running);
        assert_eq!(container.tags.get(tags::LIFECYCLE).map(String::as_str), Some("task"));
        assert_eq!(
            h.bbs.task(&TaskId::new("t-1")).expect("task").state,
            TaskState::Running
        );
        assert_eq!(
            h.executor.mutating_calls(),
            vec!["allocate:t-1".to_string(), "run:t-1".to_string()]
        );
    }

    #[tokio::test]
    async fn running_task_without_container_is_fail_completed() {
        let h = harness();
        let mut task = pending_task("t-2");
        task.state = TaskState::Running;
        h.bbs.set_task(task);

        process(&h, "t-2").await;

        let task = h.bbs.task(&TaskId::new("t-2")).expect("task");
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.failed);
        assert_eq!(task.failure_reason, "container missing");
    }

    #[tokio::test]
    async fn completed_container_propagates_result() {
        let h = harness();
        let mut task = pending_task("t-3");
        task.state = TaskState::Running;
        h.bbs.set_task(task);

        let mut container = Container {
            identity: ContainerIdentity::new("t-3"),
            state: ContainerState::Completed,
            tags: BTreeMap::new(),
            resources: Resources::new(64, 64, 1),
            ports: vec![],
            run_result: None,
        };
        container.tags.insert(tags::LIFECYCLE.to_string(), tags::TASK_LIFECYCLE.to_string());
        container.run_result = Some(RunResult {
            failed: false,
            failure_reason: String::new(),
            result: "Mon Mar  3 12:00:00 UTC 2025".to_string(),
        });
        h.executor.set_container(container);

        process(&h, "t-3").await;

        let task = h.bbs.task(&TaskId::new("t-3")).expect("task");
        assert_eq!(task.state, TaskState::Completed);
        assert!(!task.failed);
        assert_eq!(task.result, "Mon Mar  3 12:00:00 UTC 2025");
        assert!(h.executor.container(&ContainerIdentity::new("t-3")).is_none());
    }

    #[tokio::test]
    async fn terminal_task_gets_its_container_deleted() {
        let h = harness();
        let mut task = pending_task("t-4");
        task.state = TaskState::Completed;
        h.bbs.set_task(task);
        let mut container_tags = BTreeMap::new();
        container_tags.insert(tags::LIFECYCLE.to_string(), tags::TASK_LIFECYCLE.to_string());
        h.executor.set_container(Container {
            identity: ContainerIdentity::new("t-4"),
            state: ContainerState::Completed,
            tags: container_tags,
            resources: Resources::new(64, 64, 1),
            ports: vec![],
            run_result: None,
        });

        process(&h, "t-4").await;

        assert!(h.executor.container(&ContainerIdentity::new("t-4")).is_none());
        assert!(h.bbs.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn foreign_task_gets_its_container_deleted_without_bbs_writes() {
        let h = harness();
        let mut task = pending_task("t-5");
        task.cell_id = Some(CellId::new("cell-9"));
        h.bbs.set_task(task);
        let mut container_tags = BTreeMap::new();
        container_tags.insert(tags::LIFECYCLE.to_string(), tags::TASK_LIFECYCLE.to_string());
        h.executor.set_container(Container {
            identity: ContainerIdentity::new("t-5"),
            state: ContainerState::Running,
            tags: container_tags,
            resources: Resources::new(64, 64, 1),
            ports: vec![],
            run_result: None,
        });

        process(&h, "t-5").await;

        assert!(h.executor.container(&ContainerIdentity::new("t-5")).is_none());
        assert!(h.bbs.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn evacuating_cell_fails_pending_unstarted_tasks() {
        let h = harness();
        h.bbs.set_task(pending_task("t-6"));
        h.flag.set();

        process(&h, "t-6").await;

        let task = h.bbs.task(&TaskId::new("t-6")).expect("task");
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.failed);
        assert!(h.executor.container(&ContainerIdentity::new("t-6")).is_none());
    }

    #[tokio::test]
    async fn reprocessing_running_state_is_a_no_op() {
        let h = harness();
        h.bbs.set_task(pending_task("t-7"));

        process(&h, "t-7").await;
        h.bbs.drain_calls();
        h.executor.drain_calls();

        process(&h, "t-7").await;
        assert!(h.bbs.mutating_calls().is_empty());
        assert!(h.executor.mutating_calls().is_empty());
    }
}
