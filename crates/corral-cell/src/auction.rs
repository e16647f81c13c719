//! Auction representative: state reporting and work acceptance.

use std::collections::BTreeMap;
use std::sync::Arc;

use corral_core::auction::{
    CellState, FailedWork, LrpStartRequest, LrpSummary, RootFsProviders, TaskStartRequest,
    TaskSummary, Work,
};
use corral_core::container::{tags, ContainerSpec};
use corral_core::error::{Error, Result};
use corral_core::identity::{CellId, ContainerIdentity, InstanceId, TaskId};
use corral_core::ExecutorClient;

use crate::evacuation::EvacuationFlag;
use crate::metrics::record_work_item;
use crate::operations::{Generator, OperationQueue};

/// Stateless request handler for the auctioneer: state is read through the
/// executor on demand, and accepted work turns into reservations plus
/// operations on the normal queue path.
pub struct AuctionCellRep {
    cell_id: CellId,
    zone: String,
    root_fs_providers: RootFsProviders,
    executor: Arc<dyn ExecutorClient>,
    generator: Arc<Generator>,
    queue: Arc<OperationQueue>,
    evacuating: Arc<EvacuationFlag>,
}

impl AuctionCellRep {
    /// Creates the representative.
    #[must_use]
    pub fn new(
        cell_id: CellId,
        zone: String,
        root_fs_providers: RootFsProviders,
        executor: Arc<dyn ExecutorClient>,
        generator: Arc<Generator>,
        queue: Arc<OperationQueue>,
        evacuating: Arc<EvacuationFlag>,
    ) -> Self {
        Self {
            cell_id,
            zone,
            root_fs_providers,
            executor,
            generator,
            queue,
            evacuating,
        }
    }

    /// The cell this representative speaks for.
    #[must_use]
    pub const fn cell_id(&self) -> &CellId {
        &self.cell_id
    }

    /// Snapshots the cell for the auctioneer.
    pub async fn state(&self) -> Result<CellState> {
        let total_resources = self.executor.total_resources().await?;
        let available_resources = self.executor.remaining_resources().await?;
        let containers = self.executor.list_containers(&BTreeMap::new()).await?;

        let starting_container_count =
            containers.iter().filter(|c| c.state.is_starting()).count() as u64;

        let mut lrps = Vec::new();
        let mut task_summaries = Vec::new();
        for container in &containers {
            match container.lifecycle() {
                Some(tags::LRP_LIFECYCLE) => {
                    if let Some(meta) = container.lrp_meta() {
                        lrps.push(LrpSummary {
                            process_id: meta.process_id,
                            index: meta.index,
                            domain: meta.domain,
                        });
                    }
                }
                Some(tags::TASK_LIFECYCLE) => {
                    task_summaries.push(TaskSummary {
                        task_id: TaskId::new(container.identity.as_str()),
                        domain: container.tag(tags::DOMAIN).unwrap_or_default().to_string(),
                    });
                }
                _ => {}
            }
        }

        Ok(CellState {
            total_resources,
            available_resources,
            starting_container_count,
            root_fs_providers: self.root_fs_providers.clone(),
            zone: self.zone.clone(),
            evacuating: self.evacuating.is_set(),
            lrps,
            tasks: task_summaries,
        })
    }

    /// Accepts a bid-allocation batch. Items are preflighted one at a time
    /// against a live remaining-resources read, so reservations that
    /// succeed are visible to subsequent items. Failures come back in the
    /// result; accepted items are reserved and enqueued.
    pub async fn perform(&self, work: Work) -> Result<FailedWork> {
        let mut failed = FailedWork::default();

        for lrp in work.lrp_starts {
            match self.start_lrp(&lrp).await {
                Ok(()) => record_work_item("lrp", true),
                Err(err) => {
                    tracing::warn!(
                        process_id = %lrp.process_id,
                        index = lrp.index,
                        error = %err,
                        "rejecting lrp start"
                    );
                    record_work_item("lrp", false);
                    failed.lrp_starts.push(lrp);
                }
            }
        }

        for task in work.tasks {
            match self.start_task(&task).await {
                Ok(()) => record_work_item("task", true),
                Err(err) => {
                    tracing::warn!(task_id = %task.task_id, error = %err, "rejecting task start");
                    record_work_item("task", false);
                    failed.tasks.push(task);
                }
            }
        }

        Ok(failed)
    }

    async fn preflight(&self, root_fs: &str, resources: &corral_core::Resources) -> Result<()> {
        if self.evacuating.is_set() {
            return Err(Error::Evacuating);
        }
        if !self.root_fs_providers.supports(root_fs) {
            return Err(Error::UnknownRootFs {
                root_fs: root_fs.to_string(),
            });
        }
        let remaining = self.executor.remaining_resources().await?;
        if !remaining.can_fit(resources) {
            return Err(Error::insufficient_resources(format!(
                "requested {resources:?}, remaining {remaining:?}"
            )));
        }
        Ok(())
    }

    async fn start_lrp(&self, request: &LrpStartRequest) -> Result<()> {
        self.preflight(&request.root_fs, &request.resources).await?;

        let instance_id = request
            .instance_id
            .clone()
            .unwrap_or_else(InstanceId::generate);
        let identity = ContainerIdentity::for_lrp(&request.process_id, &instance_id);

        let mut container_tags = BTreeMap::new();
        container_tags.insert(tags::LIFECYCLE.to_string(), tags::LRP_LIFECYCLE.to_string());
        container_tags.insert(tags::DOMAIN.to_string(), request.domain.clone());
        container_tags.insert(tags::PROCESS_ID.to_string(), request.process_id.to_string());
        container_tags.insert(tags::INSTANCE_ID.to_string(), instance_id.to_string());
        container_tags.insert(tags::INDEX.to_string(), request.index.to_string());

        self.executor
            .allocate_container(ContainerSpec {
                identity: identity.clone(),
                tags: container_tags,
                resources: request.resources,
                root_fs: request.root_fs.clone(),
                ports: request.ports.clone(),
                action: serde_json::Value::Null,
            })
            .await?;

        self.queue.push(self.generator.lrp_operation(
            identity,
            request.process_id.clone(),
            request.index,
        ));
        Ok(())
    }

    async fn start_task(&self, request: &TaskStartRequest) -> Result<()> {
        self.preflight(&request.root_fs, &request.resources).await?;

        let identity = ContainerIdentity::for_task(&request.task_id);
        let mut container_tags = BTreeMap::new();
        container_tags.insert(tags::LIFECYCLE.to_string(), tags::TASK_LIFECYCLE.to_string());
        container_tags.insert(tags::DOMAIN.to_string(), request.domain.clone());

        self.executor
            .allocate_container(ContainerSpec {
                identity,
                tags: container_tags,
                resources: request.resources,
                root_fs: request.root_fs.clone(),
                ports: Vec::new(),
                action: request.action.clone(),
            })
            .await?;

        self.queue
            .push(self.generator.task_operation(request.task_id.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use corral_core::resources::Resources;
    use corral_test_utils::{FakeBbs, FakeExecutor};

    use crate::delegate::ContainerDelegate;
    use crate::processors::{LrpProcessor, TaskProcessor};

    struct Harness {
        executor: Arc<FakeExecutor>,
        flag: Arc<EvacuationFlag>,
        queue: Arc<OperationQueue>,
        rep: AuctionCellRep,
    }

    fn harness(total: Resources) -> Harness {
        let bbs = Arc::new(FakeBbs::new());
        let executor = Arc::new(FakeExecutor::new(total));
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
            bbs,
            executor.clone(),
            lrp_processor,
            task_processor,
        ));
        let queue = Arc::new(OperationQueue::new());

        let mut providers = RootFsProviders::default();
        providers.preloaded.insert("base".to_string());

        let rep = AuctionCellRep::new(
            CellId::new("cell-1"),
            "z1".to_string(),
            providers,
            executor.clone(),
            generator,
            queue.clone(),
            flag.clone(),
        );
        Harness {
            executor,
            flag,
            queue,
            rep,
        }
    }

    fn lrp_start(process: &str, index: i32, memory_mb: u64) -> LrpStartRequest {
        LrpStartRequest {
            process_id: process.into(),
            index,
            domain: "apps".to_string(),
            instance_id: Some(InstanceId::new("i-0")),
            root_fs: "preloaded:base".to_string(),
            resources: Resources::new(memory_mb, 64, 1),
            ports: vec![8080],
        }
    }

    #[tokio::test]
    async fn accepts_work_that_fits() {
        let h = harness(Resources::new(1024, 2048, 4));

        let failed = h
            .rep
            .perform(Work {
                lrp_starts: vec![lrp_start("p", 0, 64)],
                tasks: vec![],
            })
            .await
            .expect("perform");

        assert!(failed.is_empty());
        assert!(h.executor.container(&ContainerIdentity::new("p-i-0")).is_some());
        assert_eq!(h.queue.depth(), 1);
    }

    #[tokio::test]
    async fn rejects_overrunning_work_without_reserving() {
        let h = harness(Resources::new(32, 2048, 4));

        let failed = h
            .rep
            .perform(Work {
                lrp_starts: vec![lrp_start("p", 0, 64)],
                tasks: vec![],
            })
            .await
            .expect("perform");

        assert_eq!(failed.lrp_starts.len(), 1);
        assert!(h.executor.container(&ContainerIdentity::new("p-i-0")).is_none());
        assert_eq!(h.queue.depth(), 0);
    }

    #[tokio::test]
    async fn rejects_unknown_root_filesystems() {
        let h = harness(Resources::new(1024, 2048, 4));
        let mut request = lrp_start("p", 0, 64);
        request.root_fs = "preloaded:exotic".to_string();

        let failed = h
            .rep
            .perform(Work {
                lrp_starts: vec![request],
                tasks: vec![],
            })
            .await
            .expect("perform");

        assert_eq!(failed.lrp_starts.len(), 1);
    }

    #[tokio::test]
    async fn rejects_everything_while_evacuating() {
        let h = harness(Resources::new(1024, 2048, 4));
        h.flag.set();

        let failed = h
            .rep
            .perform(Work {
                lrp_starts: vec![lrp_start("p", 0, 64)],
                tasks: vec![TaskStartRequest {
                    task_id: TaskId::new("t-1"),
                    domain: "batch".to_string(),
                    root_fs: "preloaded:base".to_string(),
                    resources: Resources::new(64, 64, 1),
                    action: serde_json::Value::Null,
                }],
            })
            .await
            .expect("perform");

        assert_eq!(failed.lrp_starts.len(), 1);
        assert_eq!(failed.tasks.len(), 1);
    }

    #[tokio::test]
    async fn repeated_batch_fails_by_conflict() {
        let h = harness(Resources::new(1024, 2048, 4));
        let work = Work {
            lrp_starts: vec![lrp_start("p", 0, 64)],
            tasks: vec![],
        };

        let first = h.rep.perform(work.clone()).await.expect("first perform");
        assert!(first.is_empty());

        let second = h.rep.perform(work).await.expect("second perform");
        assert_eq!(second.lrp_starts.len(), 1, "already-accepted item now conflicts");
    }

    #[tokio::test]
    async fn successive_items_see_earlier_reservations() {
        // Capacity for exactly one 64 MB container.
        let h = harness(Resources::new(100, 2048, 4));
        let mut second = lrp_start("p", 1, 64);
        second.instance_id = Some(InstanceId::new("i-1"));

        let failed = h
            .rep
            .perform(Work {
                lrp_starts: vec![lrp_start("p", 0, 64), second],
                tasks: vec![],
            })
            .await
            .expect("perform");

        assert_eq!(failed.lrp_starts.len(), 1, "second item sees the first reservation");
        assert_eq!(failed.lrp_starts[0].index, 1);
    }

    #[tokio::test]
    async fn state_reports_capacity_and_inventory() {
        let h = harness(Resources::new(1024, 2048, 4));
        h.rep
            .perform(Work {
                lrp_starts: vec![lrp_start("p", 0, 64)],
                tasks: vec![],
            })
            .await
            .expect("perform");

        let state = h.rep.state().await.expect("state");
        assert_eq!(state.total_resources, Resources::new(1024, 2048, 4));
        assert_eq!(state.available_resources, Resources::new(960, 1984, 3));
        assert_eq!(state.starting_container_count, 1);
        assert_eq!(state.lrps.len(), 1);
        assert_eq!(state.zone, "z1");
        assert!(!state.evacuating);
        assert!(state.root_fs_providers.supports("preloaded:base"));
    }
}
