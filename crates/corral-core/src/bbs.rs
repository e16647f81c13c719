//! Client trait for the BBS, the authoritative coordination store.
//!
//! The agent never caches BBS state across operations; every reconciliation
//! fetches fresh rows through this trait. Implementations map transport
//! failures to [`Error::Http`](crate::error::Error::Http) and lost
//! compare-and-swaps to
//! [`Error::StateConflict`](crate::error::Error::StateConflict).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::{CellId, ProcessId, TaskId};
use crate::lrp::{ActualLrpGroup, LrpInstanceKey, LrpKey, LrpNetInfo};
use crate::task::Task;

/// Narrow interface over the BBS record APIs the cell agent uses.
#[async_trait]
pub trait BbsClient: Send + Sync {
    /// Lists actual LRP groups with any flavor assigned to the given cell.
    async fn actual_lrp_groups_for_cell(&self, cell_id: &CellId) -> Result<Vec<ActualLrpGroup>>;

    /// Fetches the group for one slot, `None` when neither flavor exists.
    async fn actual_lrp_group_by_process_index(
        &self,
        process_id: &ProcessId,
        index: i32,
    ) -> Result<Option<ActualLrpGroup>>;

    /// Claims an unclaimed slot for the given attempt.
    async fn claim_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()>;

    /// Transitions a claimed slot to Running, recording its net info. Also
    /// used to refresh net info on an already-running row.
    async fn start_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        net_info: &LrpNetInfo,
    ) -> Result<()>;

    /// Reports a crash; the BBS decides between Unclaimed and Crashed.
    async fn crash_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        reason: &str,
    ) -> Result<()>;

    /// Returns a claimed or running slot to Unclaimed.
    async fn unclaim_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()>;

    /// Removes the instance row for an attempt.
    async fn remove_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()>;

    /// Duplicates the instance row into an evacuating shadow with the given
    /// TTL and returns the slot to the placement system.
    async fn evacuate_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        net_info: Option<&LrpNetInfo>,
        ttl: Duration,
    ) -> Result<()>;

    /// Removes the evacuating shadow for an attempt.
    async fn remove_evacuating_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
    ) -> Result<()>;

    /// Lists tasks placed on the given cell.
    async fn tasks_for_cell(&self, cell_id: &CellId) -> Result<Vec<Task>>;

    /// Fetches one task, `None` when the row does not exist.
    async fn task_by_id(&self, task_id: &TaskId) -> Result<Option<Task>>;

    /// Transitions a pending task to Running. Returns false when the task
    /// should not run (already started elsewhere or cancelled); the caller
    /// must then release its reservation.
    async fn start_task(&self, task_id: &TaskId, cell_id: &CellId) -> Result<bool>;

    /// Completes a running task, propagating the container result.
    async fn complete_task(
        &self,
        task_id: &TaskId,
        cell_id: &CellId,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<()>;

    /// Fail-completes a task the cell can no longer run.
    async fn fail_task(&self, task_id: &TaskId, failure_reason: &str) -> Result<()>;

    /// Requests cancellation of a task.
    async fn cancel_task(&self, task_id: &TaskId) -> Result<()>;
}
