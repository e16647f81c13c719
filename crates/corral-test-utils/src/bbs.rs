//! In-memory BBS fake.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use corral_core::error::{Error, Result};
use corral_core::identity::{CellId, ProcessId, TaskId};
use corral_core::lrp::{ActualLrp, ActualLrpGroup, ActualLrpState, LrpInstanceKey, LrpKey, LrpNetInfo};
use corral_core::task::{Task, TaskState};
use corral_core::BbsClient;

#[derive(Default)]
struct BbsState {
    groups: BTreeMap<(String, i32), ActualLrpGroup>,
    tasks: BTreeMap<String, Task>,
    calls: Vec<String>,
    unavailable: bool,
}

/// An in-memory BBS with honest state transitions and call recording.
///
/// Mutating calls are recorded as `verb:detail` strings; reads are recorded
/// with a `read:` prefix so tests can assert "no writes happened".
#[derive(Default)]
pub struct FakeBbs {
    state: Mutex<BbsState>,
}

fn slot_key(process_id: &ProcessId, index: i32) -> (String, i32) {
    (process_id.as_str().to_string(), index)
}

impl FakeBbs {
    /// Creates an empty fake BBS.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BbsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds or replaces the instance flavor of a slot.
    pub fn set_actual_lrp(&self, lrp: ActualLrp) {
        let mut state = self.lock();
        let entry = state
            .groups
            .entry(slot_key(&lrp.key.process_id, lrp.key.index))
            .or_default();
        entry.instance = Some(lrp);
    }

    /// Seeds or replaces the evacuating flavor of a slot.
    pub fn set_evacuating_actual_lrp(&self, lrp: ActualLrp) {
        let mut state = self.lock();
        let entry = state
            .groups
            .entry(slot_key(&lrp.key.process_id, lrp.key.index))
            .or_default();
        entry.evacuating = Some(lrp);
    }

    /// Seeds or replaces a task row.
    pub fn set_task(&self, task: Task) {
        let mut state = self.lock();
        state.tasks.insert(task.id.as_str().to_string(), task);
    }

    /// Returns the current group for a slot, if any.
    #[must_use]
    pub fn group(&self, process_id: &ProcessId, index: i32) -> Option<ActualLrpGroup> {
        self.lock().groups.get(&slot_key(process_id, index)).cloned()
    }

    /// Returns the current task row, if any.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<Task> {
        self.lock().tasks.get(task_id.as_str()).cloned()
    }

    /// Returns every recorded call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Returns recorded calls that mutate BBS state.
    #[must_use]
    pub fn mutating_calls(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|call| !call.starts_with("read:"))
            .cloned()
            .collect()
    }

    /// Clears the recorded calls, keeping the state.
    pub fn drain_calls(&self) {
        self.lock().calls.clear();
    }

    /// Makes every subsequent call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn check_available(state: &BbsState) -> Result<()> {
        if state.unavailable {
            return Err(Error::http("bbs unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BbsClient for FakeBbs {
    async fn actual_lrp_groups_for_cell(&self, cell_id: &CellId) -> Result<Vec<ActualLrpGroup>> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("read:lrp-groups:{cell_id}"));
        Ok(state
            .groups
            .values()
            .filter(|group| {
                group
                    .instance
                    .as_ref()
                    .is_some_and(|lrp| lrp.is_on_cell(cell_id))
                    || group
                        .evacuating
                        .as_ref()
                        .is_some_and(|lrp| lrp.is_on_cell(cell_id))
            })
            .cloned()
            .collect())
    }

    async fn actual_lrp_group_by_process_index(
        &self,
        process_id: &ProcessId,
        index: i32,
    ) -> Result<Option<ActualLrpGroup>> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state
            .calls
            .push(format!("read:lrp-group:{process_id}/{index}"));
        Ok(state.groups.get(&slot_key(process_id, index)).cloned())
    }

    async fn claim_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!(
            "claim:{}/{}:{}",
            key.process_id, key.index, instance.instance_id
        ));
        let group = state
            .groups
            .get_mut(&slot_key(&key.process_id, key.index))
            .ok_or_else(|| Error::LrpNotFound {
                process_id: key.process_id.as_str().to_string(),
                index: key.index,
            })?;
        let row = group.instance.as_mut().ok_or_else(|| Error::LrpNotFound {
            process_id: key.process_id.as_str().to_string(),
            index: key.index,
        })?;
        match row.state {
            ActualLrpState::Unclaimed => {
                row.state = ActualLrpState::Claimed;
                row.instance = Some(instance.clone());
                row.since = Utc::now();
                Ok(())
            }
            ActualLrpState::Claimed if row.instance.as_ref() == Some(instance) => Ok(()),
            _ => Err(Error::state_conflict(format!(
                "slot {}/{} is not claimable",
                key.process_id, key.index
            ))),
        }
    }

    async fn start_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        net_info: &LrpNetInfo,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!(
            "start:{}/{}:{}",
            key.process_id, key.index, instance.instance_id
        ));
        let group = state
            .groups
            .entry(slot_key(&key.process_id, key.index))
            .or_default();
        let row = group.instance.get_or_insert_with(|| ActualLrp {
            key: key.clone(),
            instance: None,
            state: ActualLrpState::Unclaimed,
            net_info: None,
            crash_count: 0,
            since: Utc::now(),
        });
        if let Some(owner) = row.instance.as_ref() {
            if owner != instance {
                return Err(Error::state_conflict(format!(
                    "slot {}/{} is owned by another instance",
                    key.process_id, key.index
                )));
            }
        }
        row.instance = Some(instance.clone());
        row.state = ActualLrpState::Running;
        row.net_info = Some(net_info.clone());
        row.since = Utc::now();
        Ok(())
    }

    async fn crash_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        reason: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!(
            "crash:{}/{}:{}:{}",
            key.process_id, key.index, instance.instance_id, reason
        ));
        let group = state
            .groups
            .get_mut(&slot_key(&key.process_id, key.index))
            .ok_or_else(|| Error::LrpNotFound {
                process_id: key.process_id.as_str().to_string(),
                index: key.index,
            })?;
        let row = group.instance.as_mut().ok_or_else(|| Error::LrpNotFound {
            process_id: key.process_id.as_str().to_string(),
            index: key.index,
        })?;
        row.crash_count += 1;
        row.state = ActualLrpState::Unclaimed;
        row.instance = None;
        row.net_info = None;
        row.since = Utc::now();
        Ok(())
    }

    async fn unclaim_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!(
            "unclaim:{}/{}:{}",
            key.process_id, key.index, instance.instance_id
        ));
        let group = state
            .groups
            .get_mut(&slot_key(&key.process_id, key.index))
            .ok_or_else(|| Error::LrpNotFound {
                process_id: key.process_id.as_str().to_string(),
                index: key.index,
            })?;
        if let Some(row) = group.instance.as_mut() {
            if row.instance.as_ref() != Some(instance) {
                return Err(Error::state_conflict(format!(
                    "slot {}/{} is owned by another instance",
                    key.process_id, key.index
                )));
            }
            row.state = ActualLrpState::Unclaimed;
            row.instance = None;
            row.net_info = None;
            row.since = Utc::now();
        }
        Ok(())
    }

    async fn remove_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!(
            "remove:{}/{}:{}",
            key.process_id, key.index, instance.instance_id
        ));
        let slot = slot_key(&key.process_id, key.index);
        if let Some(group) = state.groups.get_mut(&slot) {
            group.instance = None;
            if group.is_empty() {
                state.groups.remove(&slot);
            }
        }
        Ok(())
    }

    async fn evacuate_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        net_info: Option<&LrpNetInfo>,
        ttl: Duration,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!(
            "evacuate:{}/{}:{}:{}s",
            key.process_id,
            key.index,
            instance.instance_id,
            ttl.as_secs()
        ));
        let group = state
            .groups
            .entry(slot_key(&key.process_id, key.index))
            .or_default();
        group.evacuating = Some(ActualLrp {
            key: key.clone(),
            instance: Some(instance.clone()),
            state: ActualLrpState::Running,
            net_info: net_info.cloned(),
            crash_count: 0,
            since: Utc::now(),
        });
        // The slot itself goes back to the placement system.
        if let Some(row) = group.instance.as_mut() {
            if row.instance.as_ref() == Some(instance) {
                row.state = ActualLrpState::Unclaimed;
                row.instance = None;
                row.net_info = None;
                row.since = Utc::now();
            }
        }
        Ok(())
    }

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!(
            "remove-evacuating:{}/{}:{}",
            key.process_id, key.index, instance.instance_id
        ));
        let slot = slot_key(&key.process_id, key.index);
        if let Some(group) = state.groups.get_mut(&slot) {
            let matches = group
                .evacuating
                .as_ref()
                .is_some_and(|row| row.instance.as_ref() == Some(instance));
            if matches {
                group.evacuating = None;
            }
            if group.is_empty() {
                state.groups.remove(&slot);
            }
        }
        Ok(())
    }

    async fn tasks_for_cell(&self, cell_id: &CellId) -> Result<Vec<Task>> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("read:tasks:{cell_id}"));
        Ok(state
            .tasks
            .values()
            .filter(|task| task.is_on_cell(cell_id))
            .cloned()
            .collect())
    }

    async fn task_by_id(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("read:task:{task_id}"));
        Ok(state.tasks.get(task_id.as_str()).cloned())
    }

    async fn start_task(&self, task_id: &TaskId, cell_id: &CellId) -> Result<bool> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("start-task:{task_id}:{cell_id}"));
        let task = state
            .tasks
            .get_mut(task_id.as_str())
            .ok_or_else(|| Error::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;
        match task.state {
            TaskState::Pending => {
                task.state = TaskState::Running;
                task.cell_id = Some(cell_id.clone());
                Ok(true)
            }
            TaskState::Running if task.is_on_cell(cell_id) => Ok(true),
            _ => Ok(false),
        }
    }

    async fn complete_task(
        &self,
        task_id: &TaskId,
        cell_id: &CellId,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state
            .calls
            .push(format!("complete-task:{task_id}:failed={failed}"));
        let task = state
            .tasks
            .get_mut(task_id.as_str())
            .ok_or_else(|| Error::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;
        if !task.is_on_cell(cell_id) {
            return Err(Error::WrongCell {
                owner: task
                    .cell_id
                    .as_ref()
                    .map_or_else(String::new, |c| c.as_str().to_string()),
                cell_id: cell_id.as_str().to_string(),
            });
        }
        if task.state != TaskState::Running {
            return Err(Error::state_conflict(format!(
                "task {task_id} is not running"
            )));
        }
        task.state = TaskState::Completed;
        task.failed = failed;
        task.failure_reason = failure_reason.to_string();
        task.result = result.to_string();
        Ok(())
    }

    async fn fail_task(&self, task_id: &TaskId, failure_reason: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state
            .calls
            .push(format!("fail-task:{task_id}:{failure_reason}"));
        let task = state
            .tasks
            .get_mut(task_id.as_str())
            .ok_or_else(|| Error::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;
        if task.state.is_terminal() {
            return Err(Error::state_conflict(format!(
                "task {task_id} already completed"
            )));
        }
        task.state = TaskState::Completed;
        task.failed = true;
        task.failure_reason = failure_reason.to_string();
        Ok(())
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("cancel-task:{task_id}"));
        let task = state
            .tasks
            .get_mut(task_id.as_str())
            .ok_or_else(|| Error::TaskNotFound {
                task_id: task_id.as_str().to_string(),
            })?;
        if task.state.is_terminal() {
            return Ok(());
        }
        task.state = TaskState::Completed;
        task.failed = true;
        task.failure_reason = "task was cancelled".to_string();
        Ok(())
    }
}
