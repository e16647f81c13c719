//! BBS-side task records.

use serde::{Deserialize, Serialize};

use crate::identity::{CellId, TaskId};
use crate::resources::Resources;

/// State of a task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Placed on a cell but not started.
    Pending,
    /// Running on a cell.
    Running,
    /// Finished; result awaits resolution.
    Completed,
    /// Result is being delivered to the requester.
    Resolving,
}

impl TaskState {
    /// Returns true for states with no further local work.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Resolving)
    }
}

/// What to run and with which resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Root filesystem the task container boots from.
    pub root_fs: String,
    /// Resources the task reserves.
    pub resources: Resources,
    /// Opaque action payload executed inside the container.
    #[serde(default)]
    pub action: serde_json::Value,
}

/// One task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// The task identifier; also its container identity.
    pub id: TaskId,
    /// The domain the task belongs to.
    pub domain: String,
    /// The cell the task is placed on, once placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<CellId>,
    /// Row state.
    pub state: TaskState,
    /// What to run.
    pub definition: TaskDefinition,
    /// Captured output metadata, populated on completion.
    #[serde(default)]
    pub result: String,
    /// Whether the task failed, populated on completion.
    #[serde(default)]
    pub failed: bool,
    /// Failure description when `failed` is set.
    #[serde(default)]
    pub failure_reason: String,
}

impl Task {
    /// Returns true when the task is placed on the given cell.
    #[must_use]
    pub fn is_on_cell(&self, cell_id: &CellId) -> bool {
        self.cell_id.as_ref() == Some(cell_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Resolving.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn unplaced_task_is_on_no_cell() {
        let task = Task {
            id: TaskId::new("t-1"),
            domain: "batch".into(),
            cell_id: None,
            state: TaskState::Pending,
            definition: TaskDefinition {
                root_fs: "preloaded:base".into(),
                resources: Resources::new(64, 64, 1),
                action: serde_json::Value::Null,
            },
            result: String::new(),
            failed: false,
            failure_reason: String::new(),
        };
        assert!(!task.is_on_cell(&CellId::new("cell-a")));
    }
}
