//! Auction wire types: cell state reports and bid-allocation batches.
//!
//! The auctioneer asks every cell for its [`CellState`], scores candidates,
//! and awards work through a [`Work`] batch. Items the cell cannot take are
//! echoed back in [`FailedWork`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::{InstanceId, ProcessId, TaskId};
use crate::resources::Resources;

/// Root filesystem providers a cell advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootFsProviders {
    /// Stacks baked into the host, addressed as `preloaded:<stack>`.
    #[serde(default)]
    pub preloaded: BTreeSet<String>,
    /// Opaque provider schemes (e.g. external registries).
    #[serde(default)]
    pub providers: BTreeSet<String>,
}

impl RootFsProviders {
    /// Returns true when the given `scheme:rest` root filesystem is served
    /// by this cell.
    #[must_use]
    pub fn supports(&self, root_fs: &str) -> bool {
        match root_fs.split_once(':') {
            Some(("preloaded", stack)) => self.preloaded.contains(stack),
            Some((scheme, _)) => self.providers.contains(scheme),
            None => false,
        }
    }
}

/// Summary of one placed LRP attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LrpSummary {
    /// The process the attempt serves.
    pub process_id: ProcessId,
    /// The slot index.
    pub index: i32,
    /// The domain the process belongs to.
    pub domain: String,
}

/// Summary of one placed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    /// The task identifier.
    pub task_id: TaskId,
    /// The domain the task belongs to.
    pub domain: String,
}

/// Snapshot of a cell reported to the auctioneer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellState {
    /// Total executor capacity.
    pub total_resources: Resources,
    /// Capacity not yet reserved.
    pub available_resources: Resources,
    /// Containers still before their Running state.
    pub starting_container_count: u64,
    /// Root filesystems this cell can boot.
    pub root_fs_providers: RootFsProviders,
    /// Availability zone the cell runs in.
    pub zone: String,
    /// Whether the cell is draining.
    pub evacuating: bool,
    /// Placed LRP attempts.
    #[serde(default)]
    pub lrps: Vec<LrpSummary>,
    /// Placed tasks.
    #[serde(default)]
    pub tasks: Vec<TaskSummary>,
}

impl CellState {
    /// Worst-fit score: fraction of capacity that would remain free after
    /// placing `resource`, penalized by in-flight starts. Higher is a better
    /// candidate under worst-fit placement.
    #[must_use]
    pub fn worst_fit_score(&self, resource: &Resources, starting_container_weight: f64) -> f64 {
        let mut remaining = self.available_resources;
        remaining.subtract(resource);
        #[allow(clippy::cast_precision_loss)]
        let starting_penalty = self.starting_container_count as f64 * starting_container_weight;
        remaining.fraction_of(&self.total_resources) + starting_penalty
    }

    /// Best-fit score: occupancy after placing `resource`, weighting the
    /// container dimension heavier so full cells sort first.
    #[must_use]
    pub fn best_fit_score(&self, resource: &Resources) -> f64 {
        use crate::resources::fraction;

        let total = &self.total_resources;
        let mut remaining = self.available_resources;
        remaining.subtract(resource);

        let free_memory = fraction(remaining.memory_mb, total.memory_mb);
        let free_disk = fraction(remaining.disk_mb, total.disk_mb);
        let free_containers = fraction(remaining.containers, total.containers) * 3.0;

        (free_memory + free_disk + free_containers) / 5.0
    }
}

/// Request to start one LRP attempt on this cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LrpStartRequest {
    /// The process to start an attempt for.
    pub process_id: ProcessId,
    /// The slot index.
    pub index: i32,
    /// The domain the process belongs to.
    pub domain: String,
    /// Attempt identifier; generated by the cell when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    /// Root filesystem to boot.
    pub root_fs: String,
    /// Resources the attempt reserves.
    pub resources: Resources,
    /// Container ports to expose.
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// Request to start one task on this cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStartRequest {
    /// The task identifier.
    pub task_id: TaskId,
    /// The domain the task belongs to.
    pub domain: String,
    /// Root filesystem to boot.
    pub root_fs: String,
    /// Resources the task reserves.
    pub resources: Resources,
    /// Opaque action payload.
    #[serde(default)]
    pub action: serde_json::Value,
}

/// A bid-allocation batch awarded by the auctioneer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    /// LRP attempts to start.
    #[serde(default)]
    pub lrp_starts: Vec<LrpStartRequest>,
    /// Tasks to start.
    #[serde(default)]
    pub tasks: Vec<TaskStartRequest>,
}

impl Work {
    /// Returns true when the batch carries no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lrp_starts.is_empty() && self.tasks.is_empty()
    }
}

/// The items of a batch the cell could not take.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedWork {
    /// LRP starts that failed preflight or reservation.
    #[serde(default)]
    pub lrp_starts: Vec<LrpStartRequest>,
    /// Tasks that failed preflight or reservation.
    #[serde(default)]
    pub tasks: Vec<TaskStartRequest>,
}

impl FailedWork {
    /// Returns true when every item of the batch was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lrp_starts.is_empty() && self.tasks.is_empty()
    }
}
