//! BBS-side actual LRP records.
//!
//! Each `(process-id, index)` slot may have up to two rows: the *instance*
//! flavor (the primary attempt) and the *evacuating* flavor (a shadow
//! retained while a cell drains, so the placement system has time to
//! re-place the work before the shadow's TTL expires).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::container::PortMapping;
use crate::identity::{CellId, ContainerIdentity, InstanceId, ProcessId};

/// State of an actual LRP row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActualLrpState {
    /// No cell has claimed the slot.
    Unclaimed,
    /// A cell has claimed the slot but the instance is not running yet.
    Claimed,
    /// The instance is running.
    Running,
    /// The instance crashed; the placement system decides on restart.
    Crashed,
}

/// Identifies a desired LRP slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LrpKey {
    /// The process the slot belongs to.
    pub process_id: ProcessId,
    /// The slot index within the process.
    pub index: i32,
    /// The domain the process belongs to.
    pub domain: String,
}

impl LrpKey {
    /// Creates a slot key.
    #[must_use]
    pub fn new(process_id: impl Into<ProcessId>, index: i32, domain: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            index,
            domain: domain.into(),
        }
    }
}

/// Identifies which attempt a cell owns for a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LrpInstanceKey {
    /// The attempt identifier.
    pub instance_id: InstanceId,
    /// The cell the attempt runs on.
    pub cell_id: CellId,
}

/// Address and port mappings of a running instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LrpNetInfo {
    /// Host address traffic should be routed to.
    pub host: String,
    /// Observed container-to-host port mappings.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

/// One actual LRP row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualLrp {
    /// The slot this row describes.
    pub key: LrpKey,
    /// The owning attempt; absent while unclaimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<LrpInstanceKey>,
    /// Row state.
    pub state: ActualLrpState,
    /// Network info, present once running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_info: Option<LrpNetInfo>,
    /// Times the slot's attempts have crashed.
    #[serde(default)]
    pub crash_count: u32,
    /// When the row entered its current state.
    pub since: DateTime<Utc>,
}

impl ActualLrp {
    /// Returns true when this row's attempt belongs to the given cell.
    #[must_use]
    pub fn is_on_cell(&self, cell_id: &CellId) -> bool {
        self.instance
            .as_ref()
            .is_some_and(|instance| &instance.cell_id == cell_id)
    }

    /// Returns the container identity of this row's attempt, if claimed.
    #[must_use]
    pub fn container_identity(&self) -> Option<ContainerIdentity> {
        self.instance
            .as_ref()
            .map(|instance| ContainerIdentity::for_lrp(&self.key.process_id, &instance.instance_id))
    }
}

/// The up-to-two rows a slot may have.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualLrpGroup {
    /// The primary attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<ActualLrp>,
    /// The evacuating shadow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evacuating: Option<ActualLrp>,
}

impl ActualLrpGroup {
    /// Returns true when neither flavor exists.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.instance.is_none() && self.evacuating.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_lrp(cell: &str) -> ActualLrp {
        ActualLrp {
            key: LrpKey::new("proc-1", 0, "apps"),
            instance: Some(LrpInstanceKey {
                instance_id: InstanceId::new("inst-1"),
                cell_id: CellId::new(cell),
            }),
            state: ActualLrpState::Running,
            net_info: None,
            crash_count: 0,
            since: Utc::now(),
        }
    }

    #[test]
    fn is_on_cell_matches_owner() {
        let lrp = running_lrp("cell-a");
        assert!(lrp.is_on_cell(&CellId::new("cell-a")));
        assert!(!lrp.is_on_cell(&CellId::new("cell-b")));
    }

    #[test]
    fn unclaimed_rows_belong_to_no_cell() {
        let mut lrp = running_lrp("cell-a");
        lrp.instance = None;
        lrp.state = ActualLrpState::Unclaimed;
        assert!(!lrp.is_on_cell(&CellId::new("cell-a")));
        assert!(lrp.container_identity().is_none());
    }

    #[test]
    fn container_identity_composes_from_keys() {
        let lrp = running_lrp("cell-a");
        assert_eq!(
            lrp.container_identity().expect("identity").as_str(),
            "proc-1-inst-1"
        );
    }
}
