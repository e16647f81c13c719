//! Executor-side container records and lifecycle tags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{ContainerIdentity, InstanceId, ProcessId};
use crate::resources::Resources;

/// Tag keys and values the agent requires on executor containers.
pub mod tags {
    /// Tag naming the lifecycle of a container: `task` or `lrp`.
    pub const LIFECYCLE: &str = "lifecycle";
    /// Lifecycle value for one-shot tasks.
    pub const TASK_LIFECYCLE: &str = "task";
    /// Lifecycle value for long-running processes.
    pub const LRP_LIFECYCLE: &str = "lrp";
    /// Tag naming the domain an LRP belongs to.
    pub const DOMAIN: &str = "domain";
    /// Tag naming the process a container serves.
    pub const PROCESS_ID: &str = "process-id";
    /// Tag naming the attempt a container serves.
    pub const INSTANCE_ID: &str = "instance-id";
    /// Tag naming the slot index a container serves.
    pub const INDEX: &str = "index";
}

/// Lifecycle state of an executor container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Resources are reserved; nothing is running yet.
    Reserved,
    /// The executor is preparing the root filesystem and runtime.
    Initializing,
    /// The container exists but its process has not started.
    Created,
    /// The container's process is running.
    Running,
    /// The container's process has exited.
    Completed,
}

impl ContainerState {
    /// Returns true for states before the container process runs.
    #[must_use]
    pub const fn is_starting(&self) -> bool {
        matches!(self, Self::Reserved | Self::Initializing | Self::Created)
    }
}

/// Outcome of a completed container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Whether the container's process failed.
    pub failed: bool,
    /// Failure description when `failed` is set.
    #[serde(default)]
    pub failure_reason: String,
    /// Captured output metadata, if the action produced any.
    #[serde(default)]
    pub result: String,
}

/// A container-port to host-port mapping observed on a running container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Port the process listens on inside the container.
    pub container_port: u16,
    /// Host port the executor mapped it to.
    pub host_port: u16,
}

/// A container as reported by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Stable identity of the unit of work.
    pub identity: ContainerIdentity,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Free-form key/value tags; the agent requires the [`tags`] subset.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Resources reserved for this container.
    #[serde(default)]
    pub resources: Resources,
    /// Observed port mappings, populated once running.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Outcome, populated once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_result: Option<RunResult>,
}

impl Container {
    /// Returns the value of a tag, if present.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the container's lifecycle tag, if present.
    #[must_use]
    pub fn lifecycle(&self) -> Option<&str> {
        self.tag(tags::LIFECYCLE)
    }

    /// Parses the LRP metadata tags, returning `None` when any is missing
    /// or malformed.
    #[must_use]
    pub fn lrp_meta(&self) -> Option<LrpContainerMeta> {
        let process_id = ProcessId::new(self.tag(tags::PROCESS_ID)?);
        let instance_id = InstanceId::new(self.tag(tags::INSTANCE_ID)?);
        let index = self.tag(tags::INDEX)?.parse().ok()?;
        let domain = self.tag(tags::DOMAIN)?.to_string();
        Some(LrpContainerMeta {
            process_id,
            instance_id,
            index,
            domain,
        })
    }
}

/// LRP metadata recovered from a container's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrpContainerMeta {
    /// The process the container serves.
    pub process_id: ProcessId,
    /// The attempt the container serves.
    pub instance_id: InstanceId,
    /// The slot index.
    pub index: i32,
    /// The domain the process belongs to.
    pub domain: String,
}

/// Reservation request sent to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Identity the container will carry.
    pub identity: ContainerIdentity,
    /// Tags to stamp on the container.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Resources to reserve.
    pub resources: Resources,
    /// Root filesystem the container boots from.
    pub root_fs: String,
    /// Container ports to expose; host ports are assigned by the executor.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Opaque action payload executed inside the container.
    #[serde(default)]
    pub action: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lrp_container() -> Container {
        let mut container_tags = BTreeMap::new();
        container_tags.insert(tags::LIFECYCLE.to_string(), tags::LRP_LIFECYCLE.to_string());
        container_tags.insert(tags::PROCESS_ID.to_string(), "proc-1".to_string());
        container_tags.insert(tags::INSTANCE_ID.to_string(), "inst-1".to_string());
        container_tags.insert(tags::INDEX.to_string(), "2".to_string());
        container_tags.insert(tags::DOMAIN.to_string(), "apps".to_string());
        Container {
            identity: ContainerIdentity::new("proc-1-inst-1"),
            state: ContainerState::Running,
            tags: container_tags,
            resources: Resources::new(64, 64, 1),
            ports: vec![],
            run_result: None,
        }
    }

    #[test]
    fn lrp_meta_parses_required_tags() {
        let meta = lrp_container().lrp_meta().expect("meta");
        assert_eq!(meta.process_id.as_str(), "proc-1");
        assert_eq!(meta.instance_id.as_str(), "inst-1");
        assert_eq!(meta.index, 2);
        assert_eq!(meta.domain, "apps");
    }

    #[test]
    fn lrp_meta_requires_every_tag() {
        let mut container = lrp_container();
        container.tags.remove(tags::INDEX);
        assert!(container.lrp_meta().is_none());
    }

    #[test]
    fn lrp_meta_rejects_unparseable_index() {
        let mut container = lrp_container();
        container
            .tags
            .insert(tags::INDEX.to_string(), "two".to_string());
        assert!(container.lrp_meta().is_none());
    }

    #[test]
    fn starting_states() {
        assert!(ContainerState::Reserved.is_starting());
        assert!(ContainerState::Initializing.is_starting());
        assert!(ContainerState::Created.is_starting());
        assert!(!ContainerState::Running.is_starting());
        assert!(!ContainerState::Completed.is_starting());
    }

    #[test]
    fn container_state_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerState::Initializing).expect("serialize");
        assert_eq!(json, "\"initializing\"");
    }
}
