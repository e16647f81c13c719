//! Strongly-typed identifiers for Corral entities.
//!
//! All identifiers are string-backed newtypes so that cell, process, task,
//! instance, and container identities cannot be confused at compile time.
//! Generated instance identifiers are ULIDs: lexicographically sortable and
//! globally unique without coordination.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies one worker host. Every record the agent owns is scoped to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Creates a cell ID from the configured identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifies a long-running process; one process has many indexed slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Creates a process ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifies a one-shot task. Doubles as the task's container identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifies one attempt at running an LRP slot.
///
/// A slot keeps its `(process-id, index)` across restarts; each attempt gets
/// a fresh instance ID so stale containers can never be mistaken for the
/// current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Creates an instance ID from an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new unique instance ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The stable identity of one unit of local work.
///
/// For tasks the identity equals the task ID. For LRPs it is the
/// deterministic composition `<process-id>-<instance-id>`, so the same
/// attempt always maps to the same executor container. The composition is
/// not parsed back; LRP metadata travels in container tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerIdentity(String);

impl ContainerIdentity {
    /// Creates an identity from a raw string (e.g. an executor report).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity of a task's container.
    #[must_use]
    pub fn for_task(task_id: &TaskId) -> Self {
        Self(task_id.as_str().to_string())
    }

    /// Returns the identity of an LRP attempt's container.
    #[must_use]
    pub fn for_lrp(process_id: &ProcessId, instance_id: &InstanceId) -> Self {
        Self(format!("{process_id}-{instance_id}"))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerIdentity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lrp_identity_composes_process_and_instance() {
        let identity =
            ContainerIdentity::for_lrp(&ProcessId::new("proc-1"), &InstanceId::new("inst-9"));
        assert_eq!(identity.as_str(), "proc-1-inst-9");
    }

    #[test]
    fn task_identity_equals_task_id() {
        let identity = ContainerIdentity::for_task(&TaskId::new("t-1"));
        assert_eq!(identity.as_str(), "t-1");
    }

    #[test]
    fn generated_instance_ids_are_unique() {
        assert_ne!(InstanceId::generate(), InstanceId::generate());
    }

    #[test]
    fn identity_serializes_transparently() {
        let identity = ContainerIdentity::new("t-1");
        let json = serde_json::to_string(&identity).expect("serialize");
        assert_eq!(json, "\"t-1\"");
    }
}
