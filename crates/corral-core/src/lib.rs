//! # corral-core
//!
//! Core abstractions for the Corral cell agent.
//!
//! This crate provides the foundational types and traits shared by the cell
//! agent components:
//!
//! - **Identifiers**: Strongly-typed IDs for cells, processes, tasks, and containers
//! - **Domain Records**: Executor containers, BBS actual LRPs and tasks
//! - **Client Traits**: Narrow interfaces over the BBS, the executor, and the
//!   coordination store
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `corral-core` is the **only** crate allowed to define shared primitives.
//! The agent crate (`corral-cell`) and the test fakes (`corral-test-utils`)
//! both depend on the contracts defined here and never on each other's
//! internals.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod auction;
pub mod bbs;
pub mod container;
pub mod coordination;
pub mod error;
pub mod executor;
pub mod identity;
pub mod lrp;
pub mod observability;
pub mod resources;
pub mod task;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use corral_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auction::{
        CellState, FailedWork, LrpStartRequest, LrpSummary, RootFsProviders, TaskStartRequest,
        TaskSummary, Work,
    };
    pub use crate::bbs::BbsClient;
    pub use crate::container::{
        Container, ContainerSpec, ContainerState, PortMapping, RunResult, tags,
    };
    pub use crate::coordination::{AcquireResult, CellPresence, CoordinationStore, RenewResult};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{ContainerEvent, EventStream, ExecutorClient, SimulationControl};
    pub use crate::identity::{CellId, ContainerIdentity, InstanceId, ProcessId, TaskId};
    pub use crate::lrp::{ActualLrp, ActualLrpGroup, ActualLrpState, LrpInstanceKey, LrpKey, LrpNetInfo};
    pub use crate::resources::Resources;
    pub use crate::task::{Task, TaskDefinition, TaskState};
}

// Re-export key types at crate root for ergonomics
pub use auction::{
    CellState, FailedWork, LrpStartRequest, LrpSummary, RootFsProviders, TaskStartRequest,
    TaskSummary, Work,
};
pub use bbs::BbsClient;
pub use container::{Container, ContainerSpec, ContainerState, PortMapping, RunResult};
pub use coordination::{AcquireResult, CellPresence, CoordinationStore, RenewResult};
pub use error::{Error, Result};
pub use executor::{ContainerEvent, EventStream, ExecutorClient, SimulationControl};
pub use identity::{CellId, ContainerIdentity, InstanceId, ProcessId, TaskId};
pub use lrp::{ActualLrp, ActualLrpGroup, ActualLrpState, LrpInstanceKey, LrpKey, LrpNetInfo};
pub use observability::{LogFormat, init_logging};
pub use resources::Resources;
pub use task::{Task, TaskDefinition, TaskState};
