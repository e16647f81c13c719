//! Client trait for the local executor, the container backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::container::{Container, ContainerSpec};
use crate::error::Result;
use crate::identity::ContainerIdentity;
use crate::resources::Resources;

/// A push event emitted by the executor when a container changes state.
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    /// A reservation was created.
    Reserved(Container),
    /// A container finished initializing.
    Created(Container),
    /// A container's process started.
    Running(Container),
    /// A container's process exited.
    Completed(Container),
}

impl ContainerEvent {
    /// Returns the container the event describes.
    #[must_use]
    pub const fn container(&self) -> &Container {
        match self {
            Self::Reserved(c) | Self::Created(c) | Self::Running(c) | Self::Completed(c) => c,
        }
    }

    /// Returns the event name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Reserved(_) => "container-reserved",
            Self::Created(_) => "container-created",
            Self::Running(_) => "container-running",
            Self::Completed(_) => "container-completed",
        }
    }
}

/// A subscription to executor events. Ends when the executor closes the
/// stream; consumers re-subscribe with backoff.
pub type EventStream = BoxStream<'static, Result<ContainerEvent>>;

/// Narrow interface over the executor verbs the cell agent uses.
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    /// Health probe. Succeeds once the executor has capacity to report.
    async fn ping(&self) -> Result<()>;

    /// Total capacity of the host.
    async fn total_resources(&self) -> Result<Resources>;

    /// Capacity not currently reserved.
    async fn remaining_resources(&self) -> Result<Resources>;

    /// Lists containers whose tags include every entry of `tags`. An empty
    /// map lists everything.
    async fn list_containers(&self, tags: &BTreeMap<String, String>) -> Result<Vec<Container>>;

    /// Fetches one container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContainerNotFound`](crate::error::Error::ContainerNotFound)
    /// when no container exists at the identity.
    async fn get_container(&self, identity: &ContainerIdentity) -> Result<Container>;

    /// Reserves resources and creates a container in the Reserved state.
    async fn allocate_container(&self, spec: ContainerSpec) -> Result<()>;

    /// Triggers initialization and run of a reserved container. Idempotent
    /// on containers already running.
    async fn run_container(&self, identity: &ContainerIdentity) -> Result<()>;

    /// Requests a graceful stop; returns once accepted.
    async fn stop_container(&self, identity: &ContainerIdentity) -> Result<()>;

    /// Destroys a container and releases its resources.
    async fn delete_container(&self, identity: &ContainerIdentity) -> Result<()>;

    /// Subscribes to the executor's event stream.
    async fn subscribe(&self) -> Result<EventStream>;
}

/// Reset hook exposed only by simulation backends.
///
/// The HTTP surface offers `POST /sim/reset` so auction simulations can
/// return a cell to a pristine state between runs; production builds wire
/// no implementation and the endpoint reports failure.
#[async_trait]
pub trait SimulationControl: Send + Sync {
    /// Discards all local state: containers, reservations, recorded calls.
    async fn reset(&self) -> Result<()>;
}
