//! In-memory executor fake.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use corral_core::container::{Container, ContainerSpec, ContainerState, PortMapping, RunResult};
use corral_core::error::{Error, Result};
use corral_core::executor::{ContainerEvent, EventStream, SimulationControl};
use corral_core::identity::ContainerIdentity;
use corral_core::resources::Resources;
use corral_core::ExecutorClient;

struct ExecState {
    total: Resources,
    containers: BTreeMap<String, Container>,
    calls: Vec<String>,
    unavailable: bool,
}

/// An in-memory executor with call recording and manual event emission.
///
/// `run_container` moves a reserved container straight to Running and
/// assigns host ports, which is enough for reconciliation tests; tests that
/// exercise the event consumer emit events explicitly with [`FakeExecutor::emit`].
pub struct FakeExecutor {
    state: Mutex<ExecState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ContainerEvent>>>,
}

impl FakeExecutor {
    /// Creates a fake executor with the given total capacity.
    #[must_use]
    pub fn new(total: Resources) -> Self {
        Self {
            state: Mutex::new(ExecState {
                total,
                containers: BTreeMap::new(),
                calls: Vec::new(),
                unavailable: false,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExecState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns every recorded call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Returns recorded calls that mutate executor state.
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

    /// Seeds a container directly, bypassing allocation accounting checks.
    pub fn set_container(&self, container: Container) {
        let mut state = self.lock();
        state
            .containers
            .insert(container.identity.as_str().to_string(), container);
    }

    /// Returns the container at an identity, if present.
    #[must_use]
    pub fn container(&self, identity: &ContainerIdentity) -> Option<Container> {
        self.lock().containers.get(identity.as_str()).cloned()
    }

    /// Marks a container completed with the given result.
    pub fn complete_container(&self, identity: &ContainerIdentity, run_result: RunResult) {
        let mut state = self.lock();
        if let Some(container) = state.containers.get_mut(identity.as_str()) {
            container.state = ContainerState::Completed;
            container.run_result = Some(run_result);
        }
    }

    /// Pushes an event to every live subscriber.
    pub fn emit(&self, event: ContainerEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drops every live subscription, ending their streams.
    pub fn close_subscriptions(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn reserved(state: &ExecState) -> Resources {
        let mut reserved = Resources::default();
        for container in state.containers.values() {
            reserved.add(&container.resources);
        }
        reserved
    }

    fn check_available(state: &ExecState) -> Result<()> {
        if state.unavailable {
            return Err(Error::http("executor unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutorClient for FakeExecutor {
    async fn ping(&self) -> Result<()> {
        let state = self.lock();
        Self::check_available(&state)
    }

    async fn total_resources(&self) -> Result<Resources> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push("read:total-resources".to_string());
        Ok(state.total)
    }

    async fn remaining_resources(&self) -> Result<Resources> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push("read:remaining-resources".to_string());
        let mut remaining = state.total;
        remaining.subtract(&Self::reserved(&state));
        Ok(remaining)
    }

    async fn list_containers(&self, tags: &BTreeMap<String, String>) -> Result<Vec<Container>> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push("read:list-containers".to_string());
        Ok(state
            .containers
            .values()
            .filter(|container| {
                tags.iter()
                    .all(|(key, value)| container.tags.get(key) == Some(value))
            })
            .cloned()
            .collect())
    }

    async fn get_container(&self, identity: &ContainerIdentity) -> Result<Container> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("read:get:{identity}"));
        state
            .containers
            .get(identity.as_str())
            .cloned()
            .ok_or_else(|| Error::container_not_found(identity.as_str()))
    }

    async fn allocate_container(&self, spec: ContainerSpec) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("allocate:{}", spec.identity));
        if state.containers.contains_key(spec.identity.as_str()) {
            return Err(Error::state_conflict(format!(
                "container {} already exists",
                spec.identity
            )));
        }
        let mut remaining = state.total;
        remaining.subtract(&Self::reserved(&state));
        if !remaining.can_fit(&spec.resources) {
            return Err(Error::insufficient_resources(format!(
                "cannot reserve {:?}",
                spec.resources
            )));
        }
        let container = Container {
            identity: spec.identity.clone(),
            state: ContainerState::Reserved,
            tags: spec.tags,
            resources: spec.resources,
            ports: spec
                .ports
                .iter()
                .map(|&container_port| PortMapping {
                    container_port,
                    host_port: 0,
                })
                .collect(),
            run_result: None,
        };
        state
            .containers
            .insert(spec.identity.as_str().to_string(), container);
        Ok(())
    }

    async fn run_container(&self, identity: &ContainerIdentity) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("run:{identity}"));
        let container = state
            .containers
            .get_mut(identity.as_str())
            .ok_or_else(|| Error::container_not_found(identity.as_str()))?;
        if container.state == ContainerState::Running {
            return Ok(());
        }
        container.state = ContainerState::Running;
        for (offset, mapping) in container.ports.iter_mut().enumerate() {
            if mapping.host_port == 0 {
                mapping.host_port = 61000 + u16::try_from(offset).unwrap_or(0);
            }
        }
        Ok(())
    }

    async fn stop_container(&self, identity: &ContainerIdentity) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("stop:{identity}"));
        let container = state
            .containers
            .get_mut(identity.as_str())
            .ok_or_else(|| Error::container_not_found(identity.as_str()))?;
        container.state = ContainerState::Completed;
        container.run_result = Some(RunResult {
            failed: false,
            failure_reason: String::new(),
            result: String::new(),
        });
        Ok(())
    }

    async fn delete_container(&self, identity: &ContainerIdentity) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        state.calls.push(format!("delete:{identity}"));
        if state.containers.remove(identity.as_str()).is_none() {
            return Err(Error::container_not_found(identity.as_str()));
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream> {
        {
            let state = self.lock();
            Self::check_available(&state)?;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|event| (Ok::<_, Error>(event), rx))
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl SimulationControl for FakeExecutor {
    async fn reset(&self) -> Result<()> {
        let mut state = self.lock();
        state.containers.clear();
        state.calls.clear();
        state.unavailable = false;
        Ok(())
    }
}
