//! Container delegate: executor verbs with per-verb logging.
//!
//! The delegate is the only path processors use to touch containers. Every
//! verb logs start and outcome with the container identity; errors are
//! returned uninterpreted so the processor decides policy. Deleting an
//! already-gone container is success.

use std::collections::BTreeMap;
use std::sync::Arc;

use corral_core::container::Container;
use corral_core::error::Result;
use corral_core::identity::ContainerIdentity;
use corral_core::ExecutorClient;

/// Thin capability object over the executor verbs the processors use.
pub struct ContainerDelegate {
    executor: Arc<dyn ExecutorClient>,
}

impl ContainerDelegate {
    /// Wraps an executor client.
    #[must_use]
    pub fn new(executor: Arc<dyn ExecutorClient>) -> Self {
        Self { executor }
    }

    /// Fetches one container.
    pub async fn get_container(&self, identity: &ContainerIdentity) -> Result<Container> {
        tracing::debug!(identity = %identity, "fetching container");
        match self.executor.get_container(identity).await {
            Ok(container) => Ok(container),
            Err(err) => {
                if !err.is_not_found() {
                    tracing::error!(identity = %identity, error = %err, "failed to fetch container");
                }
                Err(err)
            }
        }
    }

    /// Lists containers matching the given tags.
    pub async fn list_containers(
        &self,
        tags: &BTreeMap<String, String>,
    ) -> Result<Vec<Container>> {
        tracing::debug!("listing containers");
        match self.executor.list_containers(tags).await {
            Ok(containers) => Ok(containers),
            Err(err) => {
                tracing::error!(error = %err, "failed to list containers");
                Err(err)
            }
        }
    }

    /// Triggers initialization and run of a reserved container.
    pub async fn run_container(&self, identity: &ContainerIdentity) -> Result<()> {
        tracing::info!(identity = %identity, "running container");
        match self.executor.run_container(identity).await {
            Ok(()) => {
                tracing::info!(identity = %identity, "container running");
                Ok(())
            }
            Err(err) => {
                tracing::error!(identity = %identity, error = %err, "failed to run container");
                Err(err)
            }
        }
    }

    /// Requests a graceful stop.
    pub async fn stop_container(&self, identity: &ContainerIdentity) -> Result<()> {
        tracing::info!(identity = %identity, "stopping container");
        match self.executor.stop_container(identity).await {
            Ok(()) => {
                tracing::info!(identity = %identity, "container stop accepted");
                Ok(())
            }
            Err(err) => {
                tracing::error!(identity = %identity, error = %err, "failed to stop container");
                Err(err)
            }
        }
    }

    /// Destroys a container and releases its resources. An already-deleted
    /// container is success.
    pub async fn delete_container(&self, identity: &ContainerIdentity) -> Result<()> {
        tracing::info!(identity = %identity, "deleting container");
        match self.executor.delete_container(identity).await {
            Ok(()) => {
                tracing::info!(identity = %identity, "container deleted");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                tracing::info!(identity = %identity, "container already deleted");
                Ok(())
            }
            Err(err) => {
                tracing::error!(identity = %identity, error = %err, "failed to delete container");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use corral_core::resources::Resources;
    use corral_test_utils::FakeExecutor;

    #[tokio::test]
    async fn delete_treats_missing_container_as_success() {
        let executor = Arc::new(FakeExecutor::new(Resources::new(1024, 1024, 4)));
        let delegate = ContainerDelegate::new(executor.clone());

        delegate
            .delete_container(&ContainerIdentity::new("gone"))
            .await
            .expect("missing container is success");
        assert_eq!(executor.calls(), vec!["delete:gone".to_string()]);
    }

    #[tokio::test]
    async fn get_propagates_not_found() {
        let executor = Arc::new(FakeExecutor::new(Resources::new(1024, 1024, 4)));
        let delegate = ContainerDelegate::new(executor);

        let err = delegate
            .get_container(&ContainerIdentity::new("gone"))
            .await
            .expect_err("missing container");
        assert!(err.is_not_found());
    }
}
