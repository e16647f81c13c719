//! Presence maintainer: lease-backed cell registration.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;

use corral_core::coordination::{presence_key, AcquireResult, CellPresence, RenewResult};
use corral_core::error::Result;
use corral_core::{CoordinationStore, ExecutorClient};

use crate::metrics::names;

/// Publishes the cell's advertisement under a lease and keeps it alive.
///
/// Registration waits for the executor's first healthy capacity report.
/// The lease is renewed at half its TTL; on any loss the maintainer falls
/// back to acquisition with the retry interval. Losing the key never exits
/// the process. A graceful shutdown releases the key.
pub struct PresenceMaintainer {
    store: Arc<dyn CoordinationStore>,
    executor: Arc<dyn ExecutorClient>,
    presence: CellPresence,
    lock_ttl: Duration,
    retry_interval: Duration,
}

impl PresenceMaintainer {
    /// Creates a maintainer for this cell's advertisement.
    #[must_use]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        executor: Arc<dyn ExecutorClient>,
        presence: CellPresence,
        lock_ttl: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            presence,
            lock_ttl,
            retry_interval,
        }
    }

    /// Runs until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let key = presence_key(&self.presence.cell_id);
        let payload = serde_json::to_vec(&self.presence)?;

        if !self.wait_for_executor(&mut shutdown).await {
            return Ok(());
        }
        tracing::info!(key, "executor ready; maintaining presence");

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            match self.store.acquire(&key, &payload, self.lock_ttl).await {
                Ok(AcquireResult::Acquired { lease_token, ttl }) => {
                    tracing::info!(key, "presence registered");
                    if self.maintain_lease(&key, &lease_token, ttl, &mut shutdown).await {
                        // Graceful shutdown: release and leave.
                        let _ = self.store.release(&key, &lease_token).await;
                        tracing::info!(key, "presence released");
                        return Ok(());
                    }
                    tracing::warn!(key, "presence lost; re-acquiring");
                    continue;
                }
                Ok(AcquireResult::Held { holder }) => {
                    tracing::warn!(key, ?holder, "presence key held by another session");
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "presence acquisition failed");
                }
            }
            if self.pause(self.retry_interval, &mut shutdown).await {
                return Ok(());
            }
        }
    }

    /// Renews until the lease is lost (returns false) or shutdown arrives
    /// (returns true).
    async fn maintain_lease(
        &self,
        key: &str,
        lease_token: &str,
        ttl: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let pause_duration = (ttl / 2).max(Duration::from_millis(100));
        loop {
            if self.pause(pause_duration, shutdown).await {
                return true;
            }
            match self.store.renew(key, lease_token).await {
                Ok(RenewResult::Renewed { .. }) => {
                    counter!(names::PRESENCE_RENEWALS_TOTAL).increment(1);
                    tracing::debug!(key, "presence renewed");
                }
                Ok(RenewResult::Lost | RenewResult::InvalidToken) => return false,
                Err(err) => {
                    tracing::warn!(key, error = %err, "presence renewal failed");
                    return false;
                }
            }
        }
    }

    /// Waits for the executor to report healthy. Returns false on shutdown.
    async fn wait_for_executor(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }
            match self.executor.ping().await {
                Ok(()) => return true,
                Err(err) => {
                    tracing::debug!(error = %err, "executor not ready yet");
                }
            }
            if self.pause(self.retry_interval, shutdown).await {
                return false;
            }
        }
    }

    /// Sleeps, returning true if shutdown arrived first.
    async fn pause(&self, duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => false,
            _ = shutdown.changed() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use corral_core::auction::RootFsProviders;
    use corral_core::identity::CellId;
    use corral_core::resources::Resources;
    use corral_test_utils::{FakeCoordinationStore, FakeExecutor};

    fn presence() -> CellPresence {
        CellPresence {
            cell_id: CellId::new("cell-1"),
            rep_address: "http://10.0.0.5:1800".to_string(),
            zone: "z1".to_string(),
            root_fs_providers: RootFsProviders::default(),
        }
    }

    fn maintainer(
        store: Arc<FakeCoordinationStore>,
        executor: Arc<FakeExecutor>,
    ) -> PresenceMaintainer {
        PresenceMaintainer::new(
            store,
            executor,
            presence(),
            Duration::from_millis(200),
            Duration::from_millis(20),
        )
    }

    async fn await_presence(store: &Arc<FakeCoordinationStore>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store
                    .fetch("cells/cell-1")
                    .await
                    .expect("fetch")
                    .is_some()
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("presence registered");
    }

    #[tokio::test]
    async fn registers_once_executor_is_ready() {
        let store = Arc::new(FakeCoordinationStore::new());
        let executor = Arc::new(FakeExecutor::new(Resources::new(1024, 1024, 4)));
        executor.set_unavailable(true);

        let m = maintainer(store.clone(), executor.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { m.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(
            store.fetch("cells/cell-1").await.expect("fetch").is_none(),
            "no presence before the executor is healthy"
        );

        executor.set_unavailable(false);
        await_presence(&store).await;

        let payload = store
            .fetch("cells/cell-1")
            .await
            .expect("fetch")
            .expect("payload");
        let registered: CellPresence = serde_json::from_slice(&payload).expect("parse");
        assert_eq!(registered, presence());

        let _ = shutdown_tx.send(true);
        task.await.expect("join").expect("run");
    }

    #[tokio::test]
    async fn reregisters_after_store_restart() {
        let store = Arc::new(FakeCoordinationStore::new());
        let executor = Arc::new(FakeExecutor::new(Resources::new(1024, 1024, 4)));

        let m = maintainer(store.clone(), executor);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { m.run(shutdown_rx).await });

        await_presence(&store).await;
        store.invalidate_all();
        await_presence(&store).await;

        assert!(!task.is_finished(), "losing the key never exits the process");
        let _ = shutdown_tx.send(true);
        task.await.expect("join").expect("run");
    }

    #[tokio::test]
    async fn renews_before_expiry() {
        let store = Arc::new(FakeCoordinationStore::new());
        let executor = Arc::new(FakeExecutor::new(Resources::new(1024, 1024, 4)));

        let m = maintainer(store.clone(), executor);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { m.run(shutdown_rx).await });

        await_presence(&store).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.renewal_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("renewed");

        let _ = shutdown_tx.send(true);
        task.await.expect("join").expect("run");
    }

    #[tokio::test]
    async fn graceful_shutdown_releases_the_key() {
        let store = Arc::new(FakeCoordinationStore::new());
        let executor = Arc::new(FakeExecutor::new(Resources::new(1024, 1024, 4)));

        let m = maintainer(store.clone(), executor);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { m.run(shutdown_rx).await });

        await_presence(&store).await;
        let _ = shutdown_tx.send(true);
        task.await.expect("join").expect("run");

        assert!(
            store.fetch("cells/cell-1").await.expect("fetch").is_none(),
            "presence released on graceful exit"
        );
    }
}
