//! Executor event stream consumer.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;

use corral_core::error::Result;
use corral_core::ExecutorClient;

use crate::operations::{Generator, OperationQueue};

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(16);

/// Consumes the executor's push events and turns them into operations.
///
/// A single worker owns the subscription. When the stream ends
/// unexpectedly the subscription restarts with bounded exponential
/// backoff; the shutdown signal exits cleanly.
pub struct EventConsumer {
    executor: Arc<dyn ExecutorClient>,
    generator: Arc<Generator>,
    queue: Arc<OperationQueue>,
}

impl EventConsumer {
    /// Creates an event consumer.
    #[must_use]
    pub fn new(
        executor: Arc<dyn ExecutorClient>,
        generator: Arc<Generator>,
        queue: Arc<OperationQueue>,
    ) -> Self {
        Self {
            executor,
            generator,
            queue,
        }
    }

    /// Runs until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut backoff = BACKOFF_BASE;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            match self.executor.subscribe().await {
                Ok(mut stream) => {
                    tracing::info!("subscribed to executor events");
                    backoff = BACKOFF_BASE;
                    loop {
                        tokio::select! {
                            event = stream.next() => match event {
                                Some(Ok(event)) => {
                                    tracing::debug!(
                                        event = event.name(),
                                        identity = %event.container().identity,
                                        "executor event"
                                    );
                                    if let Some(operation) =
                                        self.generator.operation_from_event(&event)
                                    {
                                        self.queue.push(operation);
                                    }
                                }
                                Some(Err(err)) => {
                                    tracing::warn!(error = %err, "event stream failed");
                                    break;
                                }
                                None => {
                                    tracing::warn!("event stream ended");
                                    break;
                                }
                            },
                            _ = shutdown.changed() => {
                                tracing::info!("event consumer stopped");
                                return Ok(());
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "event subscription failed");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => return Ok(()),
            }
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }
}
