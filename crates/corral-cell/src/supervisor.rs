//! Process supervisor: ordered member start, signal fan-out, exit codes.
//!
//! Members run as tasks sharing one shutdown watch channel. The first of
//! these ends the process: a termination signal, an exit request (an
//! evacuation completing), or any member finishing. A member finishing
//! cleanly shuts the process down with code 0; a member error yields
//! code 1.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use corral_core::error::Result;

use crate::evacuation::EvacuationOutcome;

/// How long members get to finish after the shutdown fan-out.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// A request from a component to end the process gracefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitRequest {
    /// An evacuation ran to completion.
    Evacuated {
        /// Whether the cell drained or hit the deadline.
        outcome: EvacuationOutcome,
    },
}

/// Supervises the agent's member tasks.
pub struct Supervisor {
    shutdown: watch::Sender<bool>,
    members: JoinSet<(&'static str, Result<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Creates an empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            members: JoinSet::new(),
        }
    }

    /// Returns a receiver for the shutdown fan-out.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Starts a named member.
    pub fn spawn<F>(&mut self, name: &'static str, member: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        tracing::info!(member = name, "starting member");
        self.members.spawn(async move { (name, member.await) });
    }

    /// Runs until the process should end; returns the exit code.
    pub async fn run(mut self, mut exit_requests: mpsc::Receiver<ExitRequest>) -> i32 {
        let exit_code = tokio::select! {
            () = wait_for_signal() => {
                tracing::info!("termination signal received");
                0
            }
            request = exit_requests.recv() => {
                match request {
                    Some(ExitRequest::Evacuated { outcome }) => {
                        tracing::info!(?outcome, "exit requested");
                    }
                    None => tracing::info!("exit channel closed"),
                }
                0
            }
            joined = self.members.join_next() => match joined {
                Some(Ok((name, Ok(())))) => {
                    tracing::info!(member = name, "member exited");
                    0
                }
                Some(Ok((name, Err(err)))) => {
                    tracing::error!(member = name, error = %err, "member failed");
                    1
                }
                Some(Err(join_err)) => {
                    tracing::error!(error = %join_err, "member panicked");
                    1
                }
                None => 0,
            }
        };

        let _ = self.shutdown.send(true);
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some(joined) = self.members.join_next().await {
                if let Ok((name, Err(err))) = joined {
                    tracing::warn!(member = name, error = %err, "member failed during shutdown");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("members did not finish within the shutdown grace period");
        }

        exit_code
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    use corral_core::error::Error;

    #[tokio::test]
    async fn member_error_exits_with_code_one() {
        let mut supervisor = Supervisor::new();
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("failing", async { Err(Error::internal("boom")) });
        supervisor.spawn("idle", async move {
            let mut shutdown = shutdown;
            let _ = shutdown.changed().await;
            Ok(())
        });

        let (_exit_tx, exit_rx) = mpsc::channel(1);
        assert_eq!(supervisor.run(exit_rx).await, 1);
    }

    #[tokio::test]
    async fn clean_member_exit_shuts_down_with_code_zero() {
        let mut supervisor = Supervisor::new();
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("short-lived", async { Ok(()) });
        supervisor.spawn("idle", async move {
            let mut shutdown = shutdown;
            let _ = shutdown.changed().await;
            Ok(())
        });

        let (_exit_tx, exit_rx) = mpsc::channel(1);
        assert_eq!(supervisor.run(exit_rx).await, 0);
    }

    #[tokio::test]
    async fn exit_request_shuts_down_with_code_zero() {
        let mut supervisor = Supervisor::new();
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("idle", async move {
            let mut shutdown = shutdown;
            let _ = shutdown.changed().await;
            Ok(())
        });

        let (exit_tx, exit_rx) = mpsc::channel(1);
        exit_tx
            .send(ExitRequest::Evacuated {
                outcome: EvacuationOutcome::Drained,
            })
            .await
            .expect("send exit request");
        assert_eq!(supervisor.run(exit_rx).await, 0);
    }
}
