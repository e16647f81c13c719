//! Evacuation: the graceful-drain state machine.
//!
//! `POST /evacuate` flips a process-wide monotonic flag. While it is set,
//! the bulker polls faster, the LRP processor evacuates instead of
//! converging, and the auction representative refuses new work. The
//! controller waits for the bulker's drained notification or the
//! evacuation timeout, then asks the supervisor to exit. Work not drained
//! within the timeout is surrendered to BBS convergence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use corral_core::error::Result;

use crate::supervisor::ExitRequest;

/// Process-wide evacuation flag. Set exactly once; readable anywhere
/// without locking.
#[derive(Debug, Default)]
pub struct EvacuationFlag(AtomicBool);

impl EvacuationFlag {
    /// Creates an unset flag.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Sets the flag. Monotonic: there is no way back.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once evacuation has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How an evacuation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvacuationOutcome {
    /// All local work left the cell before the deadline.
    Drained,
    /// The deadline passed with work remaining; the BBS takes over.
    TimedOut,
}

/// Shared handle for triggering evacuation and reporting drain.
pub struct EvacuationHandle {
    flag: Arc<EvacuationFlag>,
    trigger: watch::Sender<bool>,
    drained: watch::Sender<bool>,
}

impl EvacuationHandle {
    /// Requests evacuation. Safe to call more than once.
    pub fn evacuate(&self) {
        self.flag.set();
        let _ = self.trigger.send(true);
    }

    /// Reports that no local work remains. Called by the bulker.
    pub fn signal_drained(&self) {
        let _ = self.drained.send(true);
    }

    /// Returns true once evacuation has been requested.
    #[must_use]
    pub fn is_evacuating(&self) -> bool {
        self.flag.is_set()
    }
}

/// Waits out one evacuation and requests process exit when it ends.
pub struct EvacuationController {
    timeout: Duration,
    trigger: watch::Receiver<bool>,
    drained: watch::Receiver<bool>,
}

impl EvacuationController {
    /// Creates the controller and its shared handle.
    #[must_use]
    pub fn new(flag: Arc<EvacuationFlag>, timeout: Duration) -> (Self, Arc<EvacuationHandle>) {
        let (trigger_tx, trigger_rx) = watch::channel(false);
        let (drained_tx, drained_rx) = watch::channel(false);
        let controller = Self {
            timeout,
            trigger: trigger_rx,
            drained: drained_rx,
        };
        let handle = Arc::new(EvacuationHandle {
            flag,
            trigger: trigger_tx,
            drained: drained_tx,
        });
        (controller, handle)
    }

    /// Runs until shutdown or until an evacuation completes, in which case
    /// an exit request is sent to the supervisor.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        exit: mpsc::Sender<ExitRequest>,
    ) -> Result<()> {
        if !*self.trigger.borrow_and_update() {
            tokio::select! {
                changed = self.trigger.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
        if *shutdown.borrow() {
            return Ok(());
        }

        tracing::info!(timeout_secs = self.timeout.as_secs(), "evacuation started");

        let outcome = if *self.drained.borrow_and_update() {
            EvacuationOutcome::Drained
        } else {
            tokio::select! {
                changed = self.drained.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    EvacuationOutcome::Drained
                }
                () = tokio::time::sleep(self.timeout) => EvacuationOutcome::TimedOut,
                _ = shutdown.changed() => return Ok(()),
            }
        };

        match outcome {
            EvacuationOutcome::Drained => tracing::info!("evacuation drained"),
            EvacuationOutcome::TimedOut => {
                tracing::warn!("evacuation timed out; surrendering remaining work");
            }
        }
        let _ = exit.send(ExitRequest::Evacuated { outcome }).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(
        timeout: Duration,
    ) -> (
        EvacuationController,
        Arc<EvacuationHandle>,
        watch::Sender<bool>,
        watch::Receiver<bool>,
        mpsc::Sender<ExitRequest>,
        mpsc::Receiver<ExitRequest>,
    ) {
        let flag = Arc::new(EvacuationFlag::new());
        let (controller, handle) = EvacuationController::new(flag, timeout);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = mpsc::channel(1);
        (controller, handle, shutdown_tx, shutdown_rx, exit_tx, exit_rx)
    }

    #[test]
    fn flag_is_monotonic() {
        let flag = EvacuationFlag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set();
        assert!(flag.is_set());
    }

    #[tokio::test]
    async fn drained_evacuation_requests_exit() {
        let (controller, handle, _shutdown_tx, shutdown_rx, exit_tx, mut exit_rx) =
            harness(Duration::from_secs(60));

        let task = tokio::spawn(controller.run(shutdown_rx, exit_tx));
        handle.evacuate();
        assert!(handle.is_evacuating());
        handle.signal_drained();

        let request = exit_rx.recv().await.expect("exit request");
        assert!(matches!(
            request,
            ExitRequest::Evacuated {
                outcome: EvacuationOutcome::Drained
            }
        ));
        task.await.expect("join").expect("run");
    }

    #[tokio::test]
    async fn stuck_evacuation_times_out() {
        let (controller, handle, _shutdown_tx, shutdown_rx, exit_tx, mut exit_rx) =
            harness(Duration::from_millis(50));

        let task = tokio::spawn(controller.run(shutdown_rx, exit_tx));
        handle.evacuate();

        let request = exit_rx.recv().await.expect("exit request");
        assert!(matches!(
            request,
            ExitRequest::Evacuated {
                outcome: EvacuationOutcome::TimedOut
            }
        ));
        task.await.expect("join").expect("run");
    }

    #[tokio::test]
    async fn shutdown_before_evacuation_exits_cleanly() {
        let (controller, _handle, shutdown_tx, shutdown_rx, exit_tx, mut exit_rx) =
            harness(Duration::from_secs(60));

        let task = tokio::spawn(controller.run(shutdown_rx, exit_tx));
        shutdown_tx.send(true).expect("send shutdown");
        task.await.expect("join").expect("run");
        assert!(exit_rx.try_recv().is_err(), "no exit request on plain shutdown");
    }
}
