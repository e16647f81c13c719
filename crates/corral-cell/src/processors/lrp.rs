//! Reconciliation of one LRP slot attempt on this cell.

use std::sync::Arc;
use std::time::Duration;

use corral_core::container::{Container, ContainerState};
use corral_core::error::{Error, Result};
use corral_core::identity::{CellId, ContainerIdentity, ProcessId};
use corral_core::lrp::{ActualLrp, ActualLrpState, LrpInstanceKey, LrpNetInfo};
use corral_core::BbsClient;

use crate::delegate::ContainerDelegate;
use crate::evacuation::EvacuationFlag;

/// Reconciles one `(process-id, index)` slot against its local container.
///
/// The row/column decision table:
/// - a container with no instance row, or a row owned by another cell,
///   means the container is destroyed;
/// - an unclaimed row with a live local container means this cell claims
///   the slot and runs (or reports) the container;
/// - a claimed or running row owned here converges the container toward
///   Running and keeps the BBS net info current;
/// - completed containers report a crash (or an unclaim when the instance
///   never ran) and are destroyed;
/// - in evacuation mode, running work is copied into an evacuating shadow
///   row before the container is destroyed, so the placement system can
///   re-place it.
pub struct LrpProcessor {
    cell_id: CellId,
    lrp_host: String,
    evacuation_ttl: Duration,
    bbs: Arc<dyn BbsClient>,
    delegate: Arc<ContainerDelegate>,
    evacuating: Arc<EvacuationFlag>,
}

impl LrpProcessor {
    /// Creates a processor for this cell.
    #[must_use]
    pub fn new(
        cell_id: CellId,
        lrp_host: String,
        evacuation_ttl: Duration,
        bbs: Arc<dyn BbsClient>,
        delegate: Arc<ContainerDelegate>,
        evacuating: Arc<EvacuationFlag>,
    ) -> Self {
        Self {
            cell_id,
            lrp_host,
            evacuation_ttl,
            bbs,
            delegate,
            evacuating,
        }
    }

    /// Runs one reconciliation for the slot behind `identity`.
    pub async fn process(
        &self,
        identity: &ContainerIdentity,
        process_id: &ProcessId,
        index: i32,
    ) -> Result<()> {
        let group = self
            .bbs
            .actual_lrp_group_by_process_index(process_id, index)
            .await?
            .unwrap_or_default();
        let container = match self.delegate.get_container(identity).await {
            Ok(container) => Some(container),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        match group.instance.as_ref() {
            None => self.handle_missing_row(identity, container.as_ref()).await,
            Some(row) => match row.state {
                ActualLrpState::Unclaimed => {
                    self.handle_unclaimed(identity, row, container.as_ref()).await
                }
                ActualLrpState::Crashed => {
                    self.handle_missing_row(identity, container.as_ref()).await
                }
                ActualLrpState::Claimed | ActualLrpState::Running
                    if !row.is_on_cell(&self.cell_id)
                        || row.container_identity().as_ref() != Some(identity) =>
                {
                    // The slot belongs elsewhere (or to a different attempt);
                    // a local container at this identity is stale.
                    self.handle_missing_row(identity, container.as_ref()).await
                }
                ActualLrpState::Claimed => {
                    self.handle_claimed_here(identity, row, container.as_ref()).await
                }
                ActualLrpState::Running => {
                    if self.evacuating.is_set() {
                        self.handle_evacuating(identity, row, container.as_ref()).await
                    } else {
                        self.handle_running_here(identity, row, container.as_ref()).await
                    }
                }
            },
        }
    }

    /// No row (or a foreign/terminal row): any local container is an orphan.
    async fn handle_missing_row(
        &self,
        identity: &ContainerIdentity,
        container: Option<&Container>,
    ) -> Result<()> {
        if container.is_some() {
            self.delegate.delete_container(identity).await?;
        }
        Ok(())
    }

    async fn handle_unclaimed(
        &self,
        identity: &ContainerIdentity,
        row: &ActualLrp,
        container: Option<&Container>,
    ) -> Result<()> {
        let Some(container) = container else {
            return Ok(());
        };
        if self.evacuating.is_set() {
            // Never claim new work while draining.
            return self.delegate.delete_container(identity).await;
        }
        let Some(meta) = container.lrp_meta() else {
            tracing::warn!(identity = %identity, "lrp container is missing metadata tags");
            return Ok(());
        };
        let instance = LrpInstanceKey {
            instance_id: meta.instance_id,
            cell_id: self.cell_id.clone(),
        };

        match container.state {
            ContainerState::Reserved | ContainerState::Initializing | ContainerState::Created => {
                if self.claim(row, &instance).await? {
                    self.delegate.run_container(identity).await?;
                }
                Ok(())
            }
            ContainerState::Running => {
                if self.claim(row, &instance).await? {
                    self.bbs
                        .start_actual_lrp(&row.key, &instance, &self.observed_net_info(container))
                        .await?;
                }
                Ok(())
            }
            ContainerState::Completed => {
                self.crash(row, &instance, container).await?;
                self.delegate.delete_container(identity).await
            }
        }
    }

    async fn handle_claimed_here(
        &self,
        identity: &ContainerIdentity,
        row: &ActualLrp,
        container: Option<&Container>,
    ) -> Result<()> {
        let Some(instance) = row.instance.clone() else {
            return Ok(());
        };
        match container {
            None => self.bbs.unclaim_actual_lrp(&row.key, &instance).await,
            Some(container) => match container.state {
                ContainerState::Reserved
                | ContainerState::Initializing
                | ContainerState::Created => self.delegate.run_container(identity).await,
                ContainerState::Running => {
                    self.bbs
                        .start_actual_lrp(&row.key, &instance, &self.observed_net_info(container))
                        .await
                }
                ContainerState::Completed => {
                    let failed = container
                        .run_result
                        .as_ref()
                        .is_some_and(|result| result.failed);
                    if failed {
                        self.crash(row, &instance, container).await?;
                    } else {
                        // The instance never ran; give the slot back.
                        self.bbs.unclaim_actual_lrp(&row.key, &instance).await?;
                    }
                    self.delegate.delete_container(identity).await
                }
            },
        }
    }

    async fn handle_running_here(
        &self,
        identity: &ContainerIdentity,
        row: &ActualLrp,
        container: Option<&Container>,
    ) -> Result<()> {
        let Some(instance) = row.instance.clone() else {
            return Ok(());
        };
        match container {
            None => self.bbs.unclaim_actual_lrp(&row.key, &instance).await,
            Some(container) => match container.state {
                ContainerState::Reserved
                | ContainerState::Initializing
                | ContainerState::Created => self.delegate.run_container(identity).await,
                ContainerState::Running => {
                    let observed = self.observed_net_info(container);
                    if row.net_info.as_ref() != Some(&observed) {
                        self.bbs.start_actual_lrp(&row.key, &instance, &observed).await?;
                    }
                    Ok(())
                }
                ContainerState::Completed => {
                    self.crash(row, &instance, container).await?;
                    self.delegate.delete_container(identity).await
                }
            },
        }
    }

    /// Evacuation mode: copy the running work into an evacuating shadow
    /// before destroying the container. A crash during the drain clears
    /// the shadow instead; the slot restarts through the normal path.
    async fn handle_evacuating(
        &self,
        identity: &ContainerIdentity,
        row: &ActualLrp,
        container: Option<&Container>,
    ) -> Result<()> {
        let Some(instance) = row.instance.clone() else {
            return Ok(());
        };
        match container {
            Some(container) if container.state == ContainerState::Completed => {
                self.bbs
                    .remove_evacuating_actual_lrp(&row.key, &instance)
                    .await?;
                self.crash(row, &instance, container).await?;
                self.delegate.delete_container(identity).await
            }
            Some(container) => {
                let net_info = if container.state == ContainerState::Running {
                    Some(self.observed_net_info(container))
                } else {
                    row.net_info.clone()
                };
                self.bbs
                    .evacuate_actual_lrp(&row.key, &instance, net_info.as_ref(), self.evacuation_ttl)
                    .await?;
                self.delegate.delete_container(identity).await
            }
            None => {
                self.bbs
                    .evacuate_actual_lrp(
                        &row.key,
                        &instance,
                        row.net_info.as_ref(),
                        self.evacuation_ttl,
                    )
                    .await
            }
        }
    }

    /// Claims the slot; a lost claim race is not an error, the next cycle
    /// re-derives truth. Returns whether the claim held.
    async fn claim(&self, row: &ActualLrp, instance: &LrpInstanceKey) -> Result<bool> {
        match self.bbs.claim_actual_lrp(&row.key, instance).await {
            Ok(()) => Ok(true),
            Err(Error::StateConflict { message }) => {
                tracing::info!(
                    process_id = %row.key.process_id,
                    index = row.key.index,
                    message = %message,
                    "lost claim race"
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn crash(
        &self,
        row: &ActualLrp,
        instance: &LrpInstanceKey,
        container: &Container,
    ) -> Result<()> {
        let reason = container
            .run_result
            .as_ref()
            .filter(|result| !result.failure_reason.is_empty())
            .map_or("instance completed unexpectedly", |result| {
                result.failure_reason.as_str()
            });
        match self.bbs.crash_actual_lrp(&row.key, instance, reason).await {
            Ok(()) => Ok(()),
            Err(Error::StateConflict { message }) => {
                tracing::info!(
                    process_id = %row.key.process_id,
                    index = row.key.index,
                    message = %message,
                    "crash report superseded"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn observed_net_info(&self, container: &Container) -> LrpNetInfo {
        LrpNetInfo {
            host: self.lrp_host.clone(),
            ports: container.ports.clone(),
        }
    }
}
