//! LRP operator routes.
//!
//! ## Routes
//!
//! - `POST /lrps/{process_id}/{index}/stop` - Stop one instance; 202

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;

use corral_core::identity::ProcessId;

use crate::operations::StopLrpInstanceOperation;
use crate::server::{ApiError, AppState};

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/lrps/:process_id/:index/stop", post(stop_lrp))
}

async fn stop_lrp(
    State(state): State<Arc<AppState>>,
    Path((process_id, index)): Path<(String, i32)>,
) -> Result<StatusCode, ApiError> {
    let process_id = ProcessId::new(process_id);
    let group = state
        .bbs
        .actual_lrp_group_by_process_index(&process_id, index)
        .await?;

    let instance = group.and_then(|group| group.instance);
    match instance {
        Some(row) if row.is_on_cell(&state.cell_id) => {
            if let Some(identity) = row.container_identity() {
                tracing::info!(
                    process_id = %process_id,
                    index,
                    identity = %identity,
                    "enqueueing lrp stop"
                );
                state.queue.push(Box::new(StopLrpInstanceOperation::new(
                    identity,
                    state.delegate.clone(),
                )));
            }
        }
        _ => {
            tracing::info!(process_id = %process_id, index, "no local instance to stop");
        }
    }
    Ok(StatusCode::ACCEPTED)
}
