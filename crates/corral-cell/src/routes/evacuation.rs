//! Evacuation trigger and liveness probe.
//!
//! ## Routes
//!
//! - `POST /evacuate` - Start draining; responds 202 with the ping path
//! - `GET  /ping` - Liveness probe used while the drain proceeds

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::server::AppState;

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/evacuate", post(evacuate))
        .route("/ping", get(ping))
}

/// Response body of `POST /evacuate`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvacuateResponse {
    /// Path callers poll while the cell drains.
    pub ping_path: &'static str,
}

async fn evacuate(State(state): State<Arc<AppState>>) -> (StatusCode, Json<EvacuateResponse>) {
    tracing::info!(cell_id = %state.cell_id, "evacuation requested");
    state.evacuation.evacuate();
    (
        StatusCode::ACCEPTED,
        Json(EvacuateResponse { ping_path: "/ping" }),
    )
}

async fn ping() -> StatusCode {
    StatusCode::OK
}
