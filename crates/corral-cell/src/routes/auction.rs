//! Auction routes: cell state, work acceptance, simulation reset.
//!
//! ## Routes
//!
//! - `GET  /state` - Current `CellState` snapshot
//! - `POST /work` - Accept a bid-allocation batch; returns the failed items
//! - `POST /sim/reset` - Reset the simulation backend (500 in production)

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use corral_core::auction::{CellState, FailedWork, Work};

use crate::server::{ApiError, AppState};

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/state", get(fetch_state))
        .route("/work", post(perform_work))
        .route("/sim/reset", post(sim_reset))
}

/// Response body of `POST /work`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformResponse {
    /// Items the cell could not accept.
    pub failed_work: FailedWork,
}

async fn fetch_state(State(state): State<Arc<AppState>>) -> Result<Json<CellState>, ApiError> {
    let cell_state = state.rep.state().await?;
    Ok(Json(cell_state))
}

async fn perform_work(
    State(state): State<Arc<AppState>>,
    Json(work): Json<Work>,
) -> Result<Json<PerformResponse>, ApiError> {
    let failed_work = state.rep.perform(work).await?;
    Ok(Json(PerformResponse { failed_work }))
}

async fn sim_reset(State(state): State<Arc<AppState>>) -> Result<(), ApiError> {
    let Some(sim) = state.sim.as_ref() else {
        return Err(ApiError::internal("not running in simulation"));
    };
    sim.reset().await?;
    tracing::info!("simulation state reset");
    Ok(())
}
