//! HTTP server for the cell's external surface.
//!
//! Serves the auctioneer (`/state`, `/work`), operator actions
//! (`/lrps/{process}/{index}/stop`, `/tasks/{id}/cancel`, `/evacuate`),
//! the liveness probe (`/ping`), and the simulation reset hook.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use corral_core::error::{Error, Result};
use corral_core::identity::CellId;
use corral_core::{BbsClient, SimulationControl};

use crate::auction::AuctionCellRep;
use crate::delegate::ContainerDelegate;
use crate::evacuation::EvacuationHandle;
use crate::operations::OperationQueue;
use crate::routes;

/// Shared state for all request handlers.
pub struct AppState {
    /// The cell this server speaks for.
    pub cell_id: CellId,
    /// Auction representative.
    pub rep: Arc<AuctionCellRep>,
    /// BBS client, used to resolve stop targets.
    pub bbs: Arc<dyn BbsClient>,
    /// Container delegate for stop/cancel operations.
    pub delegate: Arc<ContainerDelegate>,
    /// The per-key operation queue.
    pub queue: Arc<OperationQueue>,
    /// Evacuation trigger.
    pub evacuation: Arc<EvacuationHandle>,
    /// Present only when running against a simulation backend.
    pub sim: Option<Arc<dyn SimulationControl>>,
}

/// JSON error body returned by handlers.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    /// Human-readable message.
    pub error: String,
}

/// HTTP error with a status code and JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// The cell's HTTP server.
pub struct Server {
    state: Arc<AppState>,
    listen_addr: String,
}

impl Server {
    /// Creates a server for the given state and listen address.
    #[must_use]
    pub fn new(state: Arc<AppState>, listen_addr: impl Into<String>) -> Self {
        Self {
            state,
            listen_addr: listen_addr.into(),
        }
    }

    /// Builds the router over the given state.
    #[must_use]
    pub fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .merge(routes::auction::routes())
            .merge(routes::evacuation::routes())
            .merge(routes::lrps::routes())
            .merge(routes::tasks::routes())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serves until the shutdown signal fires.
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|err| Error::Internal {
                message: format!("failed to bind {}: {err}", self.listen_addr),
            })?;
        tracing::info!(addr = %self.listen_addr, "http server listening");

        let router = Self::router(self.state.clone());
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|err| Error::Internal {
                message: format!("http server failed: {err}"),
            })
    }
}
