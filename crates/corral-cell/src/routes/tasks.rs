//! Task operator routes.
//!
//! ## Routes
//!
//! - `POST /tasks/{task_id}/cancel` - Cancel one task; 202

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;

use corral_core::identity::TaskId;

use crate::operations::CancelTaskOperation;
use crate::server::AppState;

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/:task_id/cancel", post(cancel_task))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> StatusCode {
    let task_id = TaskId::new(task_id);
    tracing::info!(task_id = %task_id, "enqueueing task cancel");
    state.queue.push(Box::new(CancelTaskOperation::new(
        task_id,
        state.bbs.clone(),
        state.delegate.clone(),
    )));
    StatusCode::ACCEPTED
}
