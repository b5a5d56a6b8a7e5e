use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use replay_bus::{Error, PipelineStatus};
use serde::Serialize;

use crate::handler::AppState;

pub fn system_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    pipeline: PipelineStatus,
    save_pending: bool,
    context_label: Option<String>,
}

async fn index() -> &'static str {
    "clipvault is running"
}

fn status_response(state: &AppState) -> StatusResponse {
    StatusResponse {
        pipeline: state.recorder.status(),
        save_pending: state.recorder.is_save_pending(),
        context_label: state.recorder.context_label(),
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(status_response(&state))
}

async fn start(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let recorder = Arc::clone(&state.recorder);
    let result = tokio::task::spawn_blocking(move || recorder.resume())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match result {
        Ok(()) => Ok(Json(status_response(&state))),
        Err(e @ (Error::InvalidState { .. } | Error::Output(_))) => {
            Err((StatusCode::CONFLICT, e.to_string()))
        }
        Err(e) => {
            log::error!("replay buffer start failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn stop(State(state): State<AppState>) -> Json<StatusResponse> {
    state.recorder.stop();
    Json(status_response(&state))
}
