//! Deploy API Handlers
//!
//! HTTP endpoints that start builds.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
};
use dockyard_core::domain::build::{BuildId, BuildRequest};
use dockyard_core::dto::build::DeployResponse;
use dockyard_runner::LogSubscriber;
use futures::Stream;
use std::convert::Infallible;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::api::logs::log_stream;
use crate::service::build_service::BuildServiceError;

/// POST /deploy
/// Start a build in the background and point the caller at its logs
pub async fn deploy(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> ApiResult<(StatusCode, Json<DeployResponse>)> {
    tracing::info!("Deploy requested for {}", req.repo_url);

    let (build_id, _) = launch(&state, req)?;

    Ok((StatusCode::ACCEPTED, Json(DeployResponse::accepted(build_id))))
}

/// POST /build-stream
/// Start a build and stream its whole log in the response
pub async fn build_stream(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    tracing::info!("Streaming build requested for {}", req.repo_url);

    let (build_id, subscriber) = launch(&state, req)?;

    Ok(log_stream(build_id, subscriber))
}

fn launch(state: &AppState, req: BuildRequest) -> ApiResult<(BuildId, LogSubscriber)> {
    state.builds.launch(req).map_err(|e| match e {
        BuildServiceError::ValidationError(msg) => ApiError::BadRequest(msg),
        BuildServiceError::NotFound(id) => ApiError::NotFound(format!("Build {} not found", id)),
    })
}
