//! Health Check API Handler
//!
//! Reports whether the container runtime is reachable.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::container_service::{self, ContainerServiceError};

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    container_service::health(state.builder.as_ref())
        .await
        .map_err(|e| match e {
            ContainerServiceError::RuntimeError(err) => {
                ApiError::Unavailable(format!("Container runtime unavailable: {}", err))
            }
            ContainerServiceError::NotFound(id) => {
                ApiError::NotFound(format!("Container {} not found", id))
            }
        })?;

    Ok((StatusCode::OK, "OK"))
}
