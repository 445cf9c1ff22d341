//! Log API Handlers
//!
//! Streams a build's log lines as Server-Sent Events. Each line becomes one
//! event named after its kind, with the sequence number as the event id.
//! A subscriber that fell behind gets a comment saying how much it missed,
//! and the stream ends with an `end` event carrying the build id.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use dockyard_core::domain::build::BuildId;
use dockyard_core::domain::log::LogLine;
use dockyard_runner::{LogSubscriber, RecvError};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::build_service::BuildServiceError;

/// GET /logs/{build_id}
/// Replay a build's retained log, then follow it live until it ends
pub async fn stream_logs(
    State(state): State<AppState>,
    Path(build_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let build_id = BuildId::from(build_id);
    tracing::debug!("Subscribing to logs of build {}", build_id);

    let subscriber = state.builds.subscribe(build_id).map_err(|e| match e {
        BuildServiceError::NotFound(id) => ApiError::NotFound(format!("Build {} not found", id)),
        BuildServiceError::ValidationError(msg) => ApiError::BadRequest(msg),
    })?;

    Ok(log_stream(build_id, subscriber))
}

/// Turns a subscriber into an SSE response
pub fn log_stream(
    build_id: BuildId,
    subscriber: LogSubscriber,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream::unfold(Some(subscriber), move |subscriber| async move {
        let mut subscriber = subscriber?;

        let event = match subscriber.recv().await {
            Ok(Some(line)) => line_event(&line),
            Err(RecvError::Lagged(missed)) => {
                Event::default().comment(format!("missed {} lines", missed))
            }
            Ok(None) => {
                let end = Event::default().event("end").data(build_id.to_string());
                return Some((Ok::<_, Infallible>(end), None));
            }
        };

        Some((Ok::<_, Infallible>(event), Some(subscriber)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn line_event(line: &LogLine) -> Event {
    Event::default()
        .event(line.kind.as_str())
        .id(line.seq.to_string())
        .data(&line.message)
}
