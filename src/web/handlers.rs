//! HTTP handlers: thin translations between the orchestrator/registry API
//! and axum request/response types. No business logic lives here.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::errors::{ProducerError, RuntimeError, SchedulingError};

use super::AppState;

const NO_CACHE_HEADERS: [(header::HeaderName, &str); 3] = [
    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    (header::PRAGMA, "no-cache"),
    (header::EXPIRES, "0"),
];

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Ready iff the database pool answers and the session registry exists —
/// both are constructed before the listener binds, so this is really a
/// database round-trip check.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(state.database.pool()).await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "ready": true }))),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "ready": false })))
        }
    }
}

pub async fn channel_list_m3u(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let channels = state.database.list_channels().await.map_err(|e| {
        tracing::error!(error = %e, "failed to list channels");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut body = String::from("#EXTM3U\n");
    for channel in channels {
        body.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"{id}\" tvg-name=\"{id}\",{id}\n{base}/channel/{id}.ts\n",
            id = channel.id,
            base = state.base_url,
        ));
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .body(Body::from(body))
        .unwrap())
}

#[derive(Serialize)]
struct ChannelStatus {
    id: Uuid,
    name: String,
    live: bool,
    viewer_count: usize,
    converged: bool,
}

#[derive(Serialize)]
struct ChannelListResponse {
    channels: Vec<ChannelStatus>,
    metrics: crate::metrics::MetricsSnapshot,
}

pub async fn list_channels_json(State(state): State<AppState>) -> Result<Json<ChannelListResponse>, StatusCode> {
    let channels = state.database.list_channels().await.map_err(|e| {
        tracing::error!(error = %e, "failed to list channels");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut statuses = Vec::with_capacity(channels.len());
    for channel in channels {
        let session = state.registry.get(channel.id).await;
        let (live, viewer_count, converged) = match session {
            Some(session) => (session.is_live().await, session.router().subscriber_count(), session.is_converged().await),
            None => (false, 0, false),
        };
        statuses.push(ChannelStatus {
            id: channel.id,
            name: channel.name,
            live,
            viewer_count,
            converged,
        });
    }

    Ok(Json(ChannelListResponse {
        channels: statuses,
        metrics: state.metrics.snapshot(),
    }))
}

/// Strips the `.ts` suffix expected on every channel stream path and parses
/// the remainder as the channel id.
fn parse_channel_file(channel_file: &str) -> Option<Uuid> {
    let stem = channel_file.strip_suffix(".ts")?;
    Uuid::parse_str(stem).ok()
}

pub async fn stream_channel(Path(channel_file): Path<String>, State(state): State<AppState>) -> Response {
    let Some(channel_id) = parse_channel_file(&channel_file) else {
        return (StatusCode::NOT_FOUND, "unknown channel").into_response();
    };

    let factory = state.producer_backend.factory();
    let session = state.registry.get_or_create(channel_id, factory).await;

    let viewer_id = Uuid::new_v4();
    if let Err(e) = session.tune_in(viewer_id).await {
        return producer_startup_error_response(e);
    }

    let queue = session.router().subscribe(viewer_id).await;
    let stream = ReceiverStream::new(queue).map(|chunk| Ok::<_, std::io::Error>(chunk));

    let registry = Arc::clone(&state.registry);
    let guarded = DisconnectGuard {
        stream: Some(stream),
        channel_id,
        viewer_id,
        registry,
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp2t")
        .body(Body::from_stream(guarded))
        .unwrap();
    for (name, value) in NO_CACHE_HEADERS {
        response.headers_mut().insert(name, header::HeaderValue::from_static(value));
    }
    response
}

fn producer_startup_error_response(err: RuntimeError) -> Response {
    match err {
        RuntimeError::Scheduling(SchedulingError::NoScheduleData { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "No active schedule item").into_response()
        }
        RuntimeError::Producer(ProducerError::Startup { .. }) | RuntimeError::Producer(ProducerError::Transport { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Air playout engine unavailable").into_response()
        }
        other => {
            tracing::error!(error = %other, "unexpected error starting channel session");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// Wraps the subscriber byte stream so that when the HTTP response body is
/// dropped (client disconnect, or the stream running out), the viewer is
/// removed from the session's viewer count — driving last-viewer-leaves
/// teardown the same way an explicit unsubscribe would.
struct DisconnectGuard<S> {
    stream: Option<S>,
    channel_id: Uuid,
    viewer_id: Uuid,
    registry: Arc<crate::registry::SessionRegistry>,
}

impl<S> futures::Stream for DisconnectGuard<S>
where
    S: futures::Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        match &mut self.stream {
            Some(inner) => std::pin::Pin::new(inner).poll_next(cx),
            None => std::task::Poll::Ready(None),
        }
    }
}

impl<S> Drop for DisconnectGuard<S> {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let channel_id = self.channel_id;
        let viewer_id = self.viewer_id;
        tokio::spawn(async move {
            if let Some(session) = registry.get(channel_id).await {
                session.router().unsubscribe(viewer_id).await;
                if let Err(e) = session.tune_out(viewer_id).await {
                    tracing::warn!(%channel_id, %viewer_id, error = %e, "tune_out failed on disconnect");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_channel_file() {
        let id = Uuid::new_v4();
        let file = format!("{id}.ts");
        assert_eq!(parse_channel_file(&file), Some(id));
    }

    #[test]
    fn rejects_missing_suffix() {
        let id = Uuid::new_v4();
        assert_eq!(parse_channel_file(&id.to_string()), None);
    }

    #[test]
    fn rejects_malformed_id() {
        assert_eq!(parse_channel_file("not-a-uuid.ts"), None);
    }
}
