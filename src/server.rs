//! Ambient HTTP/WS glue, deliberately thin: spec.md §1 excludes the
//! HTTP/WebSocket surface (routes, request models, uploads, static serving)
//! from the core. This module exists only to show how a route layer would
//! hold the core's singletons and call into the orchestrator facades — it
//! is not itself part of the specified system. Grounded on the teacher's
//! `app_state.rs`/`ws.rs` idiom.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive};
use axum::response::{Response, Sse};
use axum::routing::get;
use axum::Router;
use tokio_stream::{Stream, StreamExt};

use crate::facade::Facades;
use crate::log_channel::LogChannel;
use crate::progress::EventBus;

#[derive(Clone)]
pub struct AppState {
    pub facades: Arc<Facades>,
    pub event_bus: Arc<EventBus>,
    pub log_channel: LogChannel,
}

async fn healthz() -> &'static str {
    "ok"
}

/// Tails redacted log lines as Server-Sent Events, the same shape as the
/// teacher's `LogChannel::into_sse_stream`.
async fn tail_logs(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.log_channel.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(receiver).map(|item| match item {
        Ok(line) => Ok(SseEvent::default().data(line)),
        Err(_) => Ok(SseEvent::default()),
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Streams every published progress event to one WebSocket client as JSON
/// text frames until the client disconnects or falls behind (spec.md §4.3:
/// a slow subscriber just misses events, it never blocks the bus).
async fn progress_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_progress(socket, state.event_bus))
}

async fn stream_progress(mut socket: WebSocket, event_bus: Arc<EventBus>) {
    let (id, mut rx) = event_bus.subscribe();
    while let Some(event) = rx.recv().await {
        let Ok(text) = serde_json::to_string(&event) else {
            continue;
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    event_bus.unsubscribe(id);
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws/progress", get(progress_ws))
        .route("/logs", get(tail_logs))
        .with_state(state)
}
