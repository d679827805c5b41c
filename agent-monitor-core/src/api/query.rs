//! Read-only snapshot endpoints

use super::{error_response, AppState};
use crate::event::Event;
use crate::store::SNAPSHOT_LIMIT;
use crate::transcript::{CacheState, TranscriptCache, TranscriptView};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

const NO_TRANSCRIPT: &str = "no transcript found yet";

#[derive(Serialize)]
struct EventsBody<'a> {
    events: Vec<&'a Event>,
}

pub(super) async fn recent_events(State(state): State<AppState>) -> Response {
    let snapshot = state.store.snapshot(SNAPSHOT_LIMIT);
    let body = EventsBody {
        events: snapshot.iter().map(|e| &**e).collect(),
    };
    Json(body).into_response()
}

pub(super) async fn stats(State(state): State<AppState>) -> Response {
    Json(state.store.stats()).into_response()
}

pub(super) async fn usage(State(state): State<AppState>) -> Response {
    let path = state.store.transcript_path();
    transcript_response(read_view(Arc::clone(&state.usage), path).await)
}

pub(super) async fn conversation(State(state): State<AppState>) -> Response {
    let path = state.store.transcript_path();
    transcript_response(read_view(Arc::clone(&state.conversation), path).await)
}

pub(super) async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "ok": true,
        "events": state.store.len(),
        "subscribers": state.hub.subscriber_count(),
    }))
    .into_response()
}

/// Run the (blocking) cache refresh off the async workers.
async fn read_view<V: TranscriptView>(
    cache: Arc<TranscriptCache<V>>,
    path: Option<PathBuf>,
) -> CacheState<V> {
    if path.is_none() {
        return CacheState::Unavailable;
    }

    match tokio::task::spawn_blocking(move || cache.get(path.as_deref())).await {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(kind = V::KIND, error = %e, "Transcript refresh task failed");
            CacheState::Unavailable
        }
    }
}

fn transcript_response<V: Serialize>(state: CacheState<V>) -> Response {
    match state.into_value() {
        Some(view) => Json(&*view).into_response(),
        None => error_response(StatusCode::NOT_FOUND, NO_TRANSCRIPT),
    }
}
