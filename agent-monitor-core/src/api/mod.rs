//! HTTP surface for hooks and dashboard viewers
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /event` | stamp, store, broadcast |
//! | `GET /api/events` | 200 most recent events, oldest first |
//! | `GET /api/stats` | tool tallies and file sets |
//! | `GET /api/usage` | transcript token totals, or 404 |
//! | `GET /api/conversation` | transcript conversation, or 404 |
//! | `GET /api/stream` | server-sent events: one `data:` frame per event plus `: hb` heartbeats |
//! | `GET /api/health` | liveness and counters |
//!
//! Every response allows any origin; `OPTIONS` on any path answers `204`.

mod ingest;
mod query;
mod stream;

pub use ingest::IngestOutcome;
pub use stream::{event_frames, HEARTBEAT_FRAME, HEARTBEAT_INTERVAL};

use crate::error::{Error, Result};
use crate::hub::BroadcastHub;
use crate::store::EventStore;
use crate::transcript::{Conversation, TranscriptCache, UsageTotals};
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Shared state handed to every request.
///
/// Built once at startup; each test builds its own.
#[derive(Clone, Debug)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub hub: BroadcastHub,
    pub usage: Arc<TranscriptCache<UsageTotals>>,
    pub conversation: Arc<TranscriptCache<Conversation>>,
    heartbeat: Duration,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            store: Arc::new(EventStore::new()),
            hub: BroadcastHub::new(),
            usage: Arc::new(TranscriptCache::new()),
            conversation: Arc::new(TranscriptCache::new()),
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    /// Replace both transcript caches with ones using `ttl`.
    pub fn with_transcript_ttl(mut self, ttl: Duration) -> Self {
        self.usage = Arc::new(TranscriptCache::with_ttl(ttl));
        self.conversation = Arc::new(TranscriptCache::with_ttl(ttl));
        self
    }

    /// Override the stream heartbeat interval.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/event", post(ingest::ingest_event))
        .route("/api/events", get(query::recent_events))
        .route("/api/stats", get(query::stats))
        .route("/api/usage", get(query::usage))
        .route("/api/conversation", get(query::conversation))
        .route("/api/stream", get(stream::stream_events))
        .route("/api/health", get(query::health))
        .fallback(not_found)
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Serve until the listener fails or the future is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Agent monitor listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Server(format!("serving on {addr} failed: {e}")))
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Answer preflights directly; stamp `Access-Control-Allow-Origin` on everything else.
async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
        return response;
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}
