//! `POST /event`

use super::{error_response, AppState};
use crate::event::Event;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// Result of handing one hook body to [`AppState::ingest`].
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Stored and broadcast
    Accepted {
        event: Arc<Event>,
        /// Viewers whose queue accepted the event
        delivered: usize,
    },
    /// Body was not a JSON object; nothing changed
    BadJson,
}

impl AppState {
    /// Stamp, store, then broadcast one hook body.
    ///
    /// The store sees the event before any viewer does, so a viewer reacting
    /// to the broadcast reads aggregates that already include it. Publishing
    /// under the store lock keeps broadcast order equal to append order.
    pub fn ingest(&self, body: &[u8]) -> IngestOutcome {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return IngestOutcome::BadJson;
        };
        let Some(event) = Event::ingest(value) else {
            return IngestOutcome::BadJson;
        };

        let event = Arc::new(event);
        let delivered = self
            .store
            .append_then(Arc::clone(&event), |stored| self.hub.publish(Arc::clone(stored)));

        tracing::trace!(
            id = event.id().unwrap_or_default(),
            tool = event.tool_name().unwrap_or_default(),
            delivered,
            "Event ingested"
        );

        IngestOutcome::Accepted { event, delivered }
    }
}

pub(super) async fn ingest_event(State(state): State<AppState>, body: Bytes) -> Response {
    match state.ingest(&body) {
        IngestOutcome::Accepted { .. } => Json(json!({ "ok": true })).into_response(),
        IngestOutcome::BadJson => {
            tracing::debug!(bytes = body.len(), "Rejected hook body");
            error_response(StatusCode::BAD_REQUEST, "bad json")
        }
    }
}
