//! `GET /api/stream`: live events as server-sent events
//!
//! Each connection owns one hub [`Subscription`]. The loop waits up to one
//! heartbeat interval for an event, drains whatever else is queued, and
//! writes the data frames followed by a heartbeat as a single chunk:
//!
//! ```text
//! data: {"tool_name":"Read",...}\n\n
//! : hb\n\n
//! ```
//!
//! When the peer goes away the server drops the body stream, which drops
//! the subscription and removes it from the hub.

use super::AppState;
use crate::event::Event;
use crate::hub::{Closed, Subscription};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::time::Duration;

/// Maximum time between frames
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(300);

/// SSE comment frame sent on every loop iteration
pub const HEARTBEAT_FRAME: &str = ": hb\n\n";

pub(super) async fn stream_events(State(state): State<AppState>) -> Response {
    let subscription = state.hub.subscribe();
    tracing::debug!(subscriber = subscription.id(), "Stream opened");

    let headers = [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    let body = Body::from_stream(event_frames(subscription, state.heartbeat()));

    (headers, body).into_response()
}

/// Frame stream for one viewer, open until the subscription is removed from the hub.
///
/// Every item ends with [`HEARTBEAT_FRAME`]; items carrying events put their
/// `data:` frames first, in arrival order.
pub fn event_frames(
    subscription: Subscription,
    heartbeat: Duration,
) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
    stream::unfold(subscription, move |mut subscription| async move {
        let mut chunk = String::new();

        match subscription.recv_timeout(heartbeat).await {
            Ok(Some(first)) => {
                push_data_frame(&mut chunk, &first);
                for event in subscription.drain() {
                    push_data_frame(&mut chunk, &event);
                }
            }
            Ok(None) => {}
            Err(Closed) => {
                tracing::debug!(
                    subscriber = subscription.id(),
                    "Viewer removed from hub, ending stream"
                );
                return None;
            }
        }
        chunk.push_str(HEARTBEAT_FRAME);

        Some((Ok(chunk), subscription))
    })
}

fn push_data_frame(chunk: &mut String, event: &Event) {
    match serde_json::to_string(event) {
        Ok(json) => {
            chunk.push_str("data: ");
            chunk.push_str(&json);
            chunk.push_str("\n\n");
        }
        Err(e) => tracing::warn!(error = %e, "Skipping unserializable event"),
    }
}
