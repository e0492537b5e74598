use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Router, routing::get};
use futures_util::Stream;
use futures_util::stream;
use render_core::JobEvent;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::state::AppState;

/// GET /api/events -- job lifecycle events as Server-Sent Events.
async fn job_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = event_stream(state.scheduler.subscribe());
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Turn a broadcast receiver into an SSE stream.
///
/// Lagging subscribers skip what they missed; the stream ends when the
/// scheduler drops its sender.
fn event_stream(
    rx: broadcast::Receiver<JobEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(to_sse(&event)), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "SSE subscriber lagged behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

fn to_sse(event: &JobEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(job_events))
}
