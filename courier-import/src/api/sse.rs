//! Server-Sent Events for import progress

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /import/events
///
/// Streams every import event as JSON, named by its event type. Idle
/// connections get a heartbeat comment every 15 seconds.
pub async fn import_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to import events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE: Client lagged, {} events skipped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(event_json) => {
                    debug!("SSE: Broadcasting import event: {}", event_type);
                    yield Ok(Event::default().event(event_type).data(event_json));
                }
                Err(e) => {
                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
