//! SSE event feed
//!
//! One hub observer per connected client. The first frame on the wire
//! is the catch-up snapshot (the hub puts it in the sink at
//! registration); the registration is dropped with the connection.

use std::sync::Arc;

use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tracing::debug;
use uuid::Uuid;

use resona_common::SessionEvent;

use crate::api::AppState;
use crate::error::Result;
use crate::hub::SessionHub;

struct Registration {
    hub: Arc<SessionHub>,
    token: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        debug!(token = %self.token, "SSE client disconnected");
        self.hub.unregister(self.token);
    }
}

/// GET /api/v1/events
pub async fn events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let (token, mut rx) = state.hub.register()?;
    debug!(%token, "SSE client connected");
    let registration = Registration {
        hub: Arc::clone(&state.hub),
        token,
    };

    let stream = stream! {
        let _registration = registration;
        while let Some(event) = rx.recv().await {
            let last = matches!(event, SessionEvent::Shutdown { .. });
            yield Event::default().event(event.event_name()).json_data(&event);
            if last {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
