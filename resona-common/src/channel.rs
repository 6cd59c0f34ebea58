//! Abstract duplex session channel
//!
//! One request path (commands in) plus one server-push path (events
//! out). Any IPC mechanism satisfies it; the session crate ships an
//! in-process implementation and the client crate an HTTP+SSE one.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::events::{SessionCommand, SessionEvent};

/// Channel-level failures, distinct from session error codes: these
/// describe the transport, not playback.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel is not (or no longer) connected
    #[error("channel disconnected")]
    Disconnected,

    /// The session hub has shut down and rejects new observers
    #[error("session closed")]
    SessionClosed,

    /// Command rejected by the session (validation failure)
    #[error("command rejected: {0}")]
    Rejected(String),

    /// Underlying transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Duplex channel to one session hub.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    /// Deliver one command to the hub.
    async fn send(&self, command: SessionCommand) -> Result<(), ChannelError>;

    /// Register as an observer and stream events.
    ///
    /// The first item is always the catch-up snapshot; observer
    /// registration is dropped when the returned stream is.
    async fn subscribe(&self) -> Result<BoxStream<'static, SessionEvent>, ChannelError>;
}
