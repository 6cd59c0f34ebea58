//! In-process session channel
//!
//! [`LocalChannel`] satisfies the abstract duplex channel for callers
//! living in the same process as the hub: commands dispatch directly,
//! subscription registers an observer sink whose registration is torn
//! down when the stream is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use resona_common::{ChannelError, SessionChannel, SessionCommand, SessionEvent};

use crate::error::Error;
use crate::hub::SessionHub;

#[derive(Clone)]
pub struct LocalChannel {
    hub: Arc<SessionHub>,
}

impl LocalChannel {
    pub fn new(hub: Arc<SessionHub>) -> Self {
        Self { hub }
    }
}

/// Unregisters the observer when the subscription stream is dropped.
struct RegistrationGuard {
    hub: Arc<SessionHub>,
    token: Uuid,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.token);
    }
}

#[async_trait]
impl SessionChannel for LocalChannel {
    async fn send(&self, command: SessionCommand) -> Result<(), ChannelError> {
        self.hub.dispatch(command).map_err(|e| match e {
            Error::HubClosed => ChannelError::SessionClosed,
            Error::BadRequest(message) => ChannelError::Rejected(message),
            other => ChannelError::Transport(other.to_string()),
        })
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, SessionEvent>, ChannelError> {
        let (token, rx) = self
            .hub
            .register()
            .map_err(|_| ChannelError::SessionClosed)?;
        let guard = RegistrationGuard {
            hub: Arc::clone(&self.hub),
            token,
        };
        let stream = UnboundedReceiverStream::new(rx).map(move |event| {
            let _ = &guard;
            event
        });
        Ok(stream.boxed())
    }
}
