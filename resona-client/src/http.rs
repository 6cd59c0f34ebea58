//! HTTP session channel
//!
//! Speaks the daemon's REST command surface and SSE event feed: one
//! POST/DELETE per command, and a long-lived `GET /api/v1/events`
//! connection parsed frame by frame into session events.

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use resona_common::api::{
    PlayModeRequest, PlaylistPositionRequest, PlaylistRequest, QualityRequest, SeekRequest,
    SleepTimerRequest, ToggleRequest,
};
use resona_common::{ChannelError, SessionChannel, SessionCommand, SessionEvent};

pub struct HttpChannel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChannel {
    /// `base_url` like `http://127.0.0.1:5850`, without a trailing slash.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn route(command: &SessionCommand) -> (Method, &'static str, Option<serde_json::Value>) {
        use SessionCommand::*;
        match command {
            Play => (Method::POST, "/api/v1/playback/play", None),
            Pause => (Method::POST, "/api/v1/playback/pause", None),
            Stop => (Method::POST, "/api/v1/playback/stop", None),
            PlayPause => (Method::POST, "/api/v1/playback/play-pause", None),
            SeekTo { position_ms } => (
                Method::POST,
                "/api/v1/playback/seek",
                serde_json::to_value(SeekRequest {
                    position_ms: *position_ms,
                })
                .ok(),
            ),
            FastForward => (Method::POST, "/api/v1/playback/fast-forward", None),
            Rewind => (Method::POST, "/api/v1/playback/rewind", None),
            SetSoundQuality { quality } => (
                Method::POST,
                "/api/v1/settings/quality",
                serde_json::to_value(QualityRequest { quality: *quality }).ok(),
            ),
            SetAudioEffectEnabled { enabled } => (
                Method::POST,
                "/api/v1/settings/audio-effect",
                serde_json::to_value(ToggleRequest { enabled: *enabled }).ok(),
            ),
            SetOnlyWifiNetwork { enabled } => (
                Method::POST,
                "/api/v1/settings/wifi-only",
                serde_json::to_value(ToggleRequest { enabled: *enabled }).ok(),
            ),
            SetIgnoreAudioFocusLoss { enabled } => (
                Method::POST,
                "/api/v1/settings/ignore-focus",
                serde_json::to_value(ToggleRequest { enabled: *enabled }).ok(),
            ),
            StartSleepTimer { delay_ms, action } => (
                Method::POST,
                "/api/v1/sleep-timer",
                serde_json::to_value(SleepTimerRequest {
                    delay_ms: *delay_ms,
                    action: *action,
                })
                .ok(),
            ),
            CancelSleepTimer => (Method::DELETE, "/api/v1/sleep-timer", None),
            SetPlaylist {
                tracks,
                position,
                autoplay,
            } => (
                Method::POST,
                "/api/v1/playlist",
                serde_json::to_value(PlaylistRequest {
                    tracks: tracks.clone(),
                    position: *position,
                    autoplay: *autoplay,
                })
                .ok(),
            ),
            SetPlaylistPosition { position } => (
                Method::POST,
                "/api/v1/playlist/position",
                serde_json::to_value(PlaylistPositionRequest {
                    position: *position,
                })
                .ok(),
            ),
            SetPlayMode { mode } => (
                Method::POST,
                "/api/v1/playlist/mode",
                serde_json::to_value(PlayModeRequest { mode: *mode }).ok(),
            ),
        }
    }
}

/// Parse one SSE frame (the text between blank lines) into an event.
/// Comment/keep-alive frames and unknown payloads yield None.
fn parse_frame(frame: &str) -> Option<SessionEvent> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    match serde_json::from_str(&payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("unparseable SSE payload: {}", e);
            None
        }
    }
}

#[async_trait]
impl SessionChannel for HttpChannel {
    async fn send(&self, command: SessionCommand) -> Result<(), ChannelError> {
        let (method, path, body) = Self::route(&command);
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::BAD_REQUEST => {
                let message = response.text().await.unwrap_or_default();
                Err(ChannelError::Rejected(message))
            }
            StatusCode::SERVICE_UNAVAILABLE => Err(ChannelError::SessionClosed),
            status => Err(ChannelError::Transport(format!(
                "{} returned {}",
                url, status
            ))),
        }
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, SessionEvent>, ChannelError> {
        let url = format!("{}/api/v1/events", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Err(ChannelError::SessionClosed);
        }
        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let mut bytes = response.bytes_stream();
        let stream = stream! {
            let mut buffer = String::new();
            'receive: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!("event stream ended: {}", e);
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(end) = buffer.find("\n\n") {
                    let frame: String = buffer.drain(..end + 2).collect();
                    if let Some(event) = parse_frame(&frame) {
                        let last = matches!(event, SessionEvent::Shutdown { .. });
                        yield event;
                        if last {
                            break 'receive;
                        }
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}
