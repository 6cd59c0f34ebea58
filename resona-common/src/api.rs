//! Request/response types for the HTTP command surface
//!
//! Shared by the daemon's axum handlers and the client's HTTP channel so
//! the two sides cannot drift apart.

use serde::{Deserialize, Serialize};

use crate::model::{PlayMode, SleepAction, SoundQuality, TrackDescriptor};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeekRequest {
    pub position_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRequest {
    pub quality: SoundQuality,
}

/// Body for the boolean setting endpoints (audio effect, wifi-only,
/// ignore-focus-loss).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTimerRequest {
    pub delay_ms: u64,
    pub action: SleepAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistRequest {
    pub tracks: Vec<TrackDescriptor>,
    pub position: usize,
    #[serde(default)]
    pub autoplay: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistPositionRequest {
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayModeRequest {
    pub mode: PlayMode,
}

/// Uniform command acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAck {
    pub ok: bool,
}

impl CommandAck {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
