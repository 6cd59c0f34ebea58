//! HTTP request handlers
//!
//! Thin adapters: deserialize the request body, build the matching
//! `SessionCommand`, dispatch it to the hub. Validation failures map to
//! 400 through the crate error type.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use resona_common::api::{
    CommandAck, PlayModeRequest, PlaylistPositionRequest, PlaylistRequest, QualityRequest,
    SeekRequest, SleepTimerRequest, ToggleRequest,
};
use resona_common::{SessionCommand, StateSnapshot};

use crate::api::AppState;
use crate::error::Result;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "resona-session".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/v1/state - current canonical snapshot
pub async fn get_state(State(state): State<AppState>) -> Json<StateSnapshot> {
    Json(state.hub.snapshot())
}

fn ack(state: &AppState, command: SessionCommand) -> Result<Json<CommandAck>> {
    state.hub.dispatch(command)?;
    Ok(Json(CommandAck::ok()))
}

pub async fn play(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    ack(&state, SessionCommand::Play)
}

pub async fn pause(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    ack(&state, SessionCommand::Pause)
}

pub async fn stop(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    ack(&state, SessionCommand::Stop)
}

pub async fn play_pause(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    ack(&state, SessionCommand::PlayPause)
}

pub async fn seek(
    State(state): State<AppState>,
    Json(body): Json<SeekRequest>,
) -> Result<Json<CommandAck>> {
    ack(
        &state,
        SessionCommand::SeekTo {
            position_ms: body.position_ms,
        },
    )
}

pub async fn fast_forward(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    ack(&state, SessionCommand::FastForward)
}

pub async fn rewind(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    ack(&state, SessionCommand::Rewind)
}

pub async fn set_quality(
    State(state): State<AppState>,
    Json(body): Json<QualityRequest>,
) -> Result<Json<CommandAck>> {
    ack(
        &state,
        SessionCommand::SetSoundQuality {
            quality: body.quality,
        },
    )
}

pub async fn set_audio_effect(
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<CommandAck>> {
    ack(
        &state,
        SessionCommand::SetAudioEffectEnabled {
            enabled: body.enabled,
        },
    )
}

pub async fn set_wifi_only(
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<CommandAck>> {
    ack(
        &state,
        SessionCommand::SetOnlyWifiNetwork {
            enabled: body.enabled,
        },
    )
}

pub async fn set_ignore_focus(
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<CommandAck>> {
    ack(
        &state,
        SessionCommand::SetIgnoreAudioFocusLoss {
            enabled: body.enabled,
        },
    )
}

pub async fn start_sleep_timer(
    State(state): State<AppState>,
    Json(body): Json<SleepTimerRequest>,
) -> Result<Json<CommandAck>> {
    ack(
        &state,
        SessionCommand::StartSleepTimer {
            delay_ms: body.delay_ms,
            action: body.action,
        },
    )
}

pub async fn cancel_sleep_timer(State(state): State<AppState>) -> Result<Json<CommandAck>> {
    ack(&state, SessionCommand::CancelSleepTimer)
}

pub async fn set_playlist(
    State(state): State<AppState>,
    Json(body): Json<PlaylistRequest>,
) -> Result<Json<CommandAck>> {
    ack(
        &state,
        SessionCommand::SetPlaylist {
            tracks: body.tracks,
            position: body.position,
            autoplay: body.autoplay,
        },
    )
}

pub async fn set_playlist_position(
    State(state): State<AppState>,
    Json(body): Json<PlaylistPositionRequest>,
) -> Result<Json<CommandAck>> {
    ack(
        &state,
        SessionCommand::SetPlaylistPosition {
            position: body.position,
        },
    )
}

pub async fn set_play_mode(
    State(state): State<AppState>,
    Json(body): Json<PlayModeRequest>,
) -> Result<Json<CommandAck>> {
    ack(&state, SessionCommand::SetPlayMode { mode: body.mode })
}
