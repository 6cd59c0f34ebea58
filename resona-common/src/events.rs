//! Session event and command enums
//!
//! The many narrow per-event callback interfaces of a typical platform
//! media session collapse here into one tagged [`SessionEvent`] enum,
//! multiplexed over a single channel and consumed by one dispatch
//! function per sink. [`SessionCommand`] is the matching inbound
//! surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::{PlayMode, SleepAction, SoundQuality, StateSnapshot, TrackDescriptor};

/// Events fanned out from the session hub to every registered observer.
///
/// Every variant carries the wall-clock timestamp it was emitted at;
/// progress-bearing variants pair the position with that timestamp so
/// receivers can reconstruct elapsed time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Async prepare started on a freshly created native resource
    Preparing { timestamp: DateTime<Utc> },

    /// Prepare completed; the resource is ready for transport commands
    Prepared {
        /// Native resource session id (audio-effect attach point)
        resource_session_id: i32,
        timestamp: DateTime<Utc>,
    },

    /// Transport started or resumed
    Play {
        position_ms: u64,
        timestamp: DateTime<Utc>,
    },

    Pause { timestamp: DateTime<Utc> },

    Stop { timestamp: DateTime<Utc> },

    /// Buffering underrun flag changed (orthogonal to Playing/Paused)
    Stalled {
        stalled: bool,
        timestamp: DateTime<Utc>,
    },

    BufferingChanged {
        /// 0-100
        percent: u8,
        timestamp: DateTime<Utc>,
    },

    /// Every failure, policy or native, funnels through this one event
    Error {
        code: ErrorCode,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A requested seek finished; progress tracking resumes from here
    SeekComplete {
        position_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The active item changed (None clears the session)
    PlayingItemChanged {
        item: Option<TrackDescriptor>,
        timestamp: DateTime<Utc>,
    },

    PlaylistPositionChanged {
        position: usize,
        timestamp: DateTime<Utc>,
    },

    PlayModeChanged {
        mode: PlayMode,
        timestamp: DateTime<Utc>,
    },

    /// Any of the persisted/ephemeral toggles changed
    SettingsChanged {
        sound_quality: SoundQuality,
        looping: bool,
        audio_effect_enabled: bool,
        wifi_only: bool,
        ignore_focus_loss: bool,
        timestamp: DateTime<Utc>,
    },

    /// Catch-up replay: the complete canonical state as one atomic unit.
    /// Always the first event a newly registered observer receives.
    Snapshot {
        state: StateSnapshot,
        timestamp: DateTime<Utc>,
    },

    /// The hub is going away; no further events will be delivered
    Shutdown { timestamp: DateTime<Utc> },
}

impl SessionEvent {
    /// Stable event name, used as the SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::Preparing { .. } => "Preparing",
            SessionEvent::Prepared { .. } => "Prepared",
            SessionEvent::Play { .. } => "Play",
            SessionEvent::Pause { .. } => "Pause",
            SessionEvent::Stop { .. } => "Stop",
            SessionEvent::Stalled { .. } => "Stalled",
            SessionEvent::BufferingChanged { .. } => "BufferingChanged",
            SessionEvent::Error { .. } => "Error",
            SessionEvent::SeekComplete { .. } => "SeekComplete",
            SessionEvent::PlayingItemChanged { .. } => "PlayingItemChanged",
            SessionEvent::PlaylistPositionChanged { .. } => "PlaylistPositionChanged",
            SessionEvent::PlayModeChanged { .. } => "PlayModeChanged",
            SessionEvent::SettingsChanged { .. } => "SettingsChanged",
            SessionEvent::Snapshot { .. } => "Snapshot",
            SessionEvent::Shutdown { .. } => "Shutdown",
        }
    }
}

/// Commands dispatched over the channel into the session hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SessionCommand {
    Play,
    Pause,
    Stop,
    PlayPause,
    SeekTo { position_ms: u64 },
    FastForward,
    Rewind,
    SetSoundQuality { quality: SoundQuality },
    SetAudioEffectEnabled { enabled: bool },
    SetOnlyWifiNetwork { enabled: bool },
    SetIgnoreAudioFocusLoss { enabled: bool },
    StartSleepTimer { delay_ms: u64, action: SleepAction },
    CancelSleepTimer,
    SetPlaylist {
        tracks: Vec<TrackDescriptor>,
        position: usize,
        autoplay: bool,
    },
    SetPlaylistPosition { position: usize },
    SetPlayMode { mode: PlayMode },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SessionEvent::Play {
            position_ms: 1234,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Play");
        assert_eq!(json["position_ms"], 1234);
    }

    #[test]
    fn error_event_carries_numeric_code() {
        let event = SessionEvent::Error {
            code: ErrorCode::OnlyWifiNetwork,
            message: "cellular network active".into(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["code"], 1);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = SessionEvent::SeekComplete {
            position_ms: 42_000,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn event_names_match_type_tags() {
        let event = SessionEvent::Shutdown {
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_name());
    }

    #[test]
    fn commands_serialize_with_type_tag() {
        let cmd = SessionCommand::StartSleepTimer {
            delay_ms: 60_000,
            action: crate::model::SleepAction::Pause,
        };

        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "StartSleepTimer");
        assert_eq!(json["delay_ms"], 60_000);
        assert_eq!(json["action"], "pause");

        let back: SessionCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }
}
