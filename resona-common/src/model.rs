//! Session data model
//!
//! Value types shared by the authoritative session state (owned by the
//! hub) and the read-only mirrors maintained by client proxies. Both
//! sides mutate their copy exclusively through
//! [`StateSnapshot::apply`], which keeps a late-joining mirror identical
//! to the canonical state after catch-up replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::events::SessionEvent;

/// Wire version of [`StateSnapshot`]; bumped on incompatible changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Playback state machine states.
///
/// `Stalled` is intentionally not a state here: buffering underrun is an
/// orthogonal flag carried in [`StateSnapshot::stalled`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No native resource; awaiting a command
    Idle,
    /// Resource created, async prepare in flight
    Preparing,
    /// Prepare completed, transport not yet started
    Prepared,
    Playing,
    Paused,
    /// Transport stopped; resource released, progress retained
    Stopped,
    /// Native resource failed; exited only by a new explicit command
    Error,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Preparing => write!(f, "preparing"),
            PlaybackState::Prepared => write!(f, "prepared"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Error => write!(f, "error"),
        }
    }
}

/// Sound quality selection for source resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SoundQuality {
    Low,
    Standard,
    High,
}

impl std::fmt::Display for SoundQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoundQuality::Low => write!(f, "low"),
            SoundQuality::Standard => write!(f, "standard"),
            SoundQuality::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for SoundQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(SoundQuality::Low),
            "standard" => Ok(SoundQuality::Standard),
            "high" => Ok(SoundQuality::High),
            other => Err(format!("unknown sound quality: {}", other)),
        }
    }
}

/// Playlist traversal mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    Sequence,
    LoopAll,
    LoopOne,
    Shuffle,
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayMode::Sequence => write!(f, "sequence"),
            PlayMode::LoopAll => write!(f, "loopall"),
            PlayMode::LoopOne => write!(f, "loopone"),
            PlayMode::Shuffle => write!(f, "shuffle"),
        }
    }
}

/// What the sleep timer does when it fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SleepAction {
    Pause,
    Stop,
    Shutdown,
}

/// Active network transport type, as reported by the connectivity source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    None,
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

/// Immutable track description exchanged by copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackDescriptor {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Playback source URI (None means the resolver must be consulted)
    pub source_uri: Option<String>,
    pub icon_uri: Option<String>,
    /// Total duration in milliseconds; None means auto-duration (learned
    /// from the native resource after prepare)
    pub duration_ms: Option<u64>,
    /// Live streams and similar sources cannot be seeked
    #[serde(default)]
    pub seek_forbidden: bool,
}

/// Progress value plus the wall-clock instant it was valid at.
///
/// Progress is never read as a static number: callers reconstruct the
/// current value from elapsed time since `updated_at` while playing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProgressMark {
    pub position_ms: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProgressMark {
    pub fn new(position_ms: u64, updated_at: DateTime<Utc>) -> Self {
        Self {
            position_ms,
            updated_at,
        }
    }

    pub fn zero(now: DateTime<Utc>) -> Self {
        Self::new(0, now)
    }

    /// Reconstruct the position at `now`.
    ///
    /// While `advancing` the elapsed wall time since the mark is added;
    /// otherwise the stored value is returned unchanged. A clock that
    /// appears to run backwards contributes zero elapsed time.
    pub fn position_at(&self, now: DateTime<Utc>, advancing: bool) -> u64 {
        if !advancing {
            return self.position_ms;
        }
        let elapsed_ms = now
            .signed_duration_since(self.updated_at)
            .num_milliseconds()
            .max(0) as u64;
        self.position_ms + elapsed_ms
    }
}

/// Last reported error (code + message), retained until superseded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
}

/// Full session state snapshot.
///
/// The hub owns the single canonical instance; every client proxy holds
/// an eventually consistent copy. New observers receive the whole struct
/// as their first event (catch-up replay).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub version: u32,
    pub playback_state: PlaybackState,
    pub track: Option<TrackDescriptor>,
    pub progress: ProgressMark,
    /// Buffering completion, 0-100
    pub buffering_percent: u8,
    /// Buffering underrun flag, orthogonal to playback_state
    pub stalled: bool,
    /// Native resource session id, 0 when no resource exists
    pub resource_session_id: i32,
    pub last_error: Option<SessionError>,
    pub sound_quality: SoundQuality,
    pub looping: bool,
    pub audio_effect_enabled: bool,
    pub wifi_only: bool,
    pub ignore_focus_loss: bool,
    pub playlist_position: Option<usize>,
    pub play_mode: PlayMode,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            playback_state: PlaybackState::Idle,
            track: None,
            progress: ProgressMark::zero(Utc::now()),
            buffering_percent: 0,
            stalled: false,
            resource_session_id: 0,
            last_error: None,
            sound_quality: SoundQuality::Standard,
            looping: false,
            audio_effect_enabled: false,
            wifi_only: false,
            ignore_focus_loss: false,
            playlist_position: None,
            play_mode: PlayMode::Sequence,
        }
    }
}

impl StateSnapshot {
    /// Current playback position reconstructed at `now`.
    pub fn position_at(&self, now: DateTime<Utc>) -> u64 {
        self.progress
            .position_at(now, self.playback_state == PlaybackState::Playing)
    }

    /// Freeze the progress pair at its reconstructed current value.
    fn freeze_progress(&mut self, now: DateTime<Utc>) {
        let position = self.position_at(now);
        self.progress = ProgressMark::new(position, now);
    }

    /// Apply one inbound event.
    ///
    /// This is the only mutation path for both the canonical copy and
    /// client mirrors, so the two can never diverge for the same event
    /// sequence.
    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Preparing { .. } => {
                self.playback_state = PlaybackState::Preparing;
            }
            SessionEvent::Prepared {
                resource_session_id,
                ..
            } => {
                self.playback_state = PlaybackState::Prepared;
                self.resource_session_id = *resource_session_id;
                self.last_error = None;
            }
            SessionEvent::Play {
                position_ms,
                timestamp,
            } => {
                self.playback_state = PlaybackState::Playing;
                self.progress = ProgressMark::new(*position_ms, *timestamp);
                self.last_error = None;
            }
            SessionEvent::Pause { timestamp } => {
                self.freeze_progress(*timestamp);
                self.playback_state = PlaybackState::Paused;
            }
            SessionEvent::Stop { timestamp } => {
                self.freeze_progress(*timestamp);
                self.playback_state = PlaybackState::Stopped;
                self.resource_session_id = 0;
            }
            SessionEvent::Stalled { stalled, .. } => {
                self.stalled = *stalled;
            }
            SessionEvent::BufferingChanged { percent, .. } => {
                self.buffering_percent = (*percent).min(100);
            }
            SessionEvent::Error { code, message, .. } => {
                self.last_error = Some(SessionError {
                    code: *code,
                    message: message.clone(),
                });
                if let Some(state) = code.failure_state() {
                    self.playback_state = state;
                    self.resource_session_id = 0;
                }
            }
            SessionEvent::SeekComplete {
                position_ms,
                timestamp,
            } => {
                self.progress = ProgressMark::new(*position_ms, *timestamp);
            }
            SessionEvent::PlayingItemChanged { item, timestamp } => {
                self.track = item.clone();
                self.progress = ProgressMark::zero(*timestamp);
                self.buffering_percent = 0;
                self.stalled = false;
                if item.is_none() {
                    self.playback_state = PlaybackState::Idle;
                    self.resource_session_id = 0;
                }
            }
            SessionEvent::PlaylistPositionChanged { position, .. } => {
                self.playlist_position = Some(*position);
            }
            SessionEvent::PlayModeChanged { mode, .. } => {
                self.play_mode = *mode;
            }
            SessionEvent::SettingsChanged {
                sound_quality,
                looping,
                audio_effect_enabled,
                wifi_only,
                ignore_focus_loss,
                ..
            } => {
                self.sound_quality = *sound_quality;
                self.looping = *looping;
                self.audio_effect_enabled = *audio_effect_enabled;
                self.wifi_only = *wifi_only;
                self.ignore_focus_loss = *ignore_focus_loss;
            }
            SessionEvent::Snapshot { state, .. } => {
                *self = state.clone();
            }
            SessionEvent::Shutdown { .. } => {}
        }
    }
}
