//! Engine command mailbox types

use resona_common::{SessionEvent, SoundQuality, TrackDescriptor};

use crate::playback::player::PlayerEvent;
use crate::resources::PolicySignal;

/// Fixed fast-forward / rewind step.
pub const SEEK_STEP_MS: u64 = 15_000;

/// Output scale applied on transient focus loss with ducking allowed.
pub const DUCK_VOLUME: f32 = 0.2;

/// Engine output consumed by the hub.
///
/// Almost everything is an observer-visible event; `TrackCompleted` is
/// the one hub-internal signal, letting the playlist side distinguish
/// natural end of media from a commanded stop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotice {
    Event(SessionEvent),
    /// Emitted after the stop event when the media ran to its natural end
    TrackCompleted,
}

/// The single pending action slot used while `Preparing`.
///
/// Commands issued during the async prepare are coalesced here, last
/// write wins; the slot is consumed exactly once on the `Prepared`
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    Play,
    Pause,
    Stop,
    Seek(u64),
}

/// Everything entering the engine goes through this one mailbox enum.
///
/// External commands, native player callbacks, and platform policy
/// signals are all serialized onto the engine task, which is the single
/// logical owner context: no engine state is ever touched off it.
#[derive(Debug)]
pub enum EngineCommand {
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
    SetLooping { looping: bool },
    /// Active item changed (from the playlist manager via the hub)
    ItemChanged {
        item: Option<TrackDescriptor>,
        autoplay: bool,
    },
    /// Native player callback re-entering the owner context; dropped
    /// when `epoch` no longer matches (the player was released while
    /// the callback was in flight)
    Player { epoch: u64, event: PlayerEvent },
    /// Interruption signal from the resource coordinator
    Policy(PolicySignal),
    Shutdown,
}
