//! Native player abstraction
//!
//! The engine owns at most one [`NativePlayer`] at a time and drives it
//! with synchronous control calls; prepare and seek complete
//! asynchronously through [`PlayerEvent`]s delivered back into the
//! engine mailbox via [`PlayerEventSink`]. Events carry the epoch the
//! sink was created with, so callbacks from an already-released player
//! are recognizably stale.

use tokio::sync::mpsc;

use crate::error::Result;
use crate::playback::types::EngineCommand;

/// Asynchronous completions and notifications from the native resource.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Async prepare finished; the resource can be started
    Prepared {
        /// Learned media duration (authoritative for auto-duration tracks)
        duration_ms: u64,
        /// Native session id (audio-effect attach point)
        session_id: i32,
    },
    /// A requested seek finished at the corrected position
    SeekComplete { position_ms: u64 },
    /// Buffered percentage changed, 0-100
    Buffering { percent: u8 },
    /// Buffering underrun started or ended
    Stalled { stalled: bool },
    /// Natural end of media (not emitted while looping)
    Completed,
    /// Unrecoverable resource failure
    Failed { message: String },
}

/// Epoch-tagged path from a native player back into the engine mailbox.
#[derive(Clone)]
pub struct PlayerEventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl PlayerEventSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { epoch, tx }
    }

    /// Deliver an event; silently dropped once the engine is gone.
    pub fn send(&self, event: PlayerEvent) {
        let _ = self.tx.send(EngineCommand::Player {
            epoch: self.epoch,
            event,
        });
    }
}

/// One decodable native playback resource.
///
/// Control methods are synchronous and cheap; prepare/seek completion
/// arrives later through the sink the player was created with.
pub trait NativePlayer: Send + Sync {
    /// Begin async preparation; completion is `PlayerEvent::Prepared`
    /// or `PlayerEvent::Failed`.
    fn prepare(&mut self) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Begin async seek; completion is `PlayerEvent::SeekComplete`.
    fn seek_to(&mut self, position_ms: u64) -> Result<()>;

    fn set_looping(&mut self, looping: bool);

    /// Output scale 0.0-1.0 (used for focus-loss ducking).
    fn set_volume(&mut self, volume: f32);

    fn set_audio_effects_enabled(&mut self, enabled: bool);

    fn position_ms(&self) -> u64;

    /// None until the resource has learned its duration.
    fn duration_ms(&self) -> Option<u64>;

    /// Native session id; stable for the lifetime of the resource.
    fn session_id(&self) -> i32;

    /// Release the resource. Idempotent; after release no further
    /// events may be delivered through the sink.
    fn release(&mut self);
}

/// Constructs native players for resolved source URIs.
pub trait NativePlayerFactory: Send + Sync {
    fn create(
        &self,
        uri: &str,
        duration_hint_ms: Option<u64>,
        sink: PlayerEventSink,
    ) -> Result<Box<dyn NativePlayer>>;
}
