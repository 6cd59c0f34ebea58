//! Playback engine and its collaborator seams

pub mod engine;
pub mod player;
pub mod sim;
pub mod source;
pub mod types;

pub use engine::{EngineDeps, EngineHandle, PlaybackEngine};
pub use player::{NativePlayer, NativePlayerFactory, PlayerEvent, PlayerEventSink};
pub use sim::{SimPlayerFactory, SimTrack};
pub use source::{DirectResolver, ResolveError, TrackResolver};
pub use types::{DeferredAction, EngineCommand, EngineNotice, DUCK_VOLUME, SEEK_STEP_MS};
