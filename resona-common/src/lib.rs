//! Shared types for the Resona playback session protocol.
//!
//! Everything that crosses the session/observer channel lives here: the
//! tagged [`SessionEvent`] and [`SessionCommand`] enums, the versioned
//! [`StateSnapshot`] DTO, the stable numeric [`ErrorCode`] table, request
//! types for the HTTP surface, and the abstract duplex [`SessionChannel`]
//! used by both the in-process and the HTTP transports.

pub mod api;
pub mod channel;
pub mod error;
pub mod events;
pub mod model;

pub use channel::{ChannelError, SessionChannel};
pub use error::ErrorCode;
pub use events::{SessionCommand, SessionEvent};
pub use model::{
    NetworkType, PlayMode, PlaybackState, ProgressMark, SessionError, SleepAction, SoundQuality,
    StateSnapshot, TrackDescriptor, SNAPSHOT_VERSION,
};
