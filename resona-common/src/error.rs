//! Stable numeric error codes for the session wire protocol
//!
//! Codes are part of the wire contract and never renumbered. Messages
//! here are unlocalized defaults; localized text is resolved by an
//! external collaborator on the client side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::PlaybackState;

/// Session error codes, serialized as their wire number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ErrorCode {
    NoError = 0,
    OnlyWifiNetwork = 1,
    PlayerError = 2,
    NetworkUnavailable = 3,
    FileNotFound = 4,
    DataLoadFailed = 5,
    GetUrlFailed = 6,
    OutOfMemory = 7,
    UnknownError = 8,
}

/// Raised when decoding an unknown error code number.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown error code: {0}")]
pub struct UnknownErrorCode(pub u8);

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = UnknownErrorCode;

    fn try_from(value: u8) -> Result<Self, UnknownErrorCode> {
        match value {
            0 => Ok(ErrorCode::NoError),
            1 => Ok(ErrorCode::OnlyWifiNetwork),
            2 => Ok(ErrorCode::PlayerError),
            3 => Ok(ErrorCode::NetworkUnavailable),
            4 => Ok(ErrorCode::FileNotFound),
            5 => Ok(ErrorCode::DataLoadFailed),
            6 => Ok(ErrorCode::GetUrlFailed),
            7 => Ok(ErrorCode::OutOfMemory),
            8 => Ok(ErrorCode::UnknownError),
            other => Err(UnknownErrorCode(other)),
        }
    }
}

impl ErrorCode {
    /// Wire number for this code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Default (unlocalized) message.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::NoError => "no error",
            ErrorCode::OnlyWifiNetwork => "playback restricted to wifi networks",
            ErrorCode::PlayerError => "native player failure",
            ErrorCode::NetworkUnavailable => "no network available",
            ErrorCode::FileNotFound => "source not found",
            ErrorCode::DataLoadFailed => "failed to load track data",
            ErrorCode::GetUrlFailed => "failed to resolve source url",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::UnknownError => "unknown error",
        }
    }

    /// Playback state the engine ends up in after reporting this code.
    ///
    /// Resolution and policy failures never create a resource, so the
    /// engine stays in `Idle`; native resource failures park it in
    /// `Error` until the next explicit command. Returns None when the
    /// code implies no state transition.
    pub fn failure_state(self) -> Option<PlaybackState> {
        match self {
            ErrorCode::NoError => None,
            ErrorCode::OnlyWifiNetwork
            | ErrorCode::NetworkUnavailable
            | ErrorCode::FileNotFound
            | ErrorCode::GetUrlFailed => Some(PlaybackState::Idle),
            ErrorCode::PlayerError
            | ErrorCode::DataLoadFailed
            | ErrorCode::OutOfMemory
            | ErrorCode::UnknownError => Some(PlaybackState::Error),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.code())
    }
}
