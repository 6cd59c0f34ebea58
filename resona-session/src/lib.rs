//! Resona session daemon
//!
//! Background playback session: one engine owning at most one native
//! playback resource, a hub fanning its events out to any number of
//! observers, and the HTTP/SSE surface remote clients talk to. The
//! `resonad` binary wires the default collaborators (simulated player,
//! direct resolver, simulated platform sources) around this library.

pub mod api;
pub mod channel;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod playback;
pub mod playlist;
pub mod resources;
pub mod timer;

pub use channel::LocalChannel;
pub use config::Config;
pub use error::{Error, Result};
pub use hub::{HubDeps, SessionHub};
