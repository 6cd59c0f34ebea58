//! Resona client
//!
//! Remote-control handle to a playback session daemon: a [`ClientProxy`]
//! holding an event-driven mirror of the session state with per-aspect
//! observers, and an [`HttpChannel`] speaking the daemon's REST + SSE
//! surface. In-process callers can connect the same proxy over the
//! session crate's `LocalChannel` instead.

pub mod http;
pub mod proxy;

pub use http::HttpChannel;
pub use proxy::{ClientProxy, ObserverToken};
