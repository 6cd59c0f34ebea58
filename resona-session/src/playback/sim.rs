//! Simulated native player
//!
//! A clock-driven [`NativePlayer`] with no real audio pipeline: prepare,
//! seek, and natural completion are modeled with tokio timers, and
//! position is derived from elapsed runtime. Used by the engine tests
//! and as the default factory wiring when no platform player is
//! provided.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{Error, Result};
use crate::playback::player::{NativePlayer, NativePlayerFactory, PlayerEvent, PlayerEventSink};

const SEEK_LATENCY: Duration = Duration::from_millis(5);

/// Per-URI behavior of the simulated media.
#[derive(Debug, Clone)]
pub struct SimTrack {
    pub duration_ms: u64,
    pub prepare_delay: Duration,
    /// Buffered percentage reported right after prepare; below 100 the
    /// media behaves like an in-progress stream download
    pub buffered_percent: u8,
    pub fail_prepare: bool,
}

impl Default for SimTrack {
    fn default() -> Self {
        Self {
            duration_ms: 180_000,
            prepare_delay: Duration::from_millis(10),
            buffered_percent: 100,
            fail_prepare: false,
        }
    }
}

/// Factory producing [`SimPlayer`]s, configurable per source URI.
pub struct SimPlayerFactory {
    default_track: SimTrack,
    tracks: Mutex<HashMap<String, SimTrack>>,
    next_session_id: AtomicI32,
    created: Mutex<Vec<Arc<Mutex<Shared>>>>,
}

impl SimPlayerFactory {
    pub fn new() -> Self {
        Self::with_default(SimTrack::default())
    }

    pub fn with_default(default_track: SimTrack) -> Self {
        Self {
            default_track,
            tracks: Mutex::new(HashMap::new()),
            next_session_id: AtomicI32::new(1),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Override the simulated media behind one URI.
    pub fn insert(&self, uri: impl Into<String>, track: SimTrack) {
        self.tracks.lock().unwrap().insert(uri.into(), track);
    }

    /// Output volume of the most recently created player.
    pub fn last_volume(&self) -> Option<f32> {
        self.created
            .lock()
            .unwrap()
            .last()
            .map(|shared| shared.lock().unwrap().volume)
    }

    /// Audio-effect attach flag of the most recently created player.
    pub fn last_effects_enabled(&self) -> Option<bool> {
        self.created
            .lock()
            .unwrap()
            .last()
            .map(|shared| shared.lock().unwrap().effects_enabled)
    }
}

impl Default for SimPlayerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NativePlayerFactory for SimPlayerFactory {
    fn create(
        &self,
        uri: &str,
        duration_hint_ms: Option<u64>,
        sink: PlayerEventSink,
    ) -> Result<Box<dyn NativePlayer>> {
        let config = match self.tracks.lock().unwrap().get(uri) {
            Some(track) => track.clone(),
            None => {
                let mut track = self.default_track.clone();
                if let Some(hint) = duration_hint_ms {
                    track.duration_ms = hint;
                }
                track
            }
        };
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        debug!(uri, session_id, "sim player created");
        let player = SimPlayer::new(config, sink, session_id);
        self.created.lock().unwrap().push(Arc::clone(&player.shared));
        Ok(Box::new(player))
    }
}

struct Shared {
    playing: bool,
    base_ms: u64,
    started_at: Option<Instant>,
    duration_ms: u64,
    looping: bool,
    released: bool,
    volume: f32,
    effects_enabled: bool,
    /// Bumped on every transport change; scheduled timer tasks carry
    /// the value they were armed with and stand down on mismatch
    generation: u64,
}

impl Shared {
    fn position(&self) -> u64 {
        let running = match (self.playing, self.started_at) {
            (true, Some(at)) => at.elapsed().as_millis() as u64,
            _ => 0,
        };
        (self.base_ms + running).min(self.duration_ms)
    }
}

/// Clock-driven simulated playback resource.
pub struct SimPlayer {
    shared: Arc<Mutex<Shared>>,
    sink: PlayerEventSink,
    session_id: i32,
    prepare_delay: Duration,
    buffered_percent: u8,
    fail_prepare: bool,
}

impl SimPlayer {
    fn new(config: SimTrack, sink: PlayerEventSink, session_id: i32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                playing: false,
                base_ms: 0,
                started_at: None,
                duration_ms: config.duration_ms,
                looping: false,
                released: false,
                volume: 1.0,
                effects_enabled: false,
                generation: 0,
            })),
            sink,
            session_id,
            prepare_delay: config.prepare_delay,
            buffered_percent: config.buffered_percent,
            fail_prepare: config.fail_prepare,
        }
    }

    fn bump_generation(&self) -> u64 {
        let mut shared = self.shared.lock().unwrap();
        shared.generation += 1;
        shared.generation
    }
}

enum CompletionStep {
    NotYet(u64),
    Looped,
    Completed,
    Cancelled,
}

/// Schedule the natural end-of-media for the current run. The task
/// stands down whenever the generation moves past `token`.
fn arm_completion(shared: &Arc<Mutex<Shared>>, sink: &PlayerEventSink, token: u64) {
    let shared = Arc::clone(shared);
    let sink = sink.clone();
    tokio::spawn(async move {
        loop {
            let remaining = {
                let s = shared.lock().unwrap();
                if s.released || s.generation != token || !s.playing {
                    return;
                }
                s.duration_ms.saturating_sub(s.position())
            };
            sleep(Duration::from_millis(remaining.max(1))).await;

            let step = {
                let mut s = shared.lock().unwrap();
                if s.released || s.generation != token || !s.playing {
                    CompletionStep::Cancelled
                } else if s.position() < s.duration_ms {
                    CompletionStep::NotYet(s.duration_ms - s.position())
                } else if s.looping {
                    s.base_ms = 0;
                    s.started_at = Some(Instant::now());
                    CompletionStep::Looped
                } else {
                    s.playing = false;
                    s.base_ms = s.duration_ms;
                    s.started_at = None;
                    CompletionStep::Completed
                }
            };
            match step {
                CompletionStep::Cancelled => return,
                CompletionStep::NotYet(_) | CompletionStep::Looped => continue,
                CompletionStep::Completed => {
                    sink.send(PlayerEvent::Completed);
                    return;
                }
            }
        }
    });
}

impl NativePlayer for SimPlayer {
    fn prepare(&mut self) -> Result<()> {
        if self.shared.lock().unwrap().released {
            return Err(Error::Player("prepare on released player".into()));
        }
        let shared = Arc::clone(&self.shared);
        let sink = self.sink.clone();
        let delay = self.prepare_delay;
        let buffered = self.buffered_percent;
        let fail = self.fail_prepare;
        let session_id = self.session_id;
        tokio::spawn(async move {
            sleep(delay).await;
            let duration_ms = {
                let s = shared.lock().unwrap();
                if s.released {
                    return;
                }
                s.duration_ms
            };
            if fail {
                sink.send(PlayerEvent::Failed {
                    message: "simulated prepare failure".into(),
                });
            } else {
                sink.send(PlayerEvent::Buffering { percent: buffered });
                sink.send(PlayerEvent::Prepared {
                    duration_ms,
                    session_id,
                });
            }
        });
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let token = {
            let mut s = self.shared.lock().unwrap();
            if s.released {
                return Err(Error::Player("start on released player".into()));
            }
            if s.playing {
                return Ok(());
            }
            s.playing = true;
            s.started_at = Some(Instant::now());
            s.generation += 1;
            s.generation
        };
        arm_completion(&self.shared, &self.sink, token);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut s = self.shared.lock().unwrap();
        if s.released {
            return Err(Error::Player("pause on released player".into()));
        }
        if s.playing {
            s.base_ms = s.position();
            s.playing = false;
            s.started_at = None;
            s.generation += 1;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.pause()
    }

    fn seek_to(&mut self, position_ms: u64) -> Result<()> {
        if self.shared.lock().unwrap().released {
            return Err(Error::Player("seek on released player".into()));
        }
        let token = self.bump_generation();
        let shared = Arc::clone(&self.shared);
        let sink = self.sink.clone();
        tokio::spawn(async move {
            sleep(SEEK_LATENCY).await;
            let applied = {
                let mut s = shared.lock().unwrap();
                if s.released || s.generation != token {
                    return;
                }
                let clamped = position_ms.min(s.duration_ms);
                s.base_ms = clamped;
                if s.playing {
                    s.started_at = Some(Instant::now());
                }
                (clamped, s.playing)
            };
            let (position, rearm) = applied;
            if rearm {
                arm_completion(&shared, &sink, token);
            }
            sink.send(PlayerEvent::SeekComplete {
                position_ms: position,
            });
        });
        Ok(())
    }

    fn set_looping(&mut self, looping: bool) {
        self.shared.lock().unwrap().looping = looping;
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared.lock().unwrap().volume = volume.clamp(0.0, 1.0);
    }

    fn set_audio_effects_enabled(&mut self, enabled: bool) {
        self.shared.lock().unwrap().effects_enabled = enabled;
    }

    fn position_ms(&self) -> u64 {
        self.shared.lock().unwrap().position()
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.shared.lock().unwrap().duration_ms)
    }

    fn session_id(&self) -> i32 {
        self.session_id
    }

    fn release(&mut self) {
        let mut s = self.shared.lock().unwrap();
        s.released = true;
        s.playing = false;
        s.started_at = None;
        s.generation += 1;
    }
}
