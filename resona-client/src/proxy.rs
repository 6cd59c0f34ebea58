//! Client-side session proxy
//!
//! Holds a read-only mirror of the session state, kept current purely
//! by applying inbound events (the same `StateSnapshot::apply` the hub
//! uses, so the mirror cannot drift). Observers register per aspect and
//! always receive the current value immediately on registration, then
//! every change after it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use resona_common::{
    ChannelError, PlayMode, PlaybackState, ProgressMark, SessionChannel, SessionCommand,
    SessionError, SessionEvent, SleepAction, SoundQuality, StateSnapshot, TrackDescriptor,
};

/// Token identifying one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverToken(Uuid);

/// One per-aspect observer registry.
///
/// Callbacks are held behind `Arc` so notification can run outside the
/// registry lock; an observer may therefore register or remove others
/// from inside its own callback.
struct Registry<T: Clone> {
    observers: Mutex<HashMap<Uuid, Arc<dyn Fn(T) + Send + Sync>>>,
}

impl<T: Clone> Registry<T> {
    fn new() -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
        }
    }

    fn add(&self, callback: impl Fn(T) + Send + Sync + 'static) -> ObserverToken {
        let token = Uuid::new_v4();
        self.observers
            .lock()
            .unwrap()
            .insert(token, Arc::new(callback));
        ObserverToken(token)
    }

    fn remove(&self, token: ObserverToken) -> bool {
        self.observers.lock().unwrap().remove(&token.0).is_some()
    }

    fn notify(&self, value: T) {
        let callbacks: Vec<_> = self.observers.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(value.clone());
        }
    }
}

struct Connection {
    channel: Arc<dyn SessionChannel>,
    pump: JoinHandle<()>,
}

struct ProxyInner {
    mirror: Mutex<StateSnapshot>,
    connection: Mutex<Option<Connection>>,

    playback_state: Registry<PlaybackState>,
    buffering: Registry<u8>,
    stalled: Registry<bool>,
    playing_item: Registry<Option<TrackDescriptor>>,
    seek_complete: Registry<u64>,
    progress: Registry<ProgressMark>,
    play_mode: Registry<PlayMode>,
    playlist_position: Registry<Option<usize>>,
    error: Registry<SessionError>,
    disconnected: Registry<()>,
}

impl ProxyInner {
    /// The single mirror mutation path; every aspect that changed gets
    /// its observers notified from the post-apply value.
    fn on_event(&self, event: SessionEvent) {
        let (before, after) = {
            let mut mirror = self.mirror.lock().unwrap();
            let before = mirror.clone();
            mirror.apply(&event);
            (before, mirror.clone())
        };

        if after.playback_state != before.playback_state {
            self.playback_state.notify(after.playback_state);
        }
        if after.buffering_percent != before.buffering_percent {
            self.buffering.notify(after.buffering_percent);
        }
        if after.stalled != before.stalled {
            self.stalled.notify(after.stalled);
        }
        if after.track != before.track {
            self.playing_item.notify(after.track.clone());
        }
        if after.progress != before.progress {
            self.progress.notify(after.progress);
        }
        if after.play_mode != before.play_mode {
            self.play_mode.notify(after.play_mode);
        }
        if after.playlist_position != before.playlist_position {
            self.playlist_position.notify(after.playlist_position);
        }
        if let SessionEvent::SeekComplete { position_ms, .. } = &event {
            self.seek_complete.notify(*position_ms);
        }
        if let SessionEvent::Error { .. } = &event {
            if let Some(error) = after.last_error.clone() {
                self.error.notify(error);
            }
        }
        if matches!(event, SessionEvent::Shutdown { .. }) {
            self.on_remote_gone();
        }
    }

    /// The hub shut down or the event stream ended underneath us.
    fn on_remote_gone(&self) {
        let taken = self.connection.lock().unwrap().take();
        if taken.is_some() {
            debug!("session went away, proxy disconnected");
            self.disconnected.notify(());
        }
        // The pump task ends on its own; nothing to abort here
    }
}

/// Remote-control handle to one playback session.
#[derive(Clone)]
pub struct ClientProxy {
    inner: Arc<ProxyInner>,
}

impl Default for ClientProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientProxy {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                mirror: Mutex::new(StateSnapshot::default()),
                connection: Mutex::new(None),
                playback_state: Registry::new(),
                buffering: Registry::new(),
                stalled: Registry::new(),
                playing_item: Registry::new(),
                seek_complete: Registry::new(),
                progress: Registry::new(),
                play_mode: Registry::new(),
                playlist_position: Registry::new(),
                error: Registry::new(),
                disconnected: Registry::new(),
            }),
        }
    }

    /// Attach to a session. The first inbound event is the catch-up
    /// snapshot, so the mirror is current before this returns any
    /// further events to observers.
    pub async fn connect(&self, channel: Arc<dyn SessionChannel>) -> Result<(), ChannelError> {
        if self.inner.connection.lock().unwrap().is_some() {
            return Err(ChannelError::Transport("already connected".into()));
        }
        let mut stream = channel.subscribe().await?;

        let inner = Arc::clone(&self.inner);
        let pump = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                inner.on_event(event);
            }
            inner.on_remote_gone();
        });

        let mut slot = self.inner.connection.lock().unwrap();
        // Lost a race with another connect call
        if slot.is_some() {
            pump.abort();
            return Err(ChannelError::Transport("already connected".into()));
        }
        *slot = Some(Connection { channel, pump });
        Ok(())
    }

    /// Detach from the session. Disconnected observers are notified
    /// synchronously, before the event stream is torn down.
    pub fn disconnect(&self) {
        let taken = self.inner.connection.lock().unwrap().take();
        let Some(connection) = taken else {
            return;
        };
        self.inner.disconnected.notify(());
        // Dropping the stream inside the pump unregisters us hub-side
        connection.pump.abort();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.lock().unwrap().is_some()
    }

    /// Current mirror state, by copy.
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.mirror.lock().unwrap().clone()
    }

    /// Playback position reconstructed from the progress mark and the
    /// wall clock.
    pub fn position_ms(&self) -> u64 {
        self.inner.mirror.lock().unwrap().position_at(Utc::now())
    }

    // ---- commands ----------------------------------------------------------

    /// Forward one command to the session. Commands issued while
    /// disconnected are dropped.
    pub async fn send(&self, command: SessionCommand) -> Result<(), ChannelError> {
        let channel = {
            let connection = self.inner.connection.lock().unwrap();
            match connection.as_ref() {
                Some(connection) => Arc::clone(&connection.channel),
                None => {
                    debug!(?command, "command dropped: proxy is disconnected");
                    return Ok(());
                }
            }
        };
        channel.send(command).await
    }

    pub async fn play(&self) -> Result<(), ChannelError> {
        self.send(SessionCommand::Play).await
    }

    pub async fn pause(&self) -> Result<(), ChannelError> {
        self.send(SessionCommand::Pause).await
    }

    pub async fn stop(&self) -> Result<(), ChannelError> {
        self.send(SessionCommand::Stop).await
    }

    pub async fn play_pause(&self) -> Result<(), ChannelError> {
        self.send(SessionCommand::PlayPause).await
    }

    pub async fn seek_to(&self, position_ms: u64) -> Result<(), ChannelError> {
        self.send(SessionCommand::SeekTo { position_ms }).await
    }

    pub async fn fast_forward(&self) -> Result<(), ChannelError> {
        self.send(SessionCommand::FastForward).await
    }

    pub async fn rewind(&self) -> Result<(), ChannelError> {
        self.send(SessionCommand::Rewind).await
    }

    pub async fn set_sound_quality(&self, quality: SoundQuality) -> Result<(), ChannelError> {
        self.send(SessionCommand::SetSoundQuality { quality }).await
    }

    pub async fn set_audio_effect_enabled(&self, enabled: bool) -> Result<(), ChannelError> {
        self.send(SessionCommand::SetAudioEffectEnabled { enabled })
            .await
    }

    pub async fn set_only_wifi_network(&self, enabled: bool) -> Result<(), ChannelError> {
        self.send(SessionCommand::SetOnlyWifiNetwork { enabled })
            .await
    }

    pub async fn set_ignore_audio_focus_loss(&self, enabled: bool) -> Result<(), ChannelError> {
        self.send(SessionCommand::SetIgnoreAudioFocusLoss { enabled })
            .await
    }

    pub async fn start_sleep_timer(
        &self,
        delay_ms: u64,
        action: SleepAction,
    ) -> Result<(), ChannelError> {
        self.send(SessionCommand::StartSleepTimer { delay_ms, action })
            .await
    }

    pub async fn cancel_sleep_timer(&self) -> Result<(), ChannelError> {
        self.send(SessionCommand::CancelSleepTimer).await
    }

    pub async fn set_playlist(
        &self,
        tracks: Vec<TrackDescriptor>,
        position: usize,
        autoplay: bool,
    ) -> Result<(), ChannelError> {
        self.send(SessionCommand::SetPlaylist {
            tracks,
            position,
            autoplay,
        })
        .await
    }

    pub async fn set_playlist_position(&self, position: usize) -> Result<(), ChannelError> {
        self.send(SessionCommand::SetPlaylistPosition { position })
            .await
    }

    pub async fn set_play_mode(&self, mode: PlayMode) -> Result<(), ChannelError> {
        self.send(SessionCommand::SetPlayMode { mode }).await
    }

    // ---- observers ---------------------------------------------------------
    //
    // Every observe_* delivers the current mirror value immediately,
    // from the registering thread, then again on every change.

    pub fn observe_playback_state(
        &self,
        callback: impl Fn(PlaybackState) + Send + Sync + 'static,
    ) -> ObserverToken {
        callback(self.inner.mirror.lock().unwrap().playback_state);
        self.inner.playback_state.add(callback)
    }

    pub fn observe_buffering(
        &self,
        callback: impl Fn(u8) + Send + Sync + 'static,
    ) -> ObserverToken {
        callback(self.inner.mirror.lock().unwrap().buffering_percent);
        self.inner.buffering.add(callback)
    }

    pub fn observe_stalled(
        &self,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> ObserverToken {
        callback(self.inner.mirror.lock().unwrap().stalled);
        self.inner.stalled.add(callback)
    }

    pub fn observe_playing_item(
        &self,
        callback: impl Fn(Option<TrackDescriptor>) + Send + Sync + 'static,
    ) -> ObserverToken {
        callback(self.inner.mirror.lock().unwrap().track.clone());
        self.inner.playing_item.add(callback)
    }

    /// Seek completions only; no initial delivery (there is no
    /// "current" seek).
    pub fn observe_seek_complete(
        &self,
        callback: impl Fn(u64) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.inner.seek_complete.add(callback)
    }

    pub fn observe_progress(
        &self,
        callback: impl Fn(ProgressMark) + Send + Sync + 'static,
    ) -> ObserverToken {
        callback(self.inner.mirror.lock().unwrap().progress);
        self.inner.progress.add(callback)
    }

    pub fn observe_play_mode(
        &self,
        callback: impl Fn(PlayMode) + Send + Sync + 'static,
    ) -> ObserverToken {
        callback(self.inner.mirror.lock().unwrap().play_mode);
        self.inner.play_mode.add(callback)
    }

    pub fn observe_playlist_position(
        &self,
        callback: impl Fn(Option<usize>) + Send + Sync + 'static,
    ) -> ObserverToken {
        callback(self.inner.mirror.lock().unwrap().playlist_position);
        self.inner.playlist_position.add(callback)
    }

    pub fn observe_error(
        &self,
        callback: impl Fn(SessionError) + Send + Sync + 'static,
    ) -> ObserverToken {
        if let Some(error) = self.inner.mirror.lock().unwrap().last_error.clone() {
            callback(error);
        }
        self.inner.error.add(callback)
    }

    /// Fires on disconnect (explicit or remote); no initial delivery.
    pub fn observe_disconnected(
        &self,
        callback: impl Fn(()) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.inner.disconnected.add(callback)
    }

    /// Remove an observer from whichever registry holds it.
    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        let inner = &self.inner;
        inner.playback_state.remove(token)
            || inner.buffering.remove(token)
            || inner.stalled.remove(token)
            || inner.playing_item.remove(token)
            || inner.seek_complete.remove(token)
            || inner.progress.remove(token)
            || inner.play_mode.remove(token)
            || inner.playlist_position.remove(token)
            || inner.error.remove(token)
            || inner.disconnected.remove(token)
    }
}
