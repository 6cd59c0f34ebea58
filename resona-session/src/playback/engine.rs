//! Playback engine
//!
//! Owns at most one native playback resource and sequences its whole
//! lifecycle: source resolution, async prepare, transport control,
//! seeks, quality switches, and interruption policy. All engine state
//! lives on one task fed by one mailbox; player completions and policy
//! signals re-enter through the same mailbox, so there is never a
//! concurrent mutation and a torn read is impossible.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use resona_common::{ErrorCode, PlaybackState, SessionEvent, SoundQuality, TrackDescriptor};

use crate::db::SettingsStore;
use crate::playback::player::{NativePlayerFactory, PlayerEvent, PlayerEventSink};
use crate::playback::source::{ResolveError, TrackResolver};
use crate::playback::types::{
    DeferredAction, EngineCommand, EngineNotice, DUCK_VOLUME, SEEK_STEP_MS,
};
use crate::resources::{FocusChange, NetworkStatus, PolicySignal, ResourceCoordinator};

use resona_common::NetworkType;

/// Handle for submitting commands into the engine mailbox.
///
/// Cloneable and cheap; the engine task ends when the last handle is
/// dropped or after a `Shutdown` command.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    /// Submit a command. Silently ignored once the engine has stopped.
    pub fn send(&self, command: EngineCommand) {
        let _ = self.tx.send(command);
    }
}

/// Collaborators the engine is constructed with.
pub struct EngineDeps {
    pub factory: Arc<dyn NativePlayerFactory>,
    pub resolver: Arc<dyn TrackResolver>,
    pub store: SettingsStore,
    pub coordinator: Arc<ResourceCoordinator>,
    /// Every state change leaves the engine through this sender
    pub events: mpsc::UnboundedSender<EngineNotice>,
}

/// Playback engine entry point.
pub struct PlaybackEngine;

impl PlaybackEngine {
    /// Spawn the engine task and return its command handle.
    pub fn spawn(deps: EngineDeps) -> EngineHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = EngineInner {
            rx,
            tx: tx.clone(),
            factory: deps.factory,
            resolver: deps.resolver,
            store: deps.store,
            coordinator: deps.coordinator,
            events: deps.events,
            state: PlaybackState::Idle,
            player: None,
            epoch: 0,
            deferred: None,
            track: None,
            stored_progress_ms: 0,
            pending_seek: None,
            transient_was_playing: None,
            ducked: false,
            buffering_percent: 0,
            stalled: false,
            quality: SoundQuality::Standard,
            wifi_only: false,
            ignore_focus: false,
            effect_enabled: false,
            looping: false,
        };
        tokio::spawn(inner.run());
        EngineHandle { tx }
    }
}

struct EngineInner {
    rx: mpsc::UnboundedReceiver<EngineCommand>,
    tx: mpsc::UnboundedSender<EngineCommand>,
    factory: Arc<dyn NativePlayerFactory>,
    resolver: Arc<dyn TrackResolver>,
    store: SettingsStore,
    coordinator: Arc<ResourceCoordinator>,
    events: mpsc::UnboundedSender<EngineNotice>,

    state: PlaybackState,
    player: Option<Box<dyn crate::playback::player::NativePlayer>>,
    /// Bumped on every resource release; player callbacks carrying an
    /// older epoch are stale and dropped
    epoch: u64,
    /// Single-slot coalescing of commands issued during `Preparing`
    deferred: Option<DeferredAction>,
    track: Option<TrackDescriptor>,
    /// Last known position when no resource is tracking it live; also
    /// the target of the post-prepare restore seek
    stored_progress_ms: u64,
    /// In-flight seek; the bool is whether playback resumes on
    /// completion
    pending_seek: Option<bool>,
    /// Play flag remembered across a transient focus loss
    transient_was_playing: Option<bool>,
    ducked: bool,
    buffering_percent: u8,
    stalled: bool,

    quality: SoundQuality,
    wifi_only: bool,
    ignore_focus: bool,
    effect_enabled: bool,
    looping: bool,
}

impl EngineInner {
    async fn run(mut self) {
        match self.store.load_prefs().await {
            Ok(prefs) => {
                self.quality = prefs.sound_quality;
                self.wifi_only = prefs.wifi_only;
                self.ignore_focus = prefs.ignore_focus_loss;
            }
            Err(e) => warn!("Failed to load stored preferences: {}", e),
        }
        info!(
            quality = %self.quality,
            wifi_only = self.wifi_only,
            "Playback engine started"
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                EngineCommand::Play => self.handle_play().await,
                EngineCommand::Pause => self.handle_pause(),
                EngineCommand::Stop => self.handle_stop(),
                EngineCommand::PlayPause => {
                    if self.play_intent() {
                        self.handle_pause();
                    } else {
                        self.handle_play().await;
                    }
                }
                EngineCommand::SeekTo { position_ms } => self.handle_seek(position_ms),
                EngineCommand::FastForward => self.handle_step(true),
                EngineCommand::Rewind => self.handle_step(false),
                EngineCommand::SetSoundQuality { quality } => {
                    self.handle_set_quality(quality).await
                }
                EngineCommand::SetAudioEffectEnabled { enabled } => self.handle_set_effect(enabled),
                EngineCommand::SetOnlyWifiNetwork { enabled } => {
                    self.handle_set_wifi_only(enabled).await
                }
                EngineCommand::SetIgnoreAudioFocusLoss { enabled } => {
                    self.handle_set_ignore_focus(enabled).await
                }
                EngineCommand::SetLooping { looping } => self.handle_set_looping(looping),
                EngineCommand::ItemChanged { item, autoplay } => {
                    self.handle_item_changed(item, autoplay).await
                }
                EngineCommand::Player { epoch, event } => self.handle_player_event(epoch, event),
                EngineCommand::Policy(signal) => self.handle_policy(signal),
                EngineCommand::Shutdown => break,
            }
        }

        self.release_player();
        info!("Playback engine stopped");
    }

    // ---- transport commands ------------------------------------------------

    /// Whether the session is heading towards playing (used by
    /// play/pause toggling, including while a prepare is in flight).
    fn play_intent(&self) -> bool {
        match self.state {
            PlaybackState::Playing => true,
            PlaybackState::Preparing => self.deferred == Some(DeferredAction::Play),
            _ => false,
        }
    }

    async fn handle_play(&mut self) {
        match self.state {
            PlaybackState::Playing => debug!("play: already playing"),
            PlaybackState::Preparing => {
                debug!("play coalesced into deferred slot");
                self.deferred = Some(DeferredAction::Play);
            }
            PlaybackState::Prepared | PlaybackState::Paused => self.do_play(),
            PlaybackState::Idle | PlaybackState::Stopped | PlaybackState::Error => {
                self.start_prepare(Some(DeferredAction::Play)).await;
            }
        }
    }

    fn handle_pause(&mut self) {
        match self.state {
            PlaybackState::Preparing => {
                debug!("pause coalesced into deferred slot");
                self.deferred = Some(DeferredAction::Pause);
            }
            PlaybackState::Playing | PlaybackState::Prepared => self.do_pause(),
            _ => debug!("pause: no effect in state {}", self.state),
        }
    }

    fn handle_stop(&mut self) {
        match self.state {
            PlaybackState::Preparing => {
                debug!("stop coalesced into deferred slot");
                self.deferred = Some(DeferredAction::Stop);
            }
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Prepared => {
                self.do_stop()
            }
            _ => debug!("stop: no effect in state {}", self.state),
        }
    }

    fn handle_seek(&mut self, position_ms: u64) {
        if self
            .track
            .as_ref()
            .is_some_and(|track| track.seek_forbidden)
        {
            debug!("seek ignored: track forbids seeking");
            return;
        }
        match self.state {
            PlaybackState::Preparing => {
                debug!("seek coalesced into deferred slot");
                self.deferred = Some(DeferredAction::Seek(position_ms));
            }
            _ if self.player.is_some() => self.do_seek(position_ms),
            _ => {
                // No resource: remember the target for the next prepare
                let clamped = match self.duration_ms() {
                    Some(duration) => position_ms.min(duration),
                    None => position_ms,
                };
                self.stored_progress_ms = clamped;
            }
        }
    }

    fn handle_step(&mut self, forward: bool) {
        let current = self.current_position_ms();
        let target = if forward {
            let stepped = current.saturating_add(SEEK_STEP_MS);
            match self.duration_ms() {
                Some(duration) => stepped.min(duration),
                None => stepped,
            }
        } else {
            current.saturating_sub(SEEK_STEP_MS)
        };
        self.handle_seek(target);
    }

    fn do_play(&mut self) {
        let Some(player) = self.player.as_mut() else {
            return;
        };
        if let Err(e) = player.start() {
            self.fail_player(e.to_string());
            return;
        }
        self.state = PlaybackState::Playing;
        let position_ms = self.current_position_ms();
        info!(position_ms, "playback started");
        self.emit(SessionEvent::Play {
            position_ms,
            timestamp: Utc::now(),
        });
    }

    fn do_pause(&mut self) {
        let Some(player) = self.player.as_mut() else {
            return;
        };
        let position = player.position_ms();
        if let Err(e) = player.pause() {
            self.fail_player(e.to_string());
            return;
        }
        self.stored_progress_ms = position;
        self.state = PlaybackState::Paused;
        info!(position_ms = position, "playback paused");
        self.emit(SessionEvent::Pause {
            timestamp: Utc::now(),
        });
    }

    fn do_stop(&mut self) {
        self.stored_progress_ms = self.current_position_ms();
        self.release_player();
        self.state = PlaybackState::Stopped;
        info!("playback stopped");
        self.emit(SessionEvent::Stop {
            timestamp: Utc::now(),
        });
    }

    fn do_seek(&mut self, position_ms: u64) {
        let clamped = match self.duration_ms() {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        };
        let resume = self.state == PlaybackState::Playing;
        let Some(player) = self.player.as_mut() else {
            return;
        };
        self.pending_seek = Some(resume);
        debug!(target_ms = clamped, resume, "seek requested");
        if let Err(e) = player.seek_to(clamped) {
            self.fail_player(e.to_string());
        }
    }

    // ---- settings ----------------------------------------------------------

    async fn handle_set_quality(&mut self, quality: SoundQuality) {
        if quality == self.quality {
            return;
        }
        self.quality = quality;
        if let Err(e) = self.store.save_sound_quality(quality).await {
            warn!("Failed to persist sound quality: {}", e);
        }
        self.emit_settings();

        // Re-resolve at the new quality, restoring position and the
        // play/pause flag afterwards
        if self.player.is_some() {
            let was_playing = self.state == PlaybackState::Playing;
            self.stored_progress_ms = self.current_position_ms();
            self.release_player();
            let resume = if was_playing {
                DeferredAction::Play
            } else {
                DeferredAction::Pause
            };
            self.start_prepare(Some(resume)).await;
        }
    }

    fn handle_set_effect(&mut self, enabled: bool) {
        self.effect_enabled = enabled;
        if let Some(player) = self.player.as_mut() {
            player.set_audio_effects_enabled(enabled);
        }
        self.emit_settings();
    }

    async fn handle_set_wifi_only(&mut self, enabled: bool) {
        self.wifi_only = enabled;
        if let Err(e) = self.store.save_wifi_only(enabled).await {
            warn!("Failed to persist wifi-only flag: {}", e);
        }
        self.emit_settings();
        if enabled {
            let status = self.coordinator.network_status();
            self.enforce_network_policy(status);
        }
    }

    async fn handle_set_ignore_focus(&mut self, enabled: bool) {
        self.ignore_focus = enabled;
        if let Err(e) = self.store.save_ignore_focus_loss(enabled).await {
            warn!("Failed to persist ignore-focus flag: {}", e);
        }
        self.emit_settings();
    }

    fn handle_set_looping(&mut self, looping: bool) {
        self.looping = looping;
        if let Some(player) = self.player.as_mut() {
            player.set_looping(looping);
        }
        self.emit_settings();
    }

    // ---- item lifecycle ----------------------------------------------------

    async fn handle_item_changed(&mut self, item: Option<TrackDescriptor>, autoplay: bool) {
        info!(
            track = item.as_ref().map(|t| t.id.as_str()).unwrap_or("<none>"),
            autoplay, "playing item changed"
        );
        self.release_player();
        self.stored_progress_ms = 0;
        self.buffering_percent = 0;
        self.stalled = false;
        self.track = item.clone();
        self.emit(SessionEvent::PlayingItemChanged {
            item,
            timestamp: Utc::now(),
        });

        if self.track.is_some() {
            let deferred = autoplay.then_some(DeferredAction::Play);
            self.start_prepare(deferred).await;
        } else {
            self.state = PlaybackState::Idle;
        }
    }

    /// Resolve the source and kick off the async prepare.
    ///
    /// Resolution happens before `Preparing` is ever entered: a policy
    /// or resolution failure reports an error and leaves the engine in
    /// `Idle` with no resource created.
    async fn start_prepare(&mut self, deferred: Option<DeferredAction>) {
        let Some(track) = self.track.clone() else {
            self.notify_error(ErrorCode::FileNotFound, "no active track".to_string());
            return;
        };
        self.deferred = deferred;

        let uri = match self.resolve(&track).await {
            Ok(uri) => uri,
            Err(err) => {
                self.deferred = None;
                self.state = PlaybackState::Idle;
                self.notify_error(err.code, err.message);
                return;
            }
        };

        self.epoch += 1;
        let sink = PlayerEventSink::new(self.epoch, self.tx.clone());
        let mut player = match self.factory.create(&uri, track.duration_ms, sink) {
            Ok(player) => player,
            Err(e) => {
                self.deferred = None;
                self.state = PlaybackState::Error;
                self.notify_error(ErrorCode::PlayerError, e.to_string());
                return;
            }
        };

        self.state = PlaybackState::Preparing;
        self.emit(SessionEvent::Preparing {
            timestamp: Utc::now(),
        });
        match player.prepare() {
            Ok(()) => self.player = Some(player),
            Err(e) => {
                player.release();
                self.epoch += 1;
                self.deferred = None;
                self.state = PlaybackState::Error;
                self.notify_error(ErrorCode::PlayerError, e.to_string());
            }
        }
    }

    async fn resolve(&self, track: &TrackDescriptor) -> Result<String, ResolveError> {
        if self.resolver.is_cached(track, self.quality).await {
            if let Some(uri) = self.resolver.cached_uri(track, self.quality).await {
                debug!(uri, "resolved from cache");
                return Ok(uri);
            }
        }
        let status = self.coordinator.network_status();
        if !status.connected {
            return Err(ResolveError::new(
                ErrorCode::NetworkUnavailable,
                ErrorCode::NetworkUnavailable.default_message(),
            ));
        }
        if self.wifi_only && status.network != NetworkType::Wifi {
            return Err(ResolveError::new(
                ErrorCode::OnlyWifiNetwork,
                ErrorCode::OnlyWifiNetwork.default_message(),
            ));
        }
        self.resolver.remote_uri(track, self.quality).await
    }

    // ---- player callbacks --------------------------------------------------

    fn handle_player_event(&mut self, epoch: u64, event: PlayerEvent) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "stale player callback dropped");
            return;
        }
        match event {
            PlayerEvent::Prepared {
                duration_ms,
                session_id,
            } => self.on_prepared(duration_ms, session_id),
            PlayerEvent::SeekComplete { position_ms } => self.on_seek_complete(position_ms),
            PlayerEvent::Buffering { percent } => {
                self.buffering_percent = percent.min(100);
                self.emit(SessionEvent::BufferingChanged {
                    percent: self.buffering_percent,
                    timestamp: Utc::now(),
                });
            }
            PlayerEvent::Stalled { stalled } => {
                self.stalled = stalled;
                self.emit(SessionEvent::Stalled {
                    stalled,
                    timestamp: Utc::now(),
                });
            }
            PlayerEvent::Completed => {
                info!("playback completed");
                self.stored_progress_ms = self.duration_ms().unwrap_or(self.stored_progress_ms);
                self.release_player();
                self.state = PlaybackState::Stopped;
                // Progress correction first: mirrors pin at the track
                // end before the stop freezes their progress
                self.emit(SessionEvent::SeekComplete {
                    position_ms: self.stored_progress_ms,
                    timestamp: Utc::now(),
                });
                self.emit(SessionEvent::Stop {
                    timestamp: Utc::now(),
                });
                let _ = self.events.send(EngineNotice::TrackCompleted);
            }
            PlayerEvent::Failed { message } => self.fail_player(message),
        }
    }

    fn on_prepared(&mut self, duration_ms: u64, session_id: i32) {
        if self.state != PlaybackState::Preparing {
            debug!("prepared callback outside Preparing ignored");
            return;
        }
        self.state = PlaybackState::Prepared;
        info!(session_id, duration_ms, "prepare complete");
        self.emit(SessionEvent::Prepared {
            resource_session_id: session_id,
            timestamp: Utc::now(),
        });

        // Auto-duration tracks learn their length here
        let mut updated_track = None;
        if let Some(track) = self.track.as_mut() {
            if track.duration_ms.is_none() {
                track.duration_ms = Some(duration_ms);
                updated_track = Some(track.clone());
            }
        }
        if let Some(track) = updated_track {
            self.emit(SessionEvent::PlayingItemChanged {
                item: Some(track),
                timestamp: Utc::now(),
            });
        }

        let seek_forbidden = self
            .track
            .as_ref()
            .is_some_and(|track| track.seek_forbidden);
        let deferred = self.deferred.take();

        if let Some(player) = self.player.as_mut() {
            player.set_looping(self.looping);
            if self.effect_enabled {
                player.set_audio_effects_enabled(true);
            }
        }

        // Restore stored progress before honoring the deferred command.
        // A deferred Play rides on the seek completion so the restore
        // seek is not cancelled by the transport start.
        if self.stored_progress_ms > 0 && !seek_forbidden {
            let resume = deferred == Some(DeferredAction::Play);
            self.pending_seek = Some(resume);
            let target = self.stored_progress_ms;
            if let Some(player) = self.player.as_mut() {
                if let Err(e) = player.seek_to(target) {
                    self.fail_player(e.to_string());
                    return;
                }
            }
            match deferred {
                None | Some(DeferredAction::Play) => {}
                Some(action) => self.apply_deferred(action),
            }
        } else if let Some(action) = deferred {
            self.apply_deferred(action);
        }
    }

    fn on_seek_complete(&mut self, position_ms: u64) {
        self.stored_progress_ms = position_ms;
        let resume = self.pending_seek.take().unwrap_or(false);
        if resume && self.state != PlaybackState::Playing {
            if let Some(player) = self.player.as_mut() {
                if let Err(e) = player.start() {
                    self.fail_player(e.to_string());
                    return;
                }
            }
            self.state = PlaybackState::Playing;
            self.emit(SessionEvent::Play {
                position_ms,
                timestamp: Utc::now(),
            });
        }
        debug!(position_ms, "seek complete");
        self.emit(SessionEvent::SeekComplete {
            position_ms,
            timestamp: Utc::now(),
        });
    }

    fn apply_deferred(&mut self, action: DeferredAction) {
        debug!(?action, "applying deferred command");
        match action {
            DeferredAction::Play => self.do_play(),
            DeferredAction::Pause => self.do_pause(),
            DeferredAction::Stop => self.do_stop(),
            DeferredAction::Seek(position_ms) => self.do_seek(position_ms),
        }
    }

    // ---- interruption policy -----------------------------------------------

    fn handle_policy(&mut self, signal: PolicySignal) {
        match signal {
            PolicySignal::Focus(change) => {
                if self.ignore_focus {
                    debug!(?change, "focus change ignored by preference");
                    return;
                }
                self.handle_focus(change);
            }
            // Route loss pauses regardless of the focus preference
            PolicySignal::RouteDisconnected => {
                if self.state == PlaybackState::Playing {
                    info!("output route disconnected, pausing");
                    self.do_pause();
                }
            }
            PolicySignal::Network(status) => self.enforce_network_policy(status),
        }
    }

    fn handle_focus(&mut self, change: FocusChange) {
        match change {
            FocusChange::PermanentLoss => {
                // No auto-resume after a permanent loss
                self.transient_was_playing = None;
                if self.state == PlaybackState::Playing {
                    info!("audio focus lost, pausing");
                    self.do_pause();
                }
            }
            FocusChange::TransientLoss => {
                self.transient_was_playing = Some(self.state == PlaybackState::Playing);
                if self.state == PlaybackState::Playing {
                    info!("transient focus loss, pausing");
                    self.do_pause();
                }
            }
            FocusChange::TransientLossCanDuck => {
                if self.state == PlaybackState::Playing {
                    debug!("ducking output for transient focus loss");
                    if let Some(player) = self.player.as_mut() {
                        player.set_volume(DUCK_VOLUME);
                    }
                    self.ducked = true;
                }
            }
            FocusChange::Gain => {
                if self.ducked {
                    if let Some(player) = self.player.as_mut() {
                        player.set_volume(1.0);
                    }
                    self.ducked = false;
                }
                if self.transient_was_playing.take() == Some(true)
                    && self.state == PlaybackState::Paused
                {
                    info!("focus regained, resuming");
                    self.do_play();
                }
            }
        }
    }

    /// Abort a remote stream when the wifi-only policy stops being
    /// satisfied mid-buffer.
    fn enforce_network_policy(&mut self, status: NetworkStatus) {
        let violated = !status.connected || status.network != NetworkType::Wifi;
        if self.wifi_only && violated && self.player.is_some() && self.buffering_percent < 100 {
            warn!(?status, "wifi-only policy violated mid-stream, aborting");
            self.release_player();
            self.state = PlaybackState::Idle;
            self.notify_error(
                ErrorCode::OnlyWifiNetwork,
                ErrorCode::OnlyWifiNetwork.default_message().to_string(),
            );
        }
    }

    // ---- shared plumbing ---------------------------------------------------

    fn current_position_ms(&self) -> u64 {
        if self.pending_seek.is_some() {
            return self.stored_progress_ms;
        }
        match self.player.as_ref() {
            Some(player) => player.position_ms(),
            None => self.stored_progress_ms,
        }
    }

    fn duration_ms(&self) -> Option<u64> {
        self.player
            .as_ref()
            .and_then(|player| player.duration_ms())
            .or_else(|| self.track.as_ref().and_then(|track| track.duration_ms))
    }

    /// Release the native resource exactly once and invalidate any
    /// callback still in flight.
    fn release_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.release();
            debug!("native player released");
        }
        self.epoch += 1;
        self.pending_seek = None;
        self.ducked = false;
    }

    fn fail_player(&mut self, message: String) {
        warn!(message, "native player failure");
        self.release_player();
        self.deferred = None;
        self.state = PlaybackState::Error;
        self.notify_error(ErrorCode::PlayerError, message);
    }

    /// The single error path: every failure becomes an event, fanned
    /// out exactly like any other state change.
    fn notify_error(&mut self, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        warn!(code = code.code(), message, "playback error");
        self.emit(SessionEvent::Error {
            code,
            message,
            timestamp: Utc::now(),
        });
    }

    fn emit_settings(&mut self) {
        self.emit(SessionEvent::SettingsChanged {
            sound_quality: self.quality,
            looping: self.looping,
            audio_effect_enabled: self.effect_enabled,
            wifi_only: self.wifi_only,
            ignore_focus_loss: self.ignore_focus,
            timestamp: Utc::now(),
        });
    }

    fn emit(&mut self, event: SessionEvent) {
        // The hub side going away is not the engine's problem
        let _ = self.events.send(EngineNotice::Event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::sim::{SimPlayerFactory, SimTrack};
    use crate::playback::source::DirectResolver;
    use crate::resources::SimulatedPlatform;
    use std::time::Duration;
    use tokio::time::{advance, timeout};

    struct Rig {
        handle: EngineHandle,
        events: mpsc::UnboundedReceiver<EngineNotice>,
        platform: Arc<SimulatedPlatform>,
        coordinator: Arc<ResourceCoordinator>,
        factory: Arc<SimPlayerFactory>,
    }

    async fn rig_with(network: NetworkStatus) -> Rig {
        let platform = Arc::new(SimulatedPlatform::new(network));
        let coordinator = Arc::new(ResourceCoordinator::new(&*platform, &*platform, &*platform));
        let factory = Arc::new(SimPlayerFactory::new());
        let store = SettingsStore::in_memory().await.unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = PlaybackEngine::spawn(EngineDeps {
            factory: Arc::clone(&factory) as Arc<dyn NativePlayerFactory>,
            resolver: Arc::new(DirectResolver),
            store,
            coordinator: Arc::clone(&coordinator),
            events: events_tx,
        });
        coordinator.start(handle.clone());
        Rig {
            handle,
            events: events_rx,
            platform,
            coordinator,
            factory,
        }
    }

    async fn rig() -> Rig {
        rig_with(NetworkStatus::wifi()).await
    }

    fn track(uri: &str, duration_ms: Option<u64>) -> TrackDescriptor {
        TrackDescriptor {
            id: format!("id-{uri}"),
            title: "Title".into(),
            artist: "Artist".into(),
            album: "Album".into(),
            source_uri: Some(uri.into()),
            icon_uri: None,
            duration_ms,
            seek_forbidden: false,
        }
    }

    async fn wait_for(
        rig: &mut Rig,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> (SessionEvent, Vec<SessionEvent>) {
        let mut seen = Vec::new();
        let found = timeout(Duration::from_secs(5), async {
            loop {
                let EngineNotice::Event(event) =
                    rig.events.recv().await.expect("event channel closed")
                else {
                    continue;
                };
                if pred(&event) {
                    return event;
                }
                seen.push(event);
            }
        })
        .await
        .expect("timed out waiting for event");
        (found, seen)
    }

    /// Drain all events emitted before a marker command round-trips,
    /// proving the absence of events in between. Yields first so
    /// platform signals crossing the coordinator task reach the
    /// mailbox ahead of the marker.
    async fn fence(rig: &mut Rig) -> Vec<SessionEvent> {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        rig.handle.send(EngineCommand::SetAudioEffectEnabled { enabled: false });
        let (_, seen) = wait_for(rig, |e| matches!(e, SessionEvent::SettingsChanged { .. })).await;
        seen
    }

    async fn start_playing(rig: &mut Rig, uri: &str, duration_ms: u64) {
        rig.handle.send(EngineCommand::ItemChanged {
            item: Some(track(uri, Some(duration_ms))),
            autoplay: true,
        });
        wait_for(rig, |e| matches!(e, SessionEvent::Play { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_cached_item_plays_and_progresses() {
        let mut rig = rig().await;

        rig.handle.send(EngineCommand::ItemChanged {
            item: Some(track("file:///music/a.ogg", Some(180_000))),
            autoplay: false,
        });
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Prepared { .. })).await;

        rig.handle.send(EngineCommand::Play);
        let (event, seen) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;
        assert!(matches!(event, SessionEvent::Play { position_ms: 0, .. }));
        assert!(
            seen.iter()
                .all(|e| !matches!(e, SessionEvent::Error { .. })),
            "unexpected error: {seen:?}"
        );

        // After 5 simulated seconds a forward step lands near 5000 + 15000
        advance(Duration::from_millis(5_000)).await;
        rig.handle.send(EngineCommand::FastForward);
        let (event, _) =
            wait_for(&mut rig, |e| matches!(e, SessionEvent::SeekComplete { .. })).await;
        let SessionEvent::SeekComplete { position_ms, .. } = event else {
            unreachable!();
        };
        assert!(
            (19_900..=20_100).contains(&position_ms),
            "position {position_ms} not near 20000"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wifi_only_on_cellular_fails_before_preparing() {
        let mut rig = rig_with(NetworkStatus::cellular()).await;
        rig.handle.send(EngineCommand::SetOnlyWifiNetwork { enabled: true });

        rig.handle.send(EngineCommand::ItemChanged {
            item: Some(track("https://cdn.example/a.ogg", Some(180_000))),
            autoplay: true,
        });
        let (event, seen) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Error { .. })).await;
        let SessionEvent::Error { code, .. } = event else {
            unreachable!();
        };
        assert_eq!(code, ErrorCode::OnlyWifiNetwork);
        assert!(
            seen.iter()
                .all(|e| !matches!(e, SessionEvent::Preparing { .. })),
            "engine must not enter Preparing: {seen:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn commands_during_preparing_coalesce_last_wins() {
        let mut rig = rig().await;
        rig.factory.insert(
            "file:///music/slow.ogg",
            SimTrack {
                prepare_delay: Duration::from_millis(200),
                ..SimTrack::default()
            },
        );

        rig.handle.send(EngineCommand::ItemChanged {
            item: Some(track("file:///music/slow.ogg", Some(60_000))),
            autoplay: true,
        });
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Preparing { .. })).await;

        // Flurry of commands while the prepare is in flight
        rig.handle.send(EngineCommand::Pause);
        rig.handle.send(EngineCommand::Play);
        rig.handle.send(EngineCommand::Pause);

        let (_, seen) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Pause { .. })).await;
        assert!(
            seen.iter().all(|e| !matches!(e, SessionEvent::Play { .. })),
            "only the last command may take effect: {seen:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn seek_preserves_play_flag_and_position() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;

        rig.handle.send(EngineCommand::SeekTo { position_ms: 30_000 });
        let (event, seen) =
            wait_for(&mut rig, |e| matches!(e, SessionEvent::SeekComplete { .. })).await;
        let SessionEvent::SeekComplete { position_ms, .. } = event else {
            unreachable!();
        };
        assert_eq!(position_ms, 30_000);
        // Was playing, so no pause happened around the seek
        assert!(
            seen.iter().all(|e| !matches!(e, SessionEvent::Pause { .. })),
            "seek must not change the play flag: {seen:?}"
        );

        // Still advancing after the seek
        advance(Duration::from_millis(2_000)).await;
        rig.handle.send(EngineCommand::FastForward);
        let (event, _) =
            wait_for(&mut rig, |e| matches!(e, SessionEvent::SeekComplete { .. })).await;
        let SessionEvent::SeekComplete { position_ms, .. } = event else {
            unreachable!();
        };
        assert!(
            (46_900..=47_100).contains(&position_ms),
            "position {position_ms} not near 47000"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn seek_while_paused_stays_paused() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;
        rig.handle.send(EngineCommand::Pause);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Pause { .. })).await;

        rig.handle.send(EngineCommand::SeekTo { position_ms: 10_000 });
        let (_, seen) =
            wait_for(&mut rig, |e| matches!(e, SessionEvent::SeekComplete { .. })).await;
        assert!(
            seen.iter().all(|e| !matches!(e, SessionEvent::Play { .. })),
            "seek while paused must not resume: {seen:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn step_commands_clamp_to_track_bounds() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/short.ogg", 60_000).await;

        // Two forward steps from ~0: 15000 then 30000
        rig.handle.send(EngineCommand::FastForward);
        let (event, _) =
            wait_for(&mut rig, |e| matches!(e, SessionEvent::SeekComplete { .. })).await;
        assert!(matches!(
            event,
            SessionEvent::SeekComplete { position_ms: 15_000, .. }
        ));

        // Rewind past zero clamps at zero
        rig.handle.send(EngineCommand::Rewind);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::SeekComplete { .. })).await;
        rig.handle.send(EngineCommand::Rewind);
        let (event, _) =
            wait_for(&mut rig, |e| matches!(e, SessionEvent::SeekComplete { .. })).await;
        assert!(matches!(
            event,
            SessionEvent::SeekComplete { position_ms: 0, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_focus_loss_pauses_without_auto_resume() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;

        rig.platform.emit_focus(FocusChange::PermanentLoss);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Pause { .. })).await;

        rig.platform.emit_focus(FocusChange::Gain);
        let seen = fence(&mut rig).await;
        assert!(
            seen.iter().all(|e| !matches!(e, SessionEvent::Play { .. })),
            "permanent loss must not auto-resume: {seen:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_focus_loss_resumes_if_was_playing() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;

        rig.platform.emit_focus(FocusChange::TransientLoss);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Pause { .. })).await;

        rig.platform.emit_focus(FocusChange::Gain);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_focus_loss_while_paused_stays_paused() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;
        rig.handle.send(EngineCommand::Pause);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Pause { .. })).await;

        rig.platform.emit_focus(FocusChange::TransientLoss);
        rig.platform.emit_focus(FocusChange::Gain);
        let seen = fence(&mut rig).await;
        assert!(
            seen.iter().all(|e| !matches!(e, SessionEvent::Play { .. })),
            "was paused before the loss, must stay paused: {seen:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duckable_focus_loss_ducks_without_pausing() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;

        rig.platform.emit_focus(FocusChange::TransientLossCanDuck);
        let seen = fence(&mut rig).await;
        assert!(
            seen.iter().all(|e| !matches!(e, SessionEvent::Pause { .. })),
            "ducking must not pause: {seen:?}"
        );
        assert_eq!(rig.factory.last_volume(), Some(DUCK_VOLUME));

        // Regain restores full volume, no transport change either way
        rig.platform.emit_focus(FocusChange::Gain);
        let seen = fence(&mut rig).await;
        assert!(
            seen.iter().all(|e| !matches!(
                e,
                SessionEvent::Pause { .. } | SessionEvent::Play { .. }
            )),
            "regain after ducking must not touch transport: {seen:?}"
        );
        assert_eq!(rig.factory.last_volume(), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn seek_forbidden_track_ignores_seeks() {
        let mut rig = rig().await;
        let mut item = track("file:///music/live.ogg", Some(180_000));
        item.seek_forbidden = true;
        rig.handle.send(EngineCommand::ItemChanged {
            item: Some(item),
            autoplay: true,
        });
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;

        rig.handle.send(EngineCommand::SeekTo { position_ms: 30_000 });
        rig.handle.send(EngineCommand::FastForward);
        let seen = fence(&mut rig).await;
        assert!(
            seen.iter()
                .all(|e| !matches!(e, SessionEvent::SeekComplete { .. })),
            "seek-forbidden track must ignore seeks: {seen:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn seek_forbidden_track_skips_the_restore_seek() {
        let mut rig = rig().await;
        let mut item = track("file:///music/live.ogg", Some(180_000));
        item.seek_forbidden = true;
        rig.handle.send(EngineCommand::ItemChanged {
            item: Some(item),
            autoplay: true,
        });
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;

        // Stop with progress on the clock, then replay
        advance(Duration::from_millis(5_000)).await;
        rig.handle.send(EngineCommand::Stop);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Stop { .. })).await;

        rig.handle.send(EngineCommand::Play);
        let (event, seen) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;
        // No restore seek: playback resumes from the start
        assert!(matches!(event, SessionEvent::Play { position_ms: 0, .. }));
        assert!(
            seen.iter()
                .all(|e| !matches!(e, SessionEvent::SeekComplete { .. })),
            "stored progress must not be restored by seeking: {seen:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn audio_effect_attaches_on_the_prepared_resource() {
        let mut rig = rig().await;
        rig.handle
            .send(EngineCommand::SetAudioEffectEnabled { enabled: true });
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;
        assert_eq!(rig.factory.last_effects_enabled(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn route_disconnect_pauses_even_when_ignoring_focus() {
        let mut rig = rig().await;
        rig.handle
            .send(EngineCommand::SetIgnoreAudioFocusLoss { enabled: true });
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;

        // Focus loss is ignored by preference
        rig.platform.emit_focus(FocusChange::PermanentLoss);
        let seen = fence(&mut rig).await;
        assert!(
            seen.iter().all(|e| !matches!(e, SessionEvent::Pause { .. })),
            "focus loss should be ignored: {seen:?}"
        );

        // But headset unplug always pauses
        rig.platform.emit_route_disconnected();
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Pause { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn quality_switch_restores_position_and_play_flag() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;
        advance(Duration::from_millis(3_000)).await;

        rig.handle.send(EngineCommand::SetSoundQuality {
            quality: SoundQuality::High,
        });
        // Re-prepare, restore seek, and resume
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Prepared { .. })).await;
        let (event, _) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;
        let SessionEvent::Play { position_ms, .. } = event else {
            unreachable!();
        };
        assert!(
            (2_900..=3_100).contains(&position_ms),
            "position {position_ms} not near 3000"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn quality_switch_while_paused_stays_paused() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;
        advance(Duration::from_millis(3_000)).await;
        rig.handle.send(EngineCommand::Pause);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Pause { .. })).await;

        rig.handle.send(EngineCommand::SetSoundQuality {
            quality: SoundQuality::Low,
        });
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Prepared { .. })).await;
        let (_, seen) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Pause { .. })).await;
        assert!(
            seen.iter().all(|e| !matches!(e, SessionEvent::Play { .. })),
            "paused session must stay paused across quality switch: {seen:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prepare_failure_enters_error_until_new_command() {
        let mut rig = rig().await;
        rig.factory.insert(
            "file:///music/broken.ogg",
            SimTrack {
                fail_prepare: true,
                ..SimTrack::default()
            },
        );

        rig.handle.send(EngineCommand::ItemChanged {
            item: Some(track("file:///music/broken.ogg", Some(60_000))),
            autoplay: true,
        });
        let (event, _) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Error { .. })).await;
        let SessionEvent::Error { code, .. } = event else {
            unreachable!();
        };
        assert_eq!(code, ErrorCode::PlayerError);

        // A new explicit command restarts resolution from scratch
        rig.factory
            .insert("file:///music/broken.ogg", SimTrack::default());
        rig.handle.send(EngineCommand::Play);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn wifi_only_recheck_aborts_incomplete_stream() {
        let mut rig = rig().await;
        rig.handle.send(EngineCommand::SetOnlyWifiNetwork { enabled: true });
        rig.factory.insert(
            "https://cdn.example/stream.ogg",
            SimTrack {
                buffered_percent: 40,
                ..SimTrack::default()
            },
        );

        rig.handle.send(EngineCommand::ItemChanged {
            item: Some(track("https://cdn.example/stream.ogg", Some(180_000))),
            autoplay: true,
        });
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;

        rig.platform.set_network(NetworkStatus::cellular());
        let (event, _) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Error { .. })).await;
        let SessionEvent::Error { code, .. } = event else {
            unreachable!();
        };
        assert_eq!(code, ErrorCode::OnlyWifiNetwork);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_resource_and_replay_reprepares() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/a.ogg", 180_000).await;

        rig.handle.send(EngineCommand::Stop);
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Stop { .. })).await;

        rig.handle.send(EngineCommand::Play);
        let (_, _) = wait_for(&mut rig, |e| matches!(e, SessionEvent::Preparing { .. })).await;
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Play { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn natural_completion_stops_playback() {
        let mut rig = rig().await;
        start_playing(&mut rig, "file:///music/tiny.ogg", 1_000).await;

        advance(Duration::from_millis(1_100)).await;
        wait_for(&mut rig, |e| matches!(e, SessionEvent::Stop { .. })).await;

        let _ = rig.coordinator;
    }
}
