//! Session hub
//!
//! The fan-out point between the single playback engine and any number
//! of observers. The hub owns the canonical [`StateSnapshot`], applies
//! every engine event to it, and forwards the event to each registered
//! sink. Registration replays the full snapshot as the observer's first
//! event, under the same lock that serializes live fan-out, so a late
//! joiner can never miss or double-apply an event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use resona_common::{
    PlayMode, PlaybackState, SessionCommand, SessionEvent, SleepAction, StateSnapshot,
};

use crate::db::SettingsStore;
use crate::error::{Error, Result};
use crate::playback::{
    EngineCommand, EngineDeps, EngineHandle, EngineNotice, NativePlayerFactory, PlaybackEngine,
    TrackResolver,
};
use crate::playlist::PlaylistManager;
use crate::resources::ResourceCoordinator;
use crate::timer::SleepTimer;

/// Everything the hub wires together at startup.
pub struct HubDeps {
    pub factory: Arc<dyn NativePlayerFactory>,
    pub resolver: Arc<dyn TrackResolver>,
    pub store: SettingsStore,
    pub coordinator: Arc<ResourceCoordinator>,
}

struct HubInner {
    state: StateSnapshot,
    sinks: HashMap<Uuid, mpsc::UnboundedSender<SessionEvent>>,
    playlist: PlaylistManager,
    shutdown: bool,
}

/// One session hub per daemon; owns the engine, the sleep timer, and
/// the observer registry.
pub struct SessionHub {
    inner: Mutex<HubInner>,
    engine: EngineHandle,
    coordinator: Arc<ResourceCoordinator>,
    timer: SleepTimer,
}

impl SessionHub {
    /// Spawn the engine and the fan-out task; start the coordinator.
    pub fn start(deps: HubDeps) -> Arc<Self> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let engine = PlaybackEngine::spawn(EngineDeps {
            factory: deps.factory,
            resolver: deps.resolver,
            store: deps.store,
            coordinator: Arc::clone(&deps.coordinator),
            events: events_tx,
        });
        deps.coordinator.start(engine.clone());

        let hub = Arc::new(Self {
            inner: Mutex::new(HubInner {
                state: StateSnapshot::default(),
                sinks: HashMap::new(),
                playlist: PlaylistManager::new(),
                shutdown: false,
            }),
            engine,
            coordinator: deps.coordinator,
            timer: SleepTimer::new(),
        });

        // Fan-out task: the hub is the sole consumer of engine output.
        // Holding only a weak reference lets a dropped hub end the task
        // even while the engine lives on briefly.
        let weak = Arc::downgrade(&hub);
        tokio::spawn(async move {
            while let Some(notice) = events_rx.recv().await {
                let Some(hub) = weak.upgrade() else {
                    break;
                };
                match notice {
                    EngineNotice::Event(event) => hub.publish(event),
                    EngineNotice::TrackCompleted => hub.on_track_completed(),
                }
            }
            debug!("hub fan-out task ended");
        });

        info!("Session hub started");
        hub
    }

    /// Register an observer. The returned receiver's first event is the
    /// catch-up snapshot; every later event was emitted after it.
    pub fn register(&self) -> Result<(Uuid, mpsc::UnboundedReceiver<SessionEvent>)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutdown {
            return Err(Error::HubClosed);
        }
        let token = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        // Replay under the registry lock: nothing can be fanned out
        // between the snapshot and the sink becoming live
        let _ = tx.send(SessionEvent::Snapshot {
            state: inner.state.clone(),
            timestamp: Utc::now(),
        });
        inner.sinks.insert(token, tx);
        debug!(%token, observers = inner.sinks.len(), "observer registered");
        Ok((token, rx))
    }

    /// Drop an observer; unknown tokens are ignored.
    pub fn unregister(&self, token: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if inner.sinks.remove(&token).is_some() {
            debug!(%token, observers = inner.sinks.len(), "observer unregistered");
        }
    }

    /// Current canonical state, by copy.
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.lock().unwrap().state.clone()
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.inner.lock().unwrap().sinks.len()
    }

    /// Route one command to the engine, the timer, or the playlist.
    ///
    /// Validation failures surface here; playback failures travel as
    /// error events instead.
    pub fn dispatch(self: &Arc<Self>, command: SessionCommand) -> Result<()> {
        if self.inner.lock().unwrap().shutdown {
            return Err(Error::HubClosed);
        }
        debug!(?command, "dispatch");
        match command {
            SessionCommand::Play => self.engine.send(EngineCommand::Play),
            SessionCommand::Pause => self.engine.send(EngineCommand::Pause),
            SessionCommand::Stop => self.engine.send(EngineCommand::Stop),
            SessionCommand::PlayPause => self.engine.send(EngineCommand::PlayPause),
            SessionCommand::SeekTo { position_ms } => {
                self.engine.send(EngineCommand::SeekTo { position_ms })
            }
            SessionCommand::FastForward => self.engine.send(EngineCommand::FastForward),
            SessionCommand::Rewind => self.engine.send(EngineCommand::Rewind),
            SessionCommand::SetSoundQuality { quality } => {
                self.engine.send(EngineCommand::SetSoundQuality { quality })
            }
            SessionCommand::SetAudioEffectEnabled { enabled } => self
                .engine
                .send(EngineCommand::SetAudioEffectEnabled { enabled }),
            SessionCommand::SetOnlyWifiNetwork { enabled } => self
                .engine
                .send(EngineCommand::SetOnlyWifiNetwork { enabled }),
            SessionCommand::SetIgnoreAudioFocusLoss { enabled } => self
                .engine
                .send(EngineCommand::SetIgnoreAudioFocusLoss { enabled }),
            SessionCommand::StartSleepTimer { delay_ms, action } => {
                self.timer
                    .schedule(Arc::downgrade(self), delay_ms, action);
            }
            SessionCommand::CancelSleepTimer => self.timer.cancel(),
            SessionCommand::SetPlaylist {
                tracks,
                position,
                autoplay,
            } => return self.set_playlist(tracks, position, autoplay),
            SessionCommand::SetPlaylistPosition { position } => {
                return self.set_playlist_position(position)
            }
            SessionCommand::SetPlayMode { mode } => self.set_play_mode(mode),
        }
        Ok(())
    }

    fn set_playlist(
        &self,
        tracks: Vec<resona_common::TrackDescriptor>,
        position: usize,
        autoplay: bool,
    ) -> Result<()> {
        let (item, new_position) = {
            let mut inner = self.inner.lock().unwrap();
            inner.playlist.set(tracks, position)?;
            let item = inner.playlist.current();
            let new_position = inner.playlist.position();
            if let Some(new_position) = new_position {
                Self::publish_locked(
                    &mut inner,
                    SessionEvent::PlaylistPositionChanged {
                        position: new_position,
                        timestamp: Utc::now(),
                    },
                );
            }
            (item, new_position)
        };
        info!(?new_position, "playlist replaced");
        self.engine.send(EngineCommand::ItemChanged { item, autoplay });
        Ok(())
    }

    fn set_playlist_position(&self, position: usize) -> Result<()> {
        let item = {
            let mut inner = self.inner.lock().unwrap();
            inner.playlist.set_position(position)?;
            let item = inner.playlist.current();
            Self::publish_locked(
                &mut inner,
                SessionEvent::PlaylistPositionChanged {
                    position,
                    timestamp: Utc::now(),
                },
            );
            item
        };
        // Jumping tracks keeps the session rolling if it was
        let autoplay = matches!(
            self.snapshot().playback_state,
            PlaybackState::Playing | PlaybackState::Preparing
        );
        self.engine.send(EngineCommand::ItemChanged { item, autoplay });
        Ok(())
    }

    fn set_play_mode(&self, mode: PlayMode) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.playlist.set_mode(mode);
            Self::publish_locked(
                &mut inner,
                SessionEvent::PlayModeChanged {
                    mode,
                    timestamp: Utc::now(),
                },
            );
        }
        // LoopOne is realized by the native resource looping itself
        self.engine.send(EngineCommand::SetLooping {
            looping: mode == PlayMode::LoopOne,
        });
    }

    /// Natural end of media: move the playlist cursor per the play mode
    /// and hand the next item to the engine.
    fn on_track_completed(&self) {
        let item = {
            let mut inner = self.inner.lock().unwrap();
            if inner.shutdown {
                return;
            }
            match inner.playlist.advance() {
                Some(next) => {
                    Self::publish_locked(
                        &mut inner,
                        SessionEvent::PlaylistPositionChanged {
                            position: next,
                            timestamp: Utc::now(),
                        },
                    );
                    inner.playlist.current()
                }
                None => {
                    debug!("playlist traversal ended");
                    return;
                }
            }
        };
        self.engine.send(EngineCommand::ItemChanged {
            item,
            autoplay: true,
        });
    }

    /// Called when the sleep timer fires.
    pub(crate) fn sleep_fire(self: &Arc<Self>, action: SleepAction) {
        let result = match action {
            SleepAction::Pause => self.dispatch(SessionCommand::Pause),
            SleepAction::Stop => self.dispatch(SessionCommand::Stop),
            SleepAction::Shutdown => {
                self.shutdown();
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("sleep timer action failed: {}", e);
        }
    }

    fn publish(&self, event: SessionEvent) {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutdown {
            return;
        }
        Self::publish_locked(&mut inner, event);
    }

    /// Apply to canonical state, then fan out; dead sinks are pruned on
    /// the spot. Delivery never blocks.
    fn publish_locked(inner: &mut HubInner, event: SessionEvent) {
        inner.state.apply(&event);
        inner.sinks.retain(|token, tx| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                debug!(%token, "pruning dead observer sink");
            }
            alive
        });
    }

    /// Tear the session down: final shutdown event, registry cleared,
    /// further registration and dispatch rejected. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.shutdown {
                return;
            }
            inner.shutdown = true;
            let event = SessionEvent::Shutdown {
                timestamp: Utc::now(),
            };
            for (_, tx) in inner.sinks.drain() {
                let _ = tx.send(event.clone());
            }
        }
        self.timer.cancel();
        self.engine.send(EngineCommand::Shutdown);
        self.coordinator.shutdown();
        info!("Session hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{DirectResolver, SimPlayerFactory};
    use crate::resources::{NetworkStatus, SimulatedPlatform};
    use resona_common::TrackDescriptor;
    use std::time::Duration;
    use tokio::time::{advance, timeout};

    async fn hub() -> (Arc<SessionHub>, Arc<SimPlayerFactory>) {
        let platform = Arc::new(SimulatedPlatform::new(NetworkStatus::wifi()));
        let coordinator = Arc::new(ResourceCoordinator::new(&*platform, &*platform, &*platform));
        let factory = Arc::new(SimPlayerFactory::new());
        let store = SettingsStore::in_memory().await.unwrap();
        let hub = SessionHub::start(HubDeps {
            factory: Arc::clone(&factory) as Arc<dyn NativePlayerFactory>,
            resolver: Arc::new(DirectResolver),
            store,
            coordinator,
        });
        (hub, factory)
    }

    fn track(n: usize, duration_ms: u64) -> TrackDescriptor {
        TrackDescriptor {
            id: format!("t-{n}"),
            title: format!("Track {n}"),
            artist: "Artist".into(),
            album: "Album".into(),
            source_uri: Some(format!("file:///music/{n}.ogg")),
            icon_uri: None,
            duration_ms: Some(duration_ms),
            seek_forbidden: false,
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("sink closed")
    }

    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("sink closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test(start_paused = true)]
    async fn first_received_event_is_always_the_snapshot() {
        let (hub, _) = hub().await;
        hub.dispatch(SessionCommand::SetPlayMode {
            mode: PlayMode::LoopAll,
        })
        .unwrap();

        let (_, mut rx) = hub.register().unwrap();
        let first = next(&mut rx).await;
        let SessionEvent::Snapshot { state, .. } = first else {
            panic!("first event was not the snapshot: {first:?}");
        };
        assert_eq!(state.play_mode, PlayMode::LoopAll);
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_identical_ordered_sequences() {
        let (hub, _) = hub().await;
        let (_, mut rx_a) = hub.register().unwrap();
        let (_, mut rx_b) = hub.register().unwrap();
        let (_, mut rx_sync) = hub.register().unwrap();

        hub.dispatch(SessionCommand::SetPlaylist {
            tracks: vec![track(0, 180_000)],
            position: 0,
            autoplay: true,
        })
        .unwrap();
        wait_for(&mut rx_sync, |e| matches!(e, SessionEvent::Play { .. })).await;
        hub.dispatch(SessionCommand::Pause).unwrap();

        let mut seq_a = Vec::new();
        let mut seq_b = Vec::new();
        loop {
            let event = next(&mut rx_a).await;
            let done = matches!(event, SessionEvent::Pause { .. });
            seq_a.push(event);
            if done {
                break;
            }
        }
        // Skip b's snapshot, then expect a's whole post-snapshot tail
        let first = next(&mut rx_b).await;
        assert!(matches!(first, SessionEvent::Snapshot { .. }));
        loop {
            let event = next(&mut rx_b).await;
            let done = matches!(event, SessionEvent::Pause { .. });
            seq_b.push(event);
            if done {
                break;
            }
        }
        // b joined before any live event, so past its snapshot the
        // streams must agree event for event
        let tail_a: Vec<_> = seq_a
            .iter()
            .filter(|e| !matches!(e, SessionEvent::Snapshot { .. }))
            .collect();
        let tail_b: Vec<_> = seq_b.iter().collect();
        assert_eq!(tail_a, tail_b);
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_mirror_converges_with_canonical() {
        let (hub, _) = hub().await;
        hub.dispatch(SessionCommand::SetPlaylist {
            tracks: vec![track(0, 180_000)],
            position: 0,
            autoplay: true,
        })
        .unwrap();

        // Let playback get going before joining
        let (_, mut early) = hub.register().unwrap();
        wait_for(&mut early, |e| matches!(e, SessionEvent::Play { .. })).await;

        let (_, mut late) = hub.register().unwrap();
        let mut mirror = StateSnapshot::default();
        mirror.apply(&next(&mut late).await);
        assert_eq!(mirror.playback_state, PlaybackState::Playing);

        hub.dispatch(SessionCommand::Pause).unwrap();
        let event = wait_for(&mut late, |e| matches!(e, SessionEvent::Pause { .. })).await;
        mirror.apply(&event);
        assert_eq!(mirror.playback_state, hub.snapshot().playback_state);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sink_is_pruned_on_next_fanout() {
        let (hub, _) = hub().await;
        let (_, rx) = hub.register().unwrap();
        let (_, mut keep) = hub.register().unwrap();
        assert_eq!(hub.observer_count(), 2);

        drop(rx);
        hub.dispatch(SessionCommand::SetPlayMode {
            mode: PlayMode::Shuffle,
        })
        .unwrap();
        wait_for(&mut keep, |e| matches!(e, SessionEvent::PlayModeChanged { .. })).await;
        assert_eq!(hub.observer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_notifies_and_rejects_new_observers() {
        let (hub, _) = hub().await;
        let (_, mut rx) = hub.register().unwrap();

        hub.shutdown();
        let event = next(&mut rx).await;
        assert!(matches!(event, SessionEvent::Shutdown { .. }));

        assert!(matches!(hub.register(), Err(Error::HubClosed)));
        assert!(matches!(
            hub.dispatch(SessionCommand::Play),
            Err(Error::HubClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_playlist_position_is_rejected() {
        let (hub, _) = hub().await;
        hub.dispatch(SessionCommand::SetPlaylist {
            tracks: vec![track(0, 60_000)],
            position: 0,
            autoplay: false,
        })
        .unwrap();

        let err = hub
            .dispatch(SessionCommand::SetPlaylistPosition { position: 5 })
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_advances_to_the_next_track() {
        let (hub, _) = hub().await;
        let (_, mut rx) = hub.register().unwrap();

        hub.dispatch(SessionCommand::SetPlaylist {
            tracks: vec![track(0, 1_000), track(1, 60_000)],
            position: 0,
            autoplay: true,
        })
        .unwrap();
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Play { .. })).await;

        advance(Duration::from_millis(1_100)).await;
        // Track 0 ends; cursor moves and track 1 starts on its own
        let event = wait_for(&mut rx, |e| {
            matches!(e, SessionEvent::PlaylistPositionChanged { .. })
        })
        .await;
        assert!(matches!(
            event,
            SessionEvent::PlaylistPositionChanged { position: 1, .. }
        ));
        let event = wait_for(&mut rx, |e| {
            matches!(e, SessionEvent::PlayingItemChanged { item: Some(_), .. })
        })
        .await;
        let SessionEvent::PlayingItemChanged { item: Some(item), .. } = event else {
            unreachable!();
        };
        assert_eq!(item.id, "t-1");
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Play { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_mode_stops_at_the_end_of_the_list() {
        let (hub, _) = hub().await;
        let (_, mut rx) = hub.register().unwrap();

        hub.dispatch(SessionCommand::SetPlaylist {
            tracks: vec![track(0, 1_000)],
            position: 0,
            autoplay: true,
        })
        .unwrap();
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Play { .. })).await;

        advance(Duration::from_millis(1_100)).await;
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Stop { .. })).await;
        assert_eq!(hub.snapshot().playback_state, PlaybackState::Stopped);
        // Progress pinned at the track duration
        let position = hub.snapshot().position_at(Utc::now());
        assert!(
            (1_000..1_100).contains(&position),
            "position {position} not pinned at duration"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_timer_pauses_after_the_delay() {
        let (hub, _) = hub().await;
        let (_, mut rx) = hub.register().unwrap();

        hub.dispatch(SessionCommand::SetPlaylist {
            tracks: vec![track(0, 180_000)],
            position: 0,
            autoplay: true,
        })
        .unwrap();
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Play { .. })).await;

        hub.dispatch(SessionCommand::StartSleepTimer {
            delay_ms: 30_000,
            action: SleepAction::Pause,
        })
        .unwrap();
        advance(Duration::from_millis(30_100)).await;
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Pause { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_sleep_timer_never_fires() {
        let (hub, _) = hub().await;
        let (_, mut rx) = hub.register().unwrap();

        hub.dispatch(SessionCommand::SetPlaylist {
            tracks: vec![track(0, 180_000)],
            position: 0,
            autoplay: true,
        })
        .unwrap();
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Play { .. })).await;

        hub.dispatch(SessionCommand::StartSleepTimer {
            delay_ms: 10_000,
            action: SleepAction::Pause,
        })
        .unwrap();
        hub.dispatch(SessionCommand::CancelSleepTimer).unwrap();
        advance(Duration::from_millis(20_000)).await;

        // Probe: the next observable event is the play-mode change, not
        // a pause
        hub.dispatch(SessionCommand::SetPlayMode {
            mode: PlayMode::LoopAll,
        })
        .unwrap();
        let event = wait_for(&mut rx, |e| {
            matches!(
                e,
                SessionEvent::Pause { .. } | SessionEvent::PlayModeChanged { .. }
            )
        })
        .await;
        assert!(matches!(event, SessionEvent::PlayModeChanged { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_the_sleep_timer_replaces_the_old_one() {
        let (hub, _) = hub().await;
        let (_, mut rx) = hub.register().unwrap();

        hub.dispatch(SessionCommand::SetPlaylist {
            tracks: vec![track(0, 180_000)],
            position: 0,
            autoplay: true,
        })
        .unwrap();
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Play { .. })).await;

        hub.dispatch(SessionCommand::StartSleepTimer {
            delay_ms: 5_000,
            action: SleepAction::Stop,
        })
        .unwrap();
        hub.dispatch(SessionCommand::StartSleepTimer {
            delay_ms: 60_000,
            action: SleepAction::Pause,
        })
        .unwrap();

        // The first timer's deadline passes without firing
        advance(Duration::from_millis(10_000)).await;
        hub.dispatch(SessionCommand::SetPlayMode {
            mode: PlayMode::LoopAll,
        })
        .unwrap();
        let event = wait_for(&mut rx, |e| {
            matches!(
                e,
                SessionEvent::Stop { .. } | SessionEvent::PlayModeChanged { .. }
            )
        })
        .await;
        assert!(matches!(event, SessionEvent::PlayModeChanged { .. }));

        // The replacement fires with its action
        advance(Duration::from_millis(55_000)).await;
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Pause { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_sleep_action_tears_the_session_down() {
        let (hub, _) = hub().await;
        let (_, mut rx) = hub.register().unwrap();

        hub.dispatch(SessionCommand::StartSleepTimer {
            delay_ms: 1_000,
            action: SleepAction::Shutdown,
        })
        .unwrap();
        advance(Duration::from_millis(1_100)).await;
        wait_for(&mut rx, |e| matches!(e, SessionEvent::Shutdown { .. })).await;
        assert!(hub.register().is_err());
    }
}
