//! Resource coordinator
//!
//! Wraps the three platform interruption sources (audio focus, output
//! route, network connectivity) and forwards each signal into the
//! engine mailbox as a policy command. Each subscription is acquired
//! exactly once when the coordinator starts and released exactly once
//! at shutdown.

use std::sync::Mutex;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use resona_common::NetworkType;

use crate::playback::types::EngineCommand;
use crate::playback::EngineHandle;

/// Audio focus transitions reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gain,
    PermanentLoss,
    TransientLoss,
    TransientLossCanDuck,
}

/// Output route signals; only disconnection is policy-relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSignal {
    Disconnected,
}

/// Connectivity snapshot from the platform network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    pub connected: bool,
    pub network: NetworkType,
}

impl NetworkStatus {
    pub fn wifi() -> Self {
        Self {
            connected: true,
            network: NetworkType::Wifi,
        }
    }

    pub fn cellular() -> Self {
        Self {
            connected: true,
            network: NetworkType::Cellular,
        }
    }

    pub fn offline() -> Self {
        Self {
            connected: false,
            network: NetworkType::None,
        }
    }
}

/// Policy callbacks delivered into the engine mailbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolicySignal {
    Focus(FocusChange),
    RouteDisconnected,
    Network(NetworkStatus),
}

/// Source of audio-focus transitions.
pub trait FocusSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<FocusChange>;
}

/// Source of output-route signals.
pub trait RouteSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<RouteSignal>;
}

/// Source of connectivity state; `watch` semantics keep only the
/// latest status.
pub trait ConnectivitySource: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<NetworkStatus>;
}

struct Subscriptions {
    focus: broadcast::Receiver<FocusChange>,
    route: broadcast::Receiver<RouteSignal>,
    network: watch::Receiver<NetworkStatus>,
}

/// Owns the platform signal subscriptions for one engine instance.
pub struct ResourceCoordinator {
    /// Kept for synchronous reads during source resolution
    network: watch::Receiver<NetworkStatus>,
    subscriptions: Mutex<Option<Subscriptions>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
}

impl ResourceCoordinator {
    /// Subscribe to all three sources. Called once per engine.
    pub fn new(
        focus: &dyn FocusSource,
        route: &dyn RouteSource,
        connectivity: &dyn ConnectivitySource,
    ) -> Self {
        let network = connectivity.subscribe();
        Self {
            network: network.clone(),
            subscriptions: Mutex::new(Some(Subscriptions {
                focus: focus.subscribe(),
                route: route.subscribe(),
                network,
            })),
            forward_task: Mutex::new(None),
        }
    }

    /// Current connectivity, read synchronously.
    pub fn network_status(&self) -> NetworkStatus {
        *self.network.borrow()
    }

    /// Begin forwarding signals into the engine mailbox.
    pub fn start(&self, engine: EngineHandle) {
        let Some(mut subs) = self.subscriptions.lock().unwrap().take() else {
            warn!("resource coordinator already started");
            return;
        };
        info!("Resource coordinator started");
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    focus = subs.focus.recv() => match focus {
                        Ok(change) => {
                            debug!(?change, "focus change");
                            engine.send(EngineCommand::Policy(PolicySignal::Focus(change)));
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "focus signals lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    route = subs.route.recv() => match route {
                        Ok(RouteSignal::Disconnected) => {
                            debug!("output route disconnected");
                            engine.send(EngineCommand::Policy(PolicySignal::RouteDisconnected));
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "route signals lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = subs.network.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = *subs.network.borrow_and_update();
                        debug!(?status, "network status change");
                        engine.send(EngineCommand::Policy(PolicySignal::Network(status)));
                    }
                }
            }
            debug!("resource coordinator forwarding ended");
        });
        *self.forward_task.lock().unwrap() = Some(task);
    }

    /// Release the subscriptions. Idempotent.
    pub fn shutdown(&self) {
        if let Some(task) = self.forward_task.lock().unwrap().take() {
            task.abort();
            info!("Resource coordinator stopped");
        }
        self.subscriptions.lock().unwrap().take();
    }
}

/// In-process stand-in for the three platform sources, driven manually.
/// Default wiring for the daemon and the test suites.
pub struct SimulatedPlatform {
    focus: broadcast::Sender<FocusChange>,
    route: broadcast::Sender<RouteSignal>,
    network: watch::Sender<NetworkStatus>,
}

impl SimulatedPlatform {
    pub fn new(initial: NetworkStatus) -> Self {
        let (focus, _) = broadcast::channel(16);
        let (route, _) = broadcast::channel(16);
        let (network, _) = watch::channel(initial);
        Self {
            focus,
            route,
            network,
        }
    }

    pub fn emit_focus(&self, change: FocusChange) {
        let _ = self.focus.send(change);
    }

    pub fn emit_route_disconnected(&self) {
        let _ = self.route.send(RouteSignal::Disconnected);
    }

    pub fn set_network(&self, status: NetworkStatus) {
        self.network.send_replace(status);
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new(NetworkStatus::wifi())
    }
}

impl FocusSource for SimulatedPlatform {
    fn subscribe(&self) -> broadcast::Receiver<FocusChange> {
        self.focus.subscribe()
    }
}

impl RouteSource for SimulatedPlatform {
    fn subscribe(&self) -> broadcast::Receiver<RouteSignal> {
        self.route.subscribe()
    }
}

impl ConnectivitySource for SimulatedPlatform {
    fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.network.subscribe()
    }
}
