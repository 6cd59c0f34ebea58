//! Sleep timer
//!
//! Single-shot and cancellable. Arming a new timer replaces any armed
//! one; firing routes the chosen action through the hub's normal
//! dispatch path, so observers see the resulting pause/stop/shutdown
//! exactly as if a client had issued it.

use std::sync::{Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use resona_common::SleepAction;

use crate::hub::SessionHub;

pub struct SleepTimer {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SleepTimer {
    pub fn new() -> Self {
        Self {
            task: Mutex::new(None),
        }
    }

    /// Arm the timer, replacing any previously armed one.
    pub fn schedule(&self, hub: Weak<SessionHub>, delay_ms: u64, action: SleepAction) {
        let mut slot = self.task.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.abort();
            debug!("previous sleep timer replaced");
        }
        info!(delay_ms, ?action, "sleep timer armed");
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let Some(hub) = hub.upgrade() else {
                return;
            };
            info!(?action, "sleep timer fired");
            hub.sleep_fire(action);
        }));
    }

    /// Disarm without firing. No effect when nothing is armed.
    pub fn cancel(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            info!("sleep timer cancelled");
        }
    }
}

impl Default for SleepTimer {
    fn default() -> Self {
        Self::new()
    }
}
