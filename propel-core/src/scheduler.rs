//! Autosave triggers: a debounce window per mutation burst plus a fixed
//! periodic safety net.
//!
//! Saving on every keystroke floods the backend; a single debounce risks
//! losing the final burst if the tab closes before it fires. So: the
//! debounce handles the common case, the periodic timer catches long quiet
//! editing sessions, and the coordinator's detached flush covers unload.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::save::SaveCoordinator;

/// Trigger cadence. Defaults match interactive typing.
#[derive(Debug, Clone, Copy)]
pub struct AutosaveConfig {
    /// Quiet period after the most recent mutation before an autosave
    /// fires. Reset on each new mutation.
    pub debounce: Duration,
    /// Fixed safety-net interval, independent of the debounce.
    pub interval: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(800),
            interval: Duration::from_secs(30),
        }
    }
}

/// Owns the two trigger tasks. Both call `request_save(false)`; manual
/// saves go straight to the coordinator.
pub struct AutosaveScheduler {
    mutation_tx: mpsc::Sender<()>,
    debounce_task: JoinHandle<()>,
    periodic_task: JoinHandle<()>,
}

impl AutosaveScheduler {
    pub fn start(coordinator: Arc<SaveCoordinator>, config: AutosaveConfig) -> Self {
        let (mutation_tx, mut mutation_rx) = mpsc::channel::<()>(64);

        let debounce = config.debounce;
        let debounce_coordinator = Arc::clone(&coordinator);
        let debounce_task = tokio::spawn(async move {
            // Outer loop: wait for the first mutation of a burst.
            while mutation_rx.recv().await.is_some() {
                // Inner loop: each further mutation restarts the window.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => {
                            debounce_coordinator.request_save(false).await;
                            break;
                        }
                        tick = mutation_rx.recv() => {
                            if tick.is_none() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        let interval = config.interval;
        let periodic_coordinator = Arc::clone(&coordinator);
        let periodic_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate first tick is not a save
            loop {
                ticker.tick().await;
                periodic_coordinator.request_save(false).await;
            }
        });

        Self {
            mutation_tx,
            debounce_task,
            periodic_task,
        }
    }

    /// Record a local mutation. Cheap and non-blocking; a full buffer means
    /// a tick is already pending, so dropping the send is correct.
    pub fn note_mutation(&self) {
        let _ = self.mutation_tx.try_send(());
    }

    /// Stop both trigger tasks.
    pub fn shutdown(&self) {
        self.debounce_task.abort();
        self.periodic_task.abort();
    }
}

impl Drop for AutosaveScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
