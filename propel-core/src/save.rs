//! Save coordinator: at most one in-flight persistence request per session,
//! without ever losing the latest state.
//!
//! Bursty local mutations are coalesced through a small explicit state
//! machine:
//!
//! ```text
//! Idle ──request_save──► InFlight ──request_save──► InFlightQueued
//!   ▲                        │                            │
//!   └────────── resolve ─────┴────── drive follow-up ◄────┘
//! ```
//!
//! A request that arrives mid-flight marks queued intent instead of issuing
//! a second call; when the in-flight save resolves, exactly one follow-up is
//! driven from a fresh snapshot, so state mutated during the flight is
//! captured. Manual intent is sticky: once a queued save is manual, a later
//! automatic trigger never downgrades it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::section::SectionSet;
use crate::session::{now_millis, SaveAck, SavePayload, SaveRequest, Session};

/// Failures from the persistence endpoint.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The server-side session referenced by the current id no longer
    /// exists. Distinguished so the coordinator can recreate once.
    #[error("session not found")]
    SessionNotFound,
    #[error("save timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Boundary to the persistence endpoint.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, payload: SavePayload) -> Result<SaveAck, StoreError>;
}

/// Coalescing state. Exhaustively matched everywhere it is inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    InFlight,
    InFlightQueued { manual: bool },
}

/// Passive UI state surfaced by the coordinator. Nothing here aborts the
/// session or propagates past the component boundary.
#[derive(Debug, Clone)]
pub enum SaveEvent {
    Saved { manual: bool, session_id: String },
    Failed {
        manual: bool,
        /// True when the recreate-and-retry path also hit "session not
        /// found"; surfaced persistently rather than retried again.
        stale_session: bool,
        reason: String,
    },
}

/// What `request_save` did with the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A save was executed (and any queued follow-ups drained).
    Executed,
    /// A save was already in flight; intent was queued.
    Queued,
}

const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serializes persistence for one session.
pub struct SaveCoordinator {
    model: Arc<RwLock<SectionSet>>,
    session: Arc<RwLock<Session>>,
    store: Arc<dyn SessionStore>,
    state: Mutex<SaveState>,
    save_timeout: Duration,
    event_tx: mpsc::Sender<SaveEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<SaveEvent>>>,
}

impl SaveCoordinator {
    pub fn new(
        model: Arc<RwLock<SectionSet>>,
        session: Arc<RwLock<Session>>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            model,
            session,
            store,
            state: Mutex::new(SaveState::Idle),
            save_timeout: DEFAULT_SAVE_TIMEOUT,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    pub fn with_timeout(mut self, save_timeout: Duration) -> Self {
        self.save_timeout = save_timeout;
        self
    }

    /// Take the event receiver (can only be called once).
    pub async fn take_event_rx(&self) -> Option<mpsc::Receiver<SaveEvent>> {
        self.event_rx.lock().await.take()
    }

    pub async fn state(&self) -> SaveState {
        *self.state.lock().await
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Request a persistence pass.
    ///
    /// If a save is already in flight the request collapses into queued
    /// intent and returns immediately; otherwise this call drives the save
    /// (and any follow-up queued while it ran) to completion.
    pub async fn request_save(&self, manual: bool) -> SaveOutcome {
        {
            let mut state = self.state.lock().await;
            match *state {
                SaveState::Idle => {
                    *state = SaveState::InFlight;
                }
                SaveState::InFlight => {
                    *state = SaveState::InFlightQueued { manual };
                    return SaveOutcome::Queued;
                }
                SaveState::InFlightQueued { manual: queued } => {
                    // manual intent is sticky, never downgraded
                    *state = SaveState::InFlightQueued {
                        manual: queued || manual,
                    };
                    return SaveOutcome::Queued;
                }
            }
        }
        self.drive(manual).await;
        SaveOutcome::Executed
    }

    /// Unload-time flush: snapshot now, fire a detached best-effort save
    /// with no response handling.
    pub fn flush_detached(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let payload = coordinator.build_payload().await;
            if let Err(err) = coordinator.store.save(payload).await {
                log::debug!("detached flush not delivered: {err}");
            }
        });
    }

    /// Run the in-flight save, then drain queued follow-ups one at a time.
    async fn drive(&self, mut manual: bool) {
        loop {
            let succeeded = self.execute_save(manual).await;
            let mut state = self.state.lock().await;
            match (*state, succeeded) {
                (SaveState::InFlightQueued { manual: queued }, true) => {
                    *state = SaveState::InFlight;
                    manual = queued;
                }
                // A failure drops queued intent: the next debounce tick,
                // periodic tick, or user action is the retry path.
                _ => {
                    *state = SaveState::Idle;
                    return;
                }
            }
        }
    }

    /// One persistence attempt, including the one-shot stale-session
    /// recreate. Returns whether the save landed.
    async fn execute_save(&self, manual: bool) -> bool {
        let mut recreate_attempted = false;
        loop {
            // Snapshot at execution time, not at request time: mutations
            // that raced in since the trigger are captured, not dropped.
            let payload = self.build_payload().await;
            let result = match tokio::time::timeout(self.save_timeout, self.store.save(payload))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.save_timeout)),
            };

            match result {
                Ok(ack) => {
                    {
                        let mut session = self.session.write().await;
                        session.session_id = Some(ack.session_id.clone());
                        session.last_saved_at = Some(now_millis());
                    }
                    log::debug!("saved session {}", ack.session_id);
                    self.emit(SaveEvent::Saved {
                        manual,
                        session_id: ack.session_id,
                    })
                    .await;
                    return true;
                }
                Err(StoreError::SessionNotFound) if !recreate_attempted => {
                    log::warn!("persisted session vanished; retrying as a new session");
                    recreate_attempted = true;
                    self.session.write().await.session_id = None;
                }
                Err(err) => {
                    let stale_session = matches!(err, StoreError::SessionNotFound);
                    log::warn!("save failed: {err}");
                    self.emit(SaveEvent::Failed {
                        manual,
                        stale_session,
                        reason: err.to_string(),
                    })
                    .await;
                    return false;
                }
            }
        }
    }

    async fn build_payload(&self) -> SavePayload {
        let snapshot = self.model.read().await.snapshot();
        let session = self.session.read().await;
        SavePayload {
            session_id: session.session_id.clone(),
            owner_context: session.owner_context.clone(),
            name: session.name.clone(),
            state: SaveRequest::from_snapshot(snapshot),
        }
    }

    async fn emit(&self, event: SaveEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Semaphore;

    /// Scripted persistence endpoint: records payloads, tracks concurrency,
    /// optionally gates completion behind a semaphore, and replays a queue
    /// of responses (defaulting to success).
    struct ScriptedStore {
        gate: Option<Arc<Semaphore>>,
        calls: StdMutex<Vec<SavePayload>>,
        responses: StdMutex<VecDeque<Result<SaveAck, StoreError>>>,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl ScriptedStore {
        fn new() -> Self {
            Self {
                gate: None,
                calls: StdMutex::new(Vec::new()),
                responses: StdMutex::new(VecDeque::new()),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            let mut store = Self::new();
            store.gate = Some(gate);
            store
        }

        fn push_response(&self, response: Result<SaveAck, StoreError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn calls(&self) -> Vec<SavePayload> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionStore for ScriptedStore {
        async fn save(&self, payload: SavePayload) -> Result<SaveAck, StoreError> {
            let n = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(n, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.calls.lock().unwrap().push(payload);
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(SaveAck {
                    session_id: "session-1".into(),
                }))
        }
    }

    fn coordinator_with(
        store: Arc<ScriptedStore>,
    ) -> (Arc<SaveCoordinator>, Arc<RwLock<SectionSet>>) {
        let model = Arc::new(RwLock::new(SectionSet::new()));
        let session = Arc::new(RwLock::new(Session::new("opp-1", "Draft")));
        let coordinator = Arc::new(SaveCoordinator::new(
            model.clone(),
            session,
            store as Arc<dyn SessionStore>,
        ));
        (coordinator, model)
    }

    #[tokio::test]
    async fn test_single_save_stores_session_id() {
        let store = Arc::new(ScriptedStore::new());
        let (coordinator, model) = coordinator_with(store.clone());
        model.write().await.set_content("summary", "hello");

        let outcome = coordinator.request_save(false).await;
        assert_eq!(outcome, SaveOutcome::Executed);
        assert_eq!(store.calls().len(), 1);
        assert_eq!(store.calls()[0].session_id, None);

        let session = coordinator.session().await;
        assert_eq!(session.session_id.as_deref(), Some("session-1"));
        assert!(session.last_saved_at.is_some());
        assert_eq!(coordinator.state().await, SaveState::Idle);
    }

    #[tokio::test]
    async fn test_no_concurrent_saves_and_one_follow_up() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(ScriptedStore::gated(gate.clone()));
        let (coordinator, model) = coordinator_with(store.clone());
        model.write().await.set_content("summary", "first");

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.request_save(false).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.state().await, SaveState::InFlight);

        // mutate mid-flight, then request twice more
        model.write().await.set_content("summary", "second");
        assert_eq!(coordinator.request_save(false).await, SaveOutcome::Queued);
        assert_eq!(coordinator.request_save(false).await, SaveOutcome::Queued);

        gate.add_permits(2);
        assert_eq!(first.await.unwrap(), SaveOutcome::Executed);

        let calls = store.calls();
        // three requests collapsed into two calls, never concurrent
        assert_eq!(calls.len(), 2);
        assert_eq!(store.max_concurrent.load(Ordering::SeqCst), 1);
        // the follow-up payload reflects the mid-flight mutation
        assert_eq!(calls[1].state.sections[0].content, "second");
        assert_eq!(coordinator.state().await, SaveState::Idle);
    }

    #[tokio::test]
    async fn test_manual_intent_is_sticky() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(ScriptedStore::gated(gate.clone()));
        let (coordinator, _model) = coordinator_with(store.clone());

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.request_save(false).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.request_save(true).await; // manual arrives mid-flight
        coordinator.request_save(false).await; // later automatic must not downgrade
        assert_eq!(
            coordinator.state().await,
            SaveState::InFlightQueued { manual: true }
        );

        let mut events = coordinator.take_event_rx().await.unwrap();
        gate.add_permits(2);
        first.await.unwrap();

        match events.recv().await.unwrap() {
            SaveEvent::Saved { manual: false, .. } => {}
            other => panic!("expected autosave event, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            SaveEvent::Saved { manual: true, .. } => {}
            other => panic!("expected manual save event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_session_recreates_once() {
        let store = Arc::new(ScriptedStore::new());
        store.push_response(Err(StoreError::SessionNotFound));
        store.push_response(Ok(SaveAck {
            session_id: "fresh".into(),
        }));
        let (coordinator, _model) = coordinator_with(store.clone());
        {
            let session = coordinator.session.clone();
            session.write().await.session_id = Some("gone".into());
        }

        coordinator.request_save(false).await;

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].session_id.as_deref(), Some("gone"));
        // retry goes out as a fresh create
        assert_eq!(calls[1].session_id, None);
        assert_eq!(
            coordinator.session().await.session_id.as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn test_second_stale_failure_surfaces_no_third_attempt() {
        let store = Arc::new(ScriptedStore::new());
        store.push_response(Err(StoreError::SessionNotFound));
        store.push_response(Err(StoreError::SessionNotFound));
        let (coordinator, _model) = coordinator_with(store.clone());
        let mut events = coordinator.take_event_rx().await.unwrap();

        coordinator.request_save(true).await;

        assert_eq!(store.calls().len(), 2);
        match events.recv().await.unwrap() {
            SaveEvent::Failed {
                manual: true,
                stale_session: true,
                ..
            } => {}
            other => panic!("expected stale-session failure, got {other:?}"),
        }
        // the coordinator recovers; a later trigger saves normally
        assert_eq!(coordinator.state().await, SaveState::Idle);
        coordinator.request_save(false).await;
        assert_eq!(store.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_no_automatic_retry() {
        let store = Arc::new(ScriptedStore::new());
        store.push_response(Err(StoreError::Backend("500".into())));
        let (coordinator, _model) = coordinator_with(store.clone());
        let mut events = coordinator.take_event_rx().await.unwrap();

        coordinator.request_save(false).await;

        assert_eq!(store.calls().len(), 1);
        match events.recv().await.unwrap() {
            SaveEvent::Failed {
                stale_session: false,
                ..
            } => {}
            other => panic!("expected transient failure, got {other:?}"),
        }
        assert_eq!(coordinator.state().await, SaveState::Idle);
    }

    #[tokio::test]
    async fn test_timeout_is_a_generic_failure() {
        struct StallingStore;

        #[async_trait]
        impl SessionStore for StallingStore {
            async fn save(&self, _payload: SavePayload) -> Result<SaveAck, StoreError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(SaveAck {
                    session_id: "never".into(),
                })
            }
        }

        let model = Arc::new(RwLock::new(SectionSet::new()));
        let session = Arc::new(RwLock::new(Session::new("opp", "Draft")));
        let coordinator = SaveCoordinator::new(model, session, Arc::new(StallingStore))
            .with_timeout(Duration::from_millis(50));
        let mut events = coordinator.take_event_rx().await.unwrap();

        coordinator.request_save(false).await;

        match events.recv().await.unwrap() {
            SaveEvent::Failed {
                stale_session: false,
                reason,
                ..
            } => assert!(reason.contains("timed out")),
            other => panic!("expected timeout failure, got {other:?}"),
        }
        assert_eq!(coordinator.state().await, SaveState::Idle);
    }

    #[tokio::test]
    async fn test_flush_detached_fires_a_save() {
        let store = Arc::new(ScriptedStore::new());
        let (coordinator, model) = coordinator_with(store.clone());
        model.write().await.set_content("summary", "closing tab");

        coordinator.flush_detached();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].state.sections[0].content, "closing tab");
        // fire-and-forget: no response handling, session untouched
        assert!(coordinator.session().await.session_id.is_none());
    }
}
