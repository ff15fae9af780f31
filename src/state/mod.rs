/// Game phases and their transitions.
pub mod phase;
/// Reconciled view of the shared tables.
pub mod snapshot;
mod sse;
/// Phase timers and the refresh throttle.
pub mod timers;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::{config::EngineConfig, dao::game_store::GameStore, error::ServiceError};

pub use self::sse::SseHub;
use self::{
    snapshot::SessionSnapshot,
    timers::{PhaseTimers, RefreshClock},
};

/// State handle shared by routes, workers and timers.
pub type SharedState = Arc<AppState>;
/// Upper bound on one guarded store transition.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);
const SSE_CAPACITY: usize = 32;

/// Session and participant this client acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Room code of the attached session.
    pub session_id: String,
    /// Participant this client acts as.
    pub participant_id: Uuid,
}

/// Central state of one participant's client engine.
pub struct AppState {
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    degraded: watch::Sender<bool>,
    sse: SseHub,
    config: EngineConfig,
    identity: RwLock<Option<LocalIdentity>>,
    snapshot: RwLock<Option<SessionSnapshot>>,
    refresh_clock: RefreshClock,
    refresh_requests: Notify,
    timers: PhaseTimers,
    workers: Mutex<Vec<JoinHandle<()>>>,
    transition_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The client starts in degraded mode until a storage backend is installed.
    pub fn new(config: EngineConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            game_store: RwLock::new(None),
            degraded: degraded_tx,
            sse: SseHub::new(SSE_CAPACITY),
            config,
            identity: RwLock::new(None),
            snapshot: RwLock::new(None),
            refresh_clock: RefreshClock::new(),
            refresh_requests: Notify::new(),
            timers: PhaseTimers::new(),
            workers: Mutex::new(Vec::new()),
            transition_gate: Mutex::new(()),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        })
    }

    /// Construct a state with `store` already installed.
    pub async fn with_store(config: EngineConfig, store: Arc<dyn GameStore>) -> SharedState {
        let state = Self::new(config);
        state.set_game_store(store).await;
        state
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current game store or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn set_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current game store and enter degraded mode.
    pub async fn clear_game_store(&self) {
        {
            let mut guard = self.game_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, notifying watchers only when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Broadcast hub feeding the session SSE stream.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Attached identity, if any.
    pub async fn identity(&self) -> Option<LocalIdentity> {
        self.identity.read().await.clone()
    }

    /// Identity of this client or an error when it has not joined a session.
    pub async fn require_identity(&self) -> Result<LocalIdentity, ServiceError> {
        self.identity()
            .await
            .ok_or_else(|| ServiceError::InvalidState("not attached to a session".into()))
    }

    /// Switch to a new identity, dropping everything derived from the previous one.
    pub async fn set_identity(&self, identity: LocalIdentity) {
        *self.identity.write().await = Some(identity);
        self.snapshot.write().await.take();
        self.timers.cancel_all();
        self.refresh_clock.reset().await;
    }

    /// Last known good snapshot.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Replace the cached snapshot.
    pub async fn store_snapshot(&self, snapshot: SessionSnapshot) {
        *self.snapshot.write().await = Some(snapshot);
    }

    /// Attach a refresh failure to the kept snapshot.
    pub async fn record_refresh_error(&self, message: String) {
        if let Some(snapshot) = self.snapshot.write().await.as_mut() {
            snapshot.last_error = Some(message);
        }
    }

    /// Throttle of passive refreshes.
    pub fn refresh_clock(&self) -> &RefreshClock {
        &self.refresh_clock
    }

    /// Ask the poll worker for a forced refresh as soon as possible.
    pub fn request_refresh(&self) {
        self.refresh_requests.notify_one();
    }

    /// Wait until a refresh is requested through [`AppState::request_refresh`].
    pub async fn refresh_requested(&self) {
        self.refresh_requests.notified().await;
    }

    /// Phase timers of this client.
    pub fn timers(&self) -> &PhaseTimers {
        &self.timers
    }

    /// Replace the background workers of the previous session with `handles`.
    pub async fn replace_workers(&self, handles: Vec<JoinHandle<()>>) {
        let mut workers = self.workers.lock().await;
        for previous in workers.drain(..) {
            previous.abort();
        }
        workers.extend(handles);
    }

    /// Stop every background worker and pending timer.
    pub async fn shutdown(&self) {
        self.replace_workers(Vec::new()).await;
        self.timers.cancel_all();
    }

    /// Run the client's own multi-write operations one at a time, bounded by the transition
    /// timeout.
    pub async fn run_transition<F, Fut, T>(&self, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let _gate = self.transition_gate.lock().await;
        let work_future = work();
        match self.transition_timeout {
            Some(limit) => timeout(limit, work_future)
                .await
                .map_err(|_| ServiceError::Timeout)?,
            None => work_future.await,
        }
    }
}
