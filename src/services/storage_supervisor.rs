//! Keeps the shared store attached to this client.
//!
//! While the store is unreachable the client runs in degraded mode: writes are refused and the
//! last snapshot stays on screen. Every time the store comes back the attached session is
//! re-read, which also re-arms the phase timer of a move whose window elapsed meanwhile.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{game_store::GameStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the shared store, watch its health and keep the client in degraded mode while it
/// is unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_game_store(store.clone()).await;
                resume_session(&state, "storage connection established");
                delay = INITIAL_DELAY;

                watch(&state, store.as_ref()).await;
                warn!("exhausted storage reconnect attempts; connecting from scratch");
            }
            Err(err) => warn!(error = %err, "storage connection attempt failed"),
        }

        sleep(delay).await;
        delay = next_delay(delay);
    }
}

/// Poll the store until it stays unreachable through every reconnect attempt.
async fn watch(state: &SharedState, store: &dyn GameStore) {
    loop {
        match store.health_check().await {
            Ok(()) if state.is_degraded() => {
                state.update_degraded(false);
                resume_session(state, "storage healthy again");
            }
            Ok(()) => {}
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !reconnect(state, store).await {
                    return;
                }
                state.update_degraded(false);
                resume_session(state, "storage reconnected");
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

/// Retry the store connection with backoff, entering degraded mode after the first failure.
async fn reconnect(state: &SharedState, store: &dyn GameStore) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "storage reconnect attempt failed");
                if attempt == 0 {
                    state.update_degraded(true);
                }
                sleep(delay).await;
                delay = next_delay(delay);
            }
        }
    }
    false
}

/// Re-read the attached session as soon as the store is reachable again.
fn resume_session(state: &SharedState, reason: &str) {
    info!(reason, "leaving degraded mode; refreshing session");
    state.request_refresh();
}

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use futures::{future::BoxFuture, stream::BoxStream};
    use tokio::time::timeout;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::EngineConfig,
        dao::{
            game_store::memory::MemoryGameStore,
            models::{
                ChangeEvent, EvaluationEntity, MoveEntity, MovePatch, ParticipantEntity,
                ParticipantPatch, SessionEntity, SessionPatch, VoteEntity,
            },
            storage::StorageResult,
        },
        state::AppState,
    };

    async fn refresh_was_requested(state: &SharedState) -> bool {
        timeout(Duration::from_millis(1), state.refresh_requested())
            .await
            .is_ok()
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connections_are_retried_until_the_store_answers() {
        let state = AppState::new(EngineConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let supervisor = tokio::spawn(run(state.clone(), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(StorageError::unavailable(
                        "connection refused".into(),
                        std::io::Error::other("down"),
                    ))
                } else {
                    Ok(Arc::new(MemoryGameStore::new()) as Arc<dyn GameStore>)
                }
            }
        }));

        assert!(state.is_degraded());
        sleep(Duration::from_secs(4)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(!state.is_degraded());
        assert!(state.game_store().await.is_some());
        assert!(refresh_was_requested(&state).await);
        supervisor.abort();
    }

    /// Memory store whose health check fails while `down` is set; reconnects always succeed.
    #[derive(Clone)]
    struct FlappingStore {
        inner: MemoryGameStore,
        down: Arc<AtomicBool>,
    }

    impl GameStore for FlappingStore {
        fn insert_session(
            &self,
            session: SessionEntity,
        ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
            self.inner.insert_session(session)
        }
        fn find_session(
            &self,
            id: &str,
        ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
            self.inner.find_session(id)
        }
        fn update_session(
            &self,
            id: &str,
            patch: SessionPatch,
        ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
            self.inner.update_session(id, patch)
        }
        fn insert_participant(
            &self,
            participant: ParticipantEntity,
        ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
            self.inner.insert_participant(participant)
        }
        fn find_participant(
            &self,
            session_id: &str,
            id: Uuid,
        ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
            self.inner.find_participant(session_id, id)
        }
        fn list_participants(
            &self,
            session_id: &str,
        ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
            self.inner.list_participants(session_id)
        }
        fn update_participant(
            &self,
            session_id: &str,
            id: Uuid,
            patch: ParticipantPatch,
        ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
            self.inner.update_participant(session_id, id, patch)
        }
        fn insert_move(&self, mv: MoveEntity) -> BoxFuture<'static, StorageResult<MoveEntity>> {
            self.inner.insert_move(mv)
        }
        fn find_move(
            &self,
            session_id: &str,
            id: Uuid,
        ) -> BoxFuture<'static, StorageResult<Option<MoveEntity>>> {
            self.inner.find_move(session_id, id)
        }
        fn list_moves(
            &self,
            session_id: &str,
        ) -> BoxFuture<'static, StorageResult<Vec<MoveEntity>>> {
            self.inner.list_moves(session_id)
        }
        fn update_move(
            &self,
            session_id: &str,
            id: Uuid,
            patch: MovePatch,
        ) -> BoxFuture<'static, StorageResult<MoveEntity>> {
            self.inner.update_move(session_id, id, patch)
        }
        fn insert_evaluation(
            &self,
            evaluation: EvaluationEntity,
        ) -> BoxFuture<'static, StorageResult<EvaluationEntity>> {
            self.inner.insert_evaluation(evaluation)
        }
        fn list_evaluations(
            &self,
            session_id: &str,
        ) -> BoxFuture<'static, StorageResult<Vec<EvaluationEntity>>> {
            self.inner.list_evaluations(session_id)
        }
        fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<VoteEntity>> {
            self.inner.insert_vote(vote)
        }
        fn list_votes(
            &self,
            session_id: &str,
            move_id: Uuid,
        ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
            self.inner.list_votes(session_id, move_id)
        }
        fn subscribe(&self, session_id: &str) -> BoxStream<'static, ChangeEvent> {
            self.inner.subscribe(session_id)
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            if self.down.load(Ordering::SeqCst) {
                let err =
                    StorageError::unavailable("health check".into(), std::io::Error::other("down"));
                return Box::pin(async move { Err(err) });
            }
            self.inner.health_check()
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_store_triggers_a_session_refresh() {
        let state = AppState::new(EngineConfig::default());
        let store = FlappingStore {
            inner: MemoryGameStore::new(),
            down: Arc::new(AtomicBool::new(false)),
        };
        let handle = store.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let store = handle.clone();
            async move { Ok(Arc::new(store) as Arc<dyn GameStore>) }
        }));

        sleep(Duration::from_secs(1)).await;
        assert!(refresh_was_requested(&state).await);

        store.down.store(true, Ordering::SeqCst);
        sleep(HEALTH_POLL_INTERVAL).await;
        assert!(refresh_was_requested(&state).await);
        assert!(!state.is_degraded());
        supervisor.abort();
    }
}
