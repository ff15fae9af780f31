//! In-process implementation of [`GameStore`].
//!
//! Several clients embedded in one process (tests, local demos) share one
//! [`MemoryGameStore`] by cloning it. Uniqueness of evaluation and vote pairs and the
//! conditional move update are enforced under the per-key shard lock of the backing maps.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    StreamExt,
    future::{self, BoxFuture},
    stream::BoxStream,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;

use crate::dao::{
    game_store::{GameStore, sort_moves},
    models::{
        ChangeEvent, ChangeKind, EvaluationEntity, MoveEntity, MovePatch, ParticipantEntity,
        ParticipantPatch, SessionEntity, SessionPatch, Table, VoteEntity,
    },
    storage::{StorageError, StorageResult},
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Shared in-memory tables with a broadcast change feed.
#[derive(Clone)]
pub struct MemoryGameStore {
    inner: Arc<Tables>,
}

struct Tables {
    sessions: DashMap<String, SessionEntity>,
    participants: DashMap<Uuid, ParticipantEntity>,
    moves: DashMap<Uuid, MoveEntity>,
    evaluations: DashMap<(Uuid, Uuid), EvaluationEntity>,
    votes: DashMap<(Uuid, Uuid), VoteEntity>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Tables {
                sessions: DashMap::new(),
                participants: DashMap::new(),
                moves: DashMap::new(),
                evaluations: DashMap::new(),
                votes: DashMap::new(),
                changes,
            }),
        }
    }

    fn notify(&self, table: Table, kind: ChangeKind, session_id: &str, key: String) {
        let _ = self.inner.changes.send(ChangeEvent {
            table,
            kind,
            session_id: session_id.to_string(),
            key,
        });
    }
}

fn ready<T: Send + 'static>(result: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
    Box::pin(future::ready(result))
}

impl GameStore for MemoryGameStore {
    fn insert_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let result = match self.inner.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::conflict(session.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(session)
            }
        };
        if let Ok(session) = &result {
            self.notify(Table::Sessions, ChangeKind::Insert, &session.id, session.id.clone());
        }
        ready(result)
    }

    fn find_session(&self, id: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let found = self.inner.sessions.get(id).map(|entry| entry.clone());
        ready(Ok(found))
    }

    fn update_session(
        &self,
        id: &str,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let result = match self.inner.sessions.get_mut(id) {
            Some(mut entry) => patch.apply(&mut entry).map(|()| entry.clone()),
            None => Err(StorageError::not_found(id)),
        };
        if result.is_ok() {
            self.notify(Table::Sessions, ChangeKind::Update, id, id.to_string());
        }
        ready(result)
    }

    fn insert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let result = match self.inner.participants.entry(participant.id) {
            Entry::Occupied(_) => Err(StorageError::conflict(participant.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(participant.clone());
                Ok(participant)
            }
        };
        if let Ok(participant) = &result {
            self.notify(
                Table::Participants,
                ChangeKind::Insert,
                &participant.session_id,
                participant.id.to_string(),
            );
        }
        ready(result)
    }

    fn find_participant(
        &self,
        session_id: &str,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let found = self
            .inner
            .participants
            .get(&id)
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.clone());
        ready(Ok(found))
    }

    fn list_participants(
        &self,
        session_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let participants = self
            .inner
            .participants
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.clone())
            .collect();
        ready(Ok(participants))
    }

    fn update_participant(
        &self,
        session_id: &str,
        id: Uuid,
        patch: ParticipantPatch,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let result = match self.inner.participants.get_mut(&id) {
            Some(mut entry) if entry.session_id == session_id => {
                patch.apply(&mut entry);
                Ok(entry.clone())
            }
            _ => Err(StorageError::not_found(id.to_string())),
        };
        if result.is_ok() {
            self.notify(
                Table::Participants,
                ChangeKind::Update,
                session_id,
                id.to_string(),
            );
        }
        ready(result)
    }

    fn insert_move(&self, mv: MoveEntity) -> BoxFuture<'static, StorageResult<MoveEntity>> {
        let result = match self.inner.moves.entry(mv.id) {
            Entry::Occupied(_) => Err(StorageError::conflict(mv.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(mv.clone());
                Ok(mv)
            }
        };
        if let Ok(mv) = &result {
            self.notify(Table::Moves, ChangeKind::Insert, &mv.session_id, mv.id.to_string());
        }
        ready(result)
    }

    fn find_move(
        &self,
        session_id: &str,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<MoveEntity>>> {
        let found = self
            .inner
            .moves
            .get(&id)
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.clone());
        ready(Ok(found))
    }

    fn list_moves(&self, session_id: &str) -> BoxFuture<'static, StorageResult<Vec<MoveEntity>>> {
        let mut moves: Vec<MoveEntity> = self
            .inner
            .moves
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.clone())
            .collect();
        sort_moves(&mut moves);
        ready(Ok(moves))
    }

    fn update_move(
        &self,
        session_id: &str,
        id: Uuid,
        patch: MovePatch,
    ) -> BoxFuture<'static, StorageResult<MoveEntity>> {
        let result = match self.inner.moves.get_mut(&id) {
            Some(mut entry) if entry.session_id == session_id => {
                patch.apply(&mut entry).map(|()| entry.clone())
            }
            _ => Err(StorageError::not_found(id.to_string())),
        };
        if result.is_ok() {
            self.notify(Table::Moves, ChangeKind::Update, session_id, id.to_string());
        }
        ready(result)
    }

    fn insert_evaluation(
        &self,
        evaluation: EvaluationEntity,
    ) -> BoxFuture<'static, StorageResult<EvaluationEntity>> {
        let pair = (evaluation.move_id, evaluation.evaluator_id);
        let result = match self.inner.evaluations.entry(pair) {
            Entry::Occupied(_) => Err(StorageError::conflict(format!(
                "{}::{}",
                pair.0, pair.1
            ))),
            Entry::Vacant(slot) => {
                slot.insert(evaluation.clone());
                Ok(evaluation)
            }
        };
        if let Ok(evaluation) = &result {
            self.notify(
                Table::Evaluations,
                ChangeKind::Insert,
                &evaluation.session_id,
                evaluation.id.to_string(),
            );
        }
        ready(result)
    }

    fn list_evaluations(
        &self,
        session_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<EvaluationEntity>>> {
        let mut evaluations: Vec<EvaluationEntity> = self
            .inner
            .evaluations
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.clone())
            .collect();
        evaluations.sort_by_key(|evaluation| evaluation.created_at);
        ready(Ok(evaluations))
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<VoteEntity>> {
        let pair = (vote.move_id, vote.voter_id);
        let result = match self.inner.votes.entry(pair) {
            Entry::Occupied(_) => Err(StorageError::conflict(format!(
                "{}::{}",
                pair.0, pair.1
            ))),
            Entry::Vacant(slot) => {
                slot.insert(vote.clone());
                Ok(vote)
            }
        };
        if let Ok(vote) = &result {
            self.notify(
                Table::Votes,
                ChangeKind::Insert,
                &vote.session_id,
                vote.id.to_string(),
            );
        }
        ready(result)
    }

    fn list_votes(
        &self,
        session_id: &str,
        move_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let votes = self
            .inner
            .votes
            .iter()
            .filter(|entry| entry.session_id == session_id && entry.move_id == move_id)
            .map(|entry| entry.clone())
            .collect();
        ready(Ok(votes))
    }

    fn subscribe(&self, session_id: &str) -> BoxStream<'static, ChangeEvent> {
        let session_id = session_id.to_string();
        BroadcastStream::new(self.inner.changes.subscribe())
            .filter_map(move |received| {
                let session_id = session_id.clone();
                async move {
                    match received {
                        Ok(event) if event.session_id == session_id => Some(event),
                        Ok(_) => None,
                        // Missed notifications collapse into one session-wide nudge.
                        Err(BroadcastStreamRecvError::Lagged(_)) => Some(ChangeEvent {
                            table: Table::Sessions,
                            kind: ChangeKind::Update,
                            key: session_id.clone(),
                            session_id,
                        }),
                    }
                }
            })
            .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(Ok(()))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(Ok(()))
    }
}
