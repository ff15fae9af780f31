/// CouchDB backend shared by every client of a session.
#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;

use futures::{future::BoxFuture, stream::BoxStream};
use uuid::Uuid;

use crate::dao::models::{
    ChangeEvent, EvaluationEntity, MoveEntity, MovePatch, ParticipantEntity, ParticipantPatch,
    SessionEntity, SessionPatch, VoteEntity,
};
use crate::dao::storage::StorageResult;

/// Abstraction over the shared store every client of a session reads from and writes to.
///
/// The store offers no transactions. Two guarantees are required from implementations:
/// evaluation and vote inserts fail with a conflict on a duplicate `(move, participant)`
/// pair, and the conditional updates honour [`MovePatch::expect_status`] and
/// [`SessionPatch::expect`] atomically, answering a conflict when they do not hold.
pub trait GameStore: Send + Sync {
    /// Create a session; a taken room code is a conflict.
    fn insert_session(&self, session: SessionEntity)
    -> BoxFuture<'static, StorageResult<SessionEntity>>;
    /// Session with the given room code.
    fn find_session(&self, id: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Patch a session, honouring its guard.
    fn update_session(
        &self,
        id: &str,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>>;

    /// Add a participant to a session.
    fn insert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>>;
    /// Participant of a session.
    fn find_participant(
        &self,
        session_id: &str,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    /// Participants of a session, in no particular order.
    fn list_participants(
        &self,
        session_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>>;
    /// Patch a participant.
    fn update_participant(
        &self,
        session_id: &str,
        id: Uuid,
        patch: ParticipantPatch,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>>;

    /// Append a move.
    fn insert_move(&self, mv: MoveEntity) -> BoxFuture<'static, StorageResult<MoveEntity>>;
    /// Move of a session.
    fn find_move(
        &self,
        session_id: &str,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<MoveEntity>>>;
    /// Moves of a session, oldest first.
    fn list_moves(&self, session_id: &str) -> BoxFuture<'static, StorageResult<Vec<MoveEntity>>>;
    /// Patch a move, honouring its status guard.
    fn update_move(
        &self,
        session_id: &str,
        id: Uuid,
        patch: MovePatch,
    ) -> BoxFuture<'static, StorageResult<MoveEntity>>;

    /// Record a reaction; a second one for the same pair is a conflict.
    fn insert_evaluation(
        &self,
        evaluation: EvaluationEntity,
    ) -> BoxFuture<'static, StorageResult<EvaluationEntity>>;
    /// Reactions of a session, oldest first.
    fn list_evaluations(
        &self,
        session_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<EvaluationEntity>>>;

    /// Record a vote; a second one for the same pair is a conflict.
    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<VoteEntity>>;
    /// Votes cast on one move.
    fn list_votes(
        &self,
        session_id: &str,
        move_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>>;

    /// Stream change notifications for every table, scoped to one session.
    ///
    /// Delivery is best effort and at least once; no ordering holds across tables.
    fn subscribe(&self, session_id: &str) -> BoxStream<'static, ChangeEvent>;

    /// Cheap round trip proving the store answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Order moves chronologically, breaking timestamp ties by identifier so every client agrees
/// on which move is the last one.
pub fn sort_moves(moves: &mut [MoveEntity]) {
    moves.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
