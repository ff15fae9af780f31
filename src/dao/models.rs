use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::storage::{StorageError, StorageResult};

/// Shared game instance. Every field except the identity is a projection that any client may
/// overwrite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Room code shared with the other participants.
    pub id: String,
    /// Participant that created the session.
    pub host_id: Uuid,
    /// Sentence built so far.
    pub current_sentence: String,
    /// Whether the host started play.
    pub game_started: bool,
    /// Whether the sentence reached the end length.
    pub game_ended: bool,
    /// Index, in participant order, of the participant whose turn it is.
    pub current_player_index: usize,
    /// Round counter, starting at 1.
    pub round_number: u32,
    /// Whether the last move is being evaluated.
    pub show_evaluation_phase: bool,
    /// Number of games started in this session; moves of earlier epochs are ignored.
    pub epoch: u32,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
    /// Last time any field was written.
    pub updated_at: SystemTime,
}

impl SessionEntity {
    /// Build a fresh, not yet started session.
    pub fn new(id: String, host_id: Uuid) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            host_id,
            current_sentence: String::new(),
            game_started: false,
            game_ended: false,
            current_player_index: 0,
            round_number: 1,
            show_evaluation_phase: false,
            epoch: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Session fields a guarded [`SessionPatch`] expects to find before it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionGuard {
    /// Epoch the writer observed.
    pub epoch: u32,
    /// Round the writer observed.
    pub round_number: u32,
    /// Evaluation flag the writer observed.
    pub show_evaluation_phase: bool,
}

impl SessionGuard {
    fn holds(&self, session: &SessionEntity) -> bool {
        session.epoch == self.epoch
            && session.round_number == self.round_number
            && session.show_evaluation_phase == self.show_evaluation_phase
    }
}

/// Partial update of a [`SessionEntity`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// Only apply the update when the stored session still matches.
    pub expect: Option<SessionGuard>,
    /// New sentence.
    pub current_sentence: Option<String>,
    /// New started flag.
    pub game_started: Option<bool>,
    /// New ended flag.
    pub game_ended: Option<bool>,
    /// New turn index.
    pub current_player_index: Option<usize>,
    /// New round counter.
    pub round_number: Option<u32>,
    /// New evaluation flag.
    pub show_evaluation_phase: Option<bool>,
    /// New epoch.
    pub epoch: Option<u32>,
}

impl SessionPatch {
    /// Check the guard, write the provided fields onto `session` and bump its update
    /// timestamp.
    pub fn apply(self, session: &mut SessionEntity) -> StorageResult<()> {
        if let Some(guard) = self.expect {
            if !guard.holds(session) {
                return Err(StorageError::conflict(session.id.clone()));
            }
        }
        if let Some(sentence) = self.current_sentence {
            session.current_sentence = sentence;
        }
        if let Some(started) = self.game_started {
            session.game_started = started;
        }
        if let Some(ended) = self.game_ended {
            session.game_ended = ended;
        }
        if let Some(index) = self.current_player_index {
            session.current_player_index = index;
        }
        if let Some(round) = self.round_number {
            session.round_number = round;
        }
        if let Some(evaluating) = self.show_evaluation_phase {
            session.show_evaluation_phase = evaluating;
        }
        if let Some(epoch) = self.epoch {
            session.epoch = epoch;
        }
        session.updated_at = SystemTime::now();
        Ok(())
    }
}

/// Member of a session. Identity is immutable; only the score changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Stable identifier for the participant.
    pub id: Uuid,
    /// Session the participant joined.
    pub session_id: String,
    /// Display name chosen when joining.
    pub name: String,
    /// Position in the turn order.
    pub join_order: usize,
    /// Whether this participant created the session.
    pub is_host: bool,
    /// Cumulative score, only lowered by rollback penalties.
    pub score: i32,
    /// Join timestamp, used to break `join_order` ties.
    pub joined_at: SystemTime,
}

/// Partial update of a [`ParticipantEntity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantPatch {
    /// New score.
    pub score: Option<i32>,
}

impl ParticipantPatch {
    /// Write the provided fields onto `participant`.
    pub fn apply(self, participant: &mut ParticipantEntity) {
        if let Some(score) = self.score {
            participant.score = score;
        }
    }
}

/// Outcome of the cancel vote held on a move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    /// The evaluation window is still open or nobody resolved it yet.
    #[default]
    Pending,
    /// The cancel vote passed and the move was rolled back.
    Passed,
    /// The cancel vote failed and the move stands.
    Failed,
}

impl fmt::Display for VoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VoteStatus::Pending => "pending",
            VoteStatus::Passed => "passed",
            VoteStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A single-character insertion, appended once and never rewritten except for its vote
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveEntity {
    /// Stable identifier for the move.
    pub id: Uuid,
    /// Session the move belongs to.
    pub session_id: String,
    /// Author of the move.
    pub participant_id: Uuid,
    /// Author display name at submission time.
    pub participant_name: String,
    /// The inserted character.
    pub character: char,
    /// Character index the insertion happened at.
    pub position: usize,
    /// Sentence before the insertion.
    pub sentence_before: String,
    /// Sentence after the insertion.
    pub sentence_after: String,
    /// Round in which the move was submitted.
    pub round_number: u32,
    /// Session epoch the move belongs to.
    pub epoch: u32,
    /// Vote outcome, transitions away from pending exactly once.
    pub vote_status: VoteStatus,
    /// Human readable description of the vote outcome.
    pub vote_outcome_message: Option<String>,
    /// Submission timestamp; the evaluation window is measured from it.
    pub created_at: SystemTime,
}

/// Partial update of a [`MoveEntity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovePatch {
    /// Only apply the update when the stored status equals this value.
    pub expect_status: Option<VoteStatus>,
    /// New vote status.
    pub vote_status: Option<VoteStatus>,
    /// New outcome message.
    pub vote_outcome_message: Option<String>,
}

impl MovePatch {
    /// Resolve a pending move with the given outcome, guarded on it still being pending.
    pub fn resolve(status: VoteStatus, message: String) -> Self {
        Self {
            expect_status: Some(VoteStatus::Pending),
            vote_status: Some(status),
            vote_outcome_message: Some(message),
        }
    }

    /// Check the precondition and write the provided fields onto `mv`.
    pub fn apply(self, mv: &mut MoveEntity) -> StorageResult<()> {
        if let Some(expected) = self.expect_status {
            if mv.vote_status != expected {
                return Err(StorageError::conflict(mv.id.to_string()));
            }
        }
        if let Some(status) = self.vote_status {
            mv.vote_status = status;
        }
        if let Some(message) = self.vote_outcome_message {
            mv.vote_outcome_message = Some(message);
        }
        Ok(())
    }
}

/// Non-binding reaction to a move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    /// Thrown egg.
    Egg,
    /// Flower.
    Flower,
    /// Poop.
    Poop,
    /// Kiss.
    Kiss,
}

impl EvaluationKind {
    /// Weight of the reaction in the post-game positive score.
    pub fn weight(self) -> i32 {
        match self {
            EvaluationKind::Flower => 2,
            EvaluationKind::Kiss => 1,
            EvaluationKind::Egg => 0,
            EvaluationKind::Poop => -1,
        }
    }
}

/// Reaction left by one participant on another participant's move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationEntity {
    /// Stable identifier for the reaction.
    pub id: Uuid,
    /// Session the reaction belongs to.
    pub session_id: String,
    /// Move being reacted to.
    pub move_id: Uuid,
    /// Participant reacting.
    pub evaluator_id: Uuid,
    /// Evaluator display name at submission time.
    pub evaluator_name: String,
    /// Chosen reaction.
    pub kind: EvaluationKind,
    /// Submission timestamp.
    pub created_at: SystemTime,
}

/// Kind of binding vote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// Ask for the move to be withdrawn.
    #[default]
    CancelRound,
}

/// Binding vote cast on a move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEntity {
    /// Stable identifier for the vote.
    pub id: Uuid,
    /// Session the vote belongs to.
    pub session_id: String,
    /// Move being voted on.
    pub move_id: Uuid,
    /// Participant voting.
    pub voter_id: Uuid,
    /// Kind of vote.
    pub kind: VoteKind,
    /// Submission timestamp.
    pub created_at: SystemTime,
}

/// Record families exposed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// [`SessionEntity`] rows.
    Sessions,
    /// [`ParticipantEntity`] rows.
    Participants,
    /// [`MoveEntity`] rows.
    Moves,
    /// [`EvaluationEntity`] rows.
    Evaluations,
    /// [`VoteEntity`] rows.
    Votes,
}

impl Table {
    /// Stable table name used in logs and document keys.
    pub fn name(self) -> &'static str {
        match self {
            Table::Sessions => "sessions",
            Table::Participants => "participants",
            Table::Moves => "moves",
            Table::Evaluations => "evaluations",
            Table::Votes => "votes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a change notification reports a new record or an updated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A record was created.
    Insert,
    /// A record was rewritten.
    Update,
}

/// Change notification delivered by [`crate::dao::game_store::GameStore::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Table of the changed record.
    pub table: Table,
    /// Insert or update.
    pub kind: ChangeKind,
    /// Session the record belongs to.
    pub session_id: String,
    /// Key of the changed record.
    pub key: String,
}
