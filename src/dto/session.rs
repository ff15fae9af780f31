use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::{EvaluationEntity, EvaluationKind, MoveEntity, ParticipantEntity, VoteStatus},
    dto::{
        format_system_time,
        validation::{validate_display_name, validate_single_character},
    },
    services::{
        statistics::{ParticipantStatistics, SessionStatistics},
        voting_service::votes_to_pass,
    },
    state::{
        phase::GamePhase,
        snapshot::{ReactionTally, SessionSnapshot},
    },
};

/// Longest accepted custom starter topic, in characters.
const MAX_TOPIC_CHARS: usize = 64;

/// Payload used to open a new session as its host.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Display name of the host.
    pub host_name: String,
}

impl Validate for CreateSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_display_name(&self.host_name) {
            errors.add("host_name", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Payload used to join an existing session by its room code.
#[derive(Debug, Deserialize, ToSchema)]
pub struct JoinSessionRequest {
    /// Display name of the joining participant.
    pub name: String,
}

impl Validate for JoinSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_display_name(&self.name) {
            errors.add("name", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Payload used by the host to start play.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StartSessionRequest {
    /// Starter sentence; a random configured topic is used when omitted or blank.
    #[serde(default)]
    pub topic: Option<String>,
}

impl Validate for StartSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(ref topic) = self.topic {
            let count = topic.trim().chars().count();
            if count > MAX_TOPIC_CHARS {
                let mut err = ValidationError::new("topic_length");
                err.message = Some(
                    format!("Topic must be at most {MAX_TOPIC_CHARS} characters (got {count})")
                        .into(),
                );
                errors.add("topic", err);
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Insertion of one character into the shared sentence.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitMoveRequest {
    /// Character index to insert at, between 0 and the sentence length.
    pub position: usize,
    /// Exactly one non-whitespace character.
    pub character: String,
}

impl Validate for SubmitMoveRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_single_character(&self.character) {
            errors.add("character", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Reaction to the current move.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitEvaluationRequest {
    /// Chosen reaction.
    pub kind: EvaluationKind,
}

/// Participant as shown to the local UI.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct ParticipantView {
    /// Participant identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Position in the turn order.
    pub join_order: usize,
    /// Whether this participant created the session.
    pub is_host: bool,
    /// Score after rollback penalties.
    pub score: i32,
    /// Reactions received so far in the current game.
    pub received: ReactionTally,
}

impl ParticipantView {
    fn new(participant: &ParticipantEntity, received: ReactionTally) -> Self {
        Self {
            id: participant.id,
            name: participant.name.clone(),
            join_order: participant.join_order,
            is_host: participant.is_host,
            score: participant.score,
            received,
        }
    }
}

/// Move as shown to the local UI.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct MoveView {
    /// Move identifier.
    pub id: Uuid,
    /// Author of the move.
    pub participant_id: Uuid,
    /// Author display name.
    pub participant_name: String,
    /// Inserted character.
    pub character: String,
    /// Character index of the insertion.
    pub position: usize,
    /// Sentence before the insertion.
    pub sentence_before: String,
    /// Sentence after the insertion.
    pub sentence_after: String,
    /// Round in which the move was made.
    pub round_number: u32,
    /// Outcome of the cancel vote.
    pub vote_status: VoteStatus,
    /// Outcome message, once settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_outcome_message: Option<String>,
    /// RFC 3339 submission time.
    pub created_at: String,
}

impl From<&MoveEntity> for MoveView {
    fn from(mv: &MoveEntity) -> Self {
        Self {
            id: mv.id,
            participant_id: mv.participant_id,
            participant_name: mv.participant_name.clone(),
            character: mv.character.to_string(),
            position: mv.position,
            sentence_before: mv.sentence_before.clone(),
            sentence_after: mv.sentence_after.clone(),
            round_number: mv.round_number,
            vote_status: mv.vote_status,
            vote_outcome_message: mv.vote_outcome_message.clone(),
            created_at: format_system_time(mv.created_at),
        }
    }
}

/// Reaction as listed in the post-game summary.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct EvaluationView {
    /// Reaction identifier.
    pub id: Uuid,
    /// Move reacted to.
    pub move_id: Uuid,
    /// Participant reacting.
    pub evaluator_id: Uuid,
    /// Evaluator display name.
    pub evaluator_name: String,
    /// Chosen reaction.
    pub kind: EvaluationKind,
    /// RFC 3339 submission time.
    pub created_at: String,
}

impl From<&EvaluationEntity> for EvaluationView {
    fn from(evaluation: &EvaluationEntity) -> Self {
        Self {
            id: evaluation.id,
            move_id: evaluation.move_id,
            evaluator_id: evaluation.evaluator_id,
            evaluator_name: evaluation.evaluator_name.clone(),
            kind: evaluation.kind,
            created_at: format_system_time(evaluation.created_at),
        }
    }
}

/// Snapshot of the attached session from the point of view of this client's participant.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionView {
    /// Room code.
    pub session_id: String,
    /// Participant this client acts as.
    pub participant_id: Uuid,
    /// Whether this client hosts the session.
    pub is_host: bool,
    /// Current game phase.
    pub phase: GamePhase,
    /// Sentence built so far.
    pub sentence: String,
    /// Sentence length in characters.
    pub sentence_length: usize,
    /// Whether play started.
    pub game_started: bool,
    /// Whether the sentence reached the end length.
    pub game_ended: bool,
    /// Current round, starting at 1.
    pub round_number: u32,
    /// Turn index into `participants`.
    pub current_player_index: usize,
    /// Participant whose turn it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_player_id: Option<Uuid>,
    /// Whether this client may move now.
    pub is_my_turn: bool,
    /// Participants in turn order.
    pub participants: Vec<ParticipantView>,
    /// Latest move of the current game.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_move: Option<MoveView>,
    /// Cancel votes cast on the current move.
    pub cancel_votes: usize,
    /// Cancel votes needed to withdraw the current move.
    pub votes_to_pass: usize,
    /// Whether this client voted on the current move.
    pub has_voted: bool,
    /// Whether this client reacted to the current move.
    pub has_evaluated: bool,
    /// RFC 3339 time at which the open evaluation window closes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_deadline: Option<String>,
    /// Moves of the current game, oldest first.
    pub moves: Vec<MoveView>,
    /// RFC 3339 time of the last successful read.
    pub refreshed_at: String,
    /// Error of the last failed refresh, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionView {
    /// Project `snapshot` for participant `me`.
    pub fn new(snapshot: &SessionSnapshot, me: Uuid, phase_duration: std::time::Duration) -> Self {
        let session = &snapshot.session;
        let current_move = snapshot.current_move();
        let current_player_id = snapshot.current_participant().map(|p| p.id);
        let phase = snapshot.phase();

        Self {
            session_id: session.id.clone(),
            participant_id: me,
            is_host: session.host_id == me,
            phase,
            sentence: session.current_sentence.clone(),
            sentence_length: session.current_sentence.chars().count(),
            game_started: session.game_started,
            game_ended: session.game_ended,
            round_number: session.round_number,
            current_player_index: session.current_player_index,
            current_player_id,
            is_my_turn: phase == GamePhase::AwaitingMove && current_player_id == Some(me),
            participants: snapshot
                .participants
                .iter()
                .map(|p| ParticipantView::new(p, snapshot.received_by(p.id)))
                .collect(),
            current_move: current_move.map(MoveView::from),
            cancel_votes: snapshot.current_votes.len(),
            votes_to_pass: votes_to_pass(snapshot.participants.len()),
            has_voted: snapshot.has_voted(me),
            has_evaluated: current_move.is_some_and(|mv| snapshot.has_evaluated(mv.id, me)),
            evaluation_deadline: snapshot
                .move_under_evaluation()
                .map(|mv| format_system_time(mv.created_at + phase_duration)),
            moves: snapshot.moves.iter().map(MoveView::from).collect(),
            refreshed_at: format_system_time(snapshot.refreshed_at),
            last_error: snapshot.last_error.clone(),
        }
    }
}

/// Post-game figures of one participant.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct ParticipantStatisticsView {
    /// Participant identifier.
    pub participant_id: Uuid,
    /// Display name.
    pub name: String,
    /// Moves made in the game.
    pub moves_authored: usize,
    /// Reactions received.
    pub received: ReactionTally,
    /// Weighted reaction score.
    pub positive_score: i32,
    /// Score after rollback penalties.
    pub score: i32,
}

impl From<&ParticipantStatistics> for ParticipantStatisticsView {
    fn from(stats: &ParticipantStatistics) -> Self {
        Self {
            participant_id: stats.participant_id,
            name: stats.name.clone(),
            moves_authored: stats.moves_authored,
            received: stats.received,
            positive_score: stats.positive_score,
            score: stats.score,
        }
    }
}

/// Post-game summary of the attached session.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct StatisticsView {
    /// Sentence at the end of the game.
    pub final_sentence: String,
    /// Moves made in the game.
    pub total_moves: usize,
    /// Most valuable participant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mvp: Option<ParticipantStatisticsView>,
    /// Per-participant figures, in turn order.
    pub participants: Vec<ParticipantStatisticsView>,
    /// Every move, oldest first.
    pub moves: Vec<MoveView>,
    /// Every reaction, oldest first.
    pub evaluations: Vec<EvaluationView>,
}

impl From<SessionStatistics> for StatisticsView {
    fn from(stats: SessionStatistics) -> Self {
        Self {
            final_sentence: stats.final_sentence.clone(),
            total_moves: stats.total_moves,
            mvp: stats.mvp_statistics().map(ParticipantStatisticsView::from),
            participants: stats
                .participants
                .iter()
                .map(ParticipantStatisticsView::from)
                .collect(),
            moves: stats.moves.iter().map(MoveView::from).collect(),
            evaluations: stats.evaluations.iter().map(EvaluationView::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_reject_invalid_names_and_characters() {
        assert!(CreateSessionRequest { host_name: " ".into() }.validate().is_err());
        assert!(JoinSessionRequest { name: "Bob".into() }.validate().is_ok());
        assert!(
            SubmitMoveRequest {
                position: 0,
                character: "ab".into(),
            }
            .validate()
            .is_err()
        );
        assert!(
            StartSessionRequest {
                topic: Some("字".repeat(65)),
            }
            .validate()
            .is_err()
        );
        assert!(StartSessionRequest::default().validate().is_ok());
    }
}
