//! Reactions, cancel votes and the resolution of each move's evaluation window.
//!
//! Every client resolves every move. Convergence rests on three store guarantees: unique
//! `(move, participant)` pairs for evaluations and votes, the status guard on
//! [`GameStore::update_move`], and the session guard on [`GameStore::update_session`] that
//! lets exactly one turn advance through per move.

use std::{collections::HashSet, time::SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        game_store::GameStore,
        models::{
            EvaluationEntity, EvaluationKind, MoveEntity, MovePatch, ParticipantEntity,
            ParticipantPatch, SessionGuard, SessionPatch, VoteEntity, VoteKind, VoteStatus,
        },
    },
    dto::session::SessionView,
    error::ServiceError,
    services::{session_reader, sse_events},
    state::{
        SharedState,
        phase::{GameEvent, GamePhase, compute_transition},
        snapshot::order_participants,
    },
};

/// Cancel votes counted against the threshold of one move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    /// Distinct non-author participants that voted to cancel.
    pub cancel_votes: usize,
    /// Votes needed for the cancel vote to pass.
    pub votes_to_pass: usize,
}

impl VoteTally {
    /// Passed once the threshold is reached, failed otherwise.
    pub fn outcome(&self) -> VoteStatus {
        if self.cancel_votes >= self.votes_to_pass {
            VoteStatus::Passed
        } else {
            VoteStatus::Failed
        }
    }
}

/// What one call to [`resolve_phase`] observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Move whose window was closed.
    pub move_id: Uuid,
    /// Status of the move once this call finished.
    pub vote_status: VoteStatus,
    /// Whether this client's guarded status write won.
    pub settled_here: bool,
    /// Whether this client wrote the turn advance.
    pub advanced: bool,
}

struct Settlement {
    status: VoteStatus,
    message: Option<String>,
}

/// Cancel votes needed to withdraw a move: half of the eligible voters, rounded up. A lone
/// participant has no eligible voters, so zero votes suffice.
pub fn votes_to_pass(participant_count: usize) -> usize {
    participant_count.saturating_sub(1).div_ceil(2)
}

/// Count distinct cancel votes on a move, ignoring any cast by its author.
pub fn tally_votes(votes: &[VoteEntity], author: Uuid, participant_count: usize) -> VoteTally {
    let voters: HashSet<Uuid> = votes
        .iter()
        .filter(|vote| vote.kind == VoteKind::CancelRound && vote.voter_id != author)
        .map(|vote| vote.voter_id)
        .collect();

    VoteTally {
        cancel_votes: voters.len(),
        votes_to_pass: votes_to_pass(participant_count),
    }
}

/// Turn index following the author of a move.
pub fn turn_after(author_index: usize, participant_count: usize) -> usize {
    if participant_count == 0 {
        0
    } else {
        (author_index + 1) % participant_count
    }
}

/// Human readable outcome recorded on a resolved move.
pub fn outcome_message(status: VoteStatus, author_name: &str, penalty: i32) -> String {
    match status {
        VoteStatus::Passed => format!(
            "Vote passed: {author_name}'s character was withdrawn and {penalty} points deducted."
        ),
        VoteStatus::Failed => format!("Vote failed: {author_name}'s character stays."),
        VoteStatus::Pending => format!("Vote on {author_name}'s character is still open."),
    }
}

/// React to the current move. A reaction already stored for this participant counts as
/// success.
pub async fn submit_evaluation(
    state: &SharedState,
    kind: EvaluationKind,
) -> Result<SessionView, ServiceError> {
    let identity = state.require_identity().await?;
    let store = state.require_game_store().await?;
    let snapshot = session_reader::fresh_or_cached(state).await?;
    let me = identity.participant_id;

    let Some(mv) = snapshot.current_move().cloned() else {
        return Err(ServiceError::InvalidState("there is no move to evaluate".into()));
    };
    if mv.participant_id == me {
        return Err(ServiceError::InvalidState(
            "you cannot evaluate your own move".into(),
        ));
    }
    if snapshot.has_evaluated(mv.id, me) {
        return Err(ServiceError::InvalidState(
            "you already evaluated this move".into(),
        ));
    }
    let Some(evaluator) = snapshot.participant(me) else {
        return Err(ServiceError::NotFound(format!("participant `{me}` not found")));
    };

    let evaluation = EvaluationEntity {
        id: Uuid::new_v4(),
        session_id: identity.session_id.clone(),
        move_id: mv.id,
        evaluator_id: me,
        evaluator_name: evaluator.name.clone(),
        kind,
        created_at: SystemTime::now(),
    };

    state
        .run_transition(|| async {
            match store.insert_evaluation(evaluation).await {
                Ok(_) => info!(move_id = %mv.id, ?kind, "evaluation recorded"),
                Err(err) if err.is_conflict() => {
                    debug!(move_id = %mv.id, "evaluation already recorded")
                }
                Err(err) => return Err(ServiceError::from(err)),
            }
            Ok(())
        })
        .await?;

    session_reader::refresh_view(state).await
}

/// Vote to withdraw the current move. Once every eligible participant voted, the move is
/// resolved right away instead of waiting for the timer.
pub async fn submit_cancel_vote(state: &SharedState) -> Result<SessionView, ServiceError> {
    let identity = state.require_identity().await?;
    let store = state.require_game_store().await?;
    let snapshot = session_reader::fresh_or_cached(state).await?;
    let me = identity.participant_id;

    let Some(mv) = snapshot.current_move().cloned() else {
        return Err(ServiceError::InvalidState("there is no move to vote on".into()));
    };
    compute_transition(snapshot.phase(), GameEvent::CancelVote)?;
    if mv.vote_status != VoteStatus::Pending {
        return Err(ServiceError::InvalidState(
            "the vote on this move is already settled".into(),
        ));
    }
    if mv.participant_id == me {
        return Err(ServiceError::InvalidState(
            "you cannot vote against your own move".into(),
        ));
    }
    if snapshot.has_voted(me) {
        return Err(ServiceError::InvalidState(
            "you already voted on this move".into(),
        ));
    }

    let vote = VoteEntity {
        id: Uuid::new_v4(),
        session_id: identity.session_id.clone(),
        move_id: mv.id,
        voter_id: me,
        kind: VoteKind::CancelRound,
        created_at: SystemTime::now(),
    };
    let eligible = snapshot.participants.len().saturating_sub(1);

    let everyone_voted = state
        .run_transition(|| async {
            match store.insert_vote(vote).await {
                Ok(_) => info!(move_id = %mv.id, "cancel vote recorded"),
                Err(err) if err.is_conflict() => {
                    debug!(move_id = %mv.id, "cancel vote already recorded")
                }
                Err(err) => return Err(ServiceError::from(err)),
            }
            let votes = store.list_votes(&identity.session_id, mv.id).await?;
            let tally = tally_votes(&votes, mv.participant_id, snapshot.participants.len());
            Ok(tally.cancel_votes >= eligible)
        })
        .await?;

    if everyone_voted {
        info!(move_id = %mv.id, "every eligible participant voted; resolving early");
        if let Err(err) = resolve_phase(state, mv.id).await {
            warn!(move_id = %mv.id, error = %err, "early resolution failed");
        }
    }

    session_reader::refresh_view(state).await
}

/// Close the evaluation window of `move_id`.
///
/// A pending move is settled through a guarded status write, so only one client applies the
/// rollback penalty. The turn advance is then attempted whatever happened before.
pub async fn resolve_phase(
    state: &SharedState,
    move_id: Uuid,
) -> Result<Resolution, ServiceError> {
    let identity = state.require_identity().await?;
    let store = state.require_game_store().await?;
    let cached = state.snapshot().await;
    let penalty = state.config().rollback_penalty;
    let session_id = identity.session_id.as_str();

    state
        .run_transition(|| async {
            let mut mv = match store.find_move(session_id, move_id).await {
                Ok(Some(mv)) => mv,
                Ok(None) => {
                    return Err(ServiceError::NotFound(format!("move `{move_id}` not found")));
                }
                Err(err) => {
                    let Some(mv) = cached.as_ref().and_then(|s| s.find_move(move_id)).cloned()
                    else {
                        return Err(ServiceError::from(err));
                    };
                    warn!(%move_id, error = %err, "failed to read move; using cached copy");
                    mv
                }
            };

            let participants = match store.list_participants(session_id).await {
                Ok(mut participants) => {
                    order_participants(&mut participants);
                    participants
                }
                Err(err) => match cached.as_ref() {
                    Some(snapshot) if !snapshot.participants.is_empty() => {
                        warn!(%move_id, error = %err, "failed to read participants; using cached list");
                        snapshot.participants.clone()
                    }
                    _ => return Err(ServiceError::from(err)),
                },
            };

            let mut settled_here = false;
            if mv.vote_status == VoteStatus::Pending {
                match settle(store.as_ref(), &mv, participants.len(), penalty).await {
                    Ok(settlement) => {
                        mv.vote_status = settlement.status;
                        if let Some(message) = settlement.message {
                            settled_here = true;
                            sse_events::broadcast_move_resolved(
                                state,
                                move_id,
                                settlement.status,
                                &message,
                            );
                        }
                    }
                    Err(err) => {
                        warn!(%move_id, error = %err, "failed to settle vote; advancing turn anyway")
                    }
                }
            }

            let advanced = match advance_turn(store.as_ref(), &mv, &participants).await {
                Ok(advanced) => advanced,
                Err(err) => {
                    warn!(%move_id, error = %err, "failed to advance turn");
                    false
                }
            };

            Ok(Resolution {
                move_id,
                vote_status: mv.vote_status,
                settled_here,
                advanced,
            })
        })
        .await
}

/// Decide the outcome of a pending move and write it if no other client did first.
async fn settle(
    store: &dyn GameStore,
    mv: &MoveEntity,
    participant_count: usize,
    penalty: i32,
) -> Result<Settlement, ServiceError> {
    let votes = store.list_votes(&mv.session_id, mv.id).await?;
    let tally = tally_votes(&votes, mv.participant_id, participant_count);
    let status = tally.outcome();
    let message = outcome_message(status, &mv.participant_name, penalty);

    match store
        .update_move(
            &mv.session_id,
            mv.id,
            MovePatch::resolve(status, message.clone()),
        )
        .await
    {
        Ok(_) => {
            info!(
                session_id = %mv.session_id,
                move_id = %mv.id,
                %status,
                cancel_votes = tally.cancel_votes,
                votes_to_pass = tally.votes_to_pass,
                "settled cancel vote"
            );
            if status == VoteStatus::Passed {
                if let Err(err) = apply_penalty(store, mv, penalty).await {
                    warn!(move_id = %mv.id, error = %err, "failed to apply rollback penalty");
                }
            }
            Ok(Settlement {
                status,
                message: Some(message),
            })
        }
        Err(err) if err.is_conflict() => {
            let stored = store
                .find_move(&mv.session_id, mv.id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("move `{}` not found", mv.id)))?;
            debug!(move_id = %mv.id, status = %stored.vote_status, "vote already settled elsewhere");
            Ok(Settlement {
                status: stored.vote_status,
                message: None,
            })
        }
        Err(err) => Err(err.into()),
    }
}

async fn apply_penalty(
    store: &dyn GameStore,
    mv: &MoveEntity,
    penalty: i32,
) -> Result<(), ServiceError> {
    let Some(author) = store
        .find_participant(&mv.session_id, mv.participant_id)
        .await?
    else {
        return Err(ServiceError::NotFound(format!(
            "participant `{}` not found",
            mv.participant_id
        )));
    };
    let score = author.score - penalty;
    store
        .update_participant(
            &mv.session_id,
            author.id,
            ParticipantPatch { score: Some(score) },
        )
        .await?;
    info!(participant_id = %author.id, score, "applied rollback penalty");
    Ok(())
}

/// Hand the turn to the participant after the move's author, rolling the sentence back when
/// the move was withdrawn. The write is guarded on the session still evaluating this move, so
/// a late resolver can never touch the round that follows.
async fn advance_turn(
    store: &dyn GameStore,
    mv: &MoveEntity,
    participants: &[ParticipantEntity],
) -> Result<bool, ServiceError> {
    let Some(session) = store.find_session(&mv.session_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "session `{}` not found",
            mv.session_id
        )));
    };
    let still_evaluating = compute_transition(GamePhase::of(&session), GameEvent::Resolve).is_ok()
        && session.epoch == mv.epoch
        && session.round_number == mv.round_number;
    if !still_evaluating {
        debug!(move_id = %mv.id, "turn already advanced");
        return Ok(false);
    }

    let author_index = participants
        .iter()
        .position(|participant| participant.id == mv.participant_id)
        .unwrap_or(session.current_player_index);
    let next_index = turn_after(author_index, participants.len());
    let patch = SessionPatch {
        expect: Some(SessionGuard {
            epoch: mv.epoch,
            round_number: mv.round_number,
            show_evaluation_phase: true,
        }),
        current_sentence: (mv.vote_status == VoteStatus::Passed)
            .then(|| mv.sentence_before.clone()),
        current_player_index: Some(next_index),
        round_number: Some(mv.round_number + 1),
        show_evaluation_phase: Some(false),
        ..SessionPatch::default()
    };
    match store.update_session(&mv.session_id, patch).await {
        Ok(_) => {}
        Err(err) if err.is_conflict() => {
            debug!(move_id = %mv.id, "turn advanced elsewhere first");
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    }
    info!(
        session_id = %mv.session_id,
        move_id = %mv.id,
        next_index,
        round = mv.round_number + 1,
        "advanced turn"
    );
    Ok(true)
}
