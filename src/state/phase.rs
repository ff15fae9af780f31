use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::dao::models::SessionEntity;

/// Phases a session goes through, derived from the shared session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Participants are gathering; play has not started.
    Lobby,
    /// The current-turn participant may insert a character.
    AwaitingMove,
    /// The last move is open for reactions and cancel votes.
    Evaluating,
    /// The sentence reached the end length.
    Ended,
}

impl GamePhase {
    /// Read the phase off a session record. The evaluation flag is authoritative even when a
    /// move of the current round is already visible.
    pub fn of(session: &SessionEntity) -> Self {
        if session.game_ended {
            GamePhase::Ended
        } else if !session.game_started {
            GamePhase::Lobby
        } else if session.show_evaluation_phase {
            GamePhase::Evaluating
        } else {
            GamePhase::AwaitingMove
        }
    }
}

/// Operations that move a session between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Host starts, or restarts after the end, a game.
    Start,
    /// Current-turn participant inserts a character.
    SubmitMove {
        /// Whether the insertion reaches the end length.
        reaches_end: bool,
    },
    /// A participant casts a cancel vote on the current move.
    CancelVote,
    /// The evaluation window of the current move closes.
    Resolve,
    /// Any participant clears the session back to the lobby.
    Reset,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the session was in.
    pub from: GamePhase,
    /// Rejected event.
    pub event: GameEvent,
}

/// Compute the phase reached by applying `event` from `from`.
pub fn compute_transition(from: GamePhase, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
    let next = match (from, event) {
        (GamePhase::Lobby | GamePhase::Ended, GameEvent::Start) => GamePhase::AwaitingMove,
        (GamePhase::AwaitingMove, GameEvent::SubmitMove { reaches_end: false }) => {
            GamePhase::Evaluating
        }
        (GamePhase::AwaitingMove, GameEvent::SubmitMove { reaches_end: true }) => GamePhase::Ended,
        (GamePhase::Evaluating, GameEvent::CancelVote) => GamePhase::Evaluating,
        (GamePhase::Evaluating, GameEvent::Resolve) => GamePhase::AwaitingMove,
        (_, GameEvent::Reset) => GamePhase::Lobby,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn phase_follows_session_flags() {
        let mut session = SessionEntity::new("ROOM01".into(), Uuid::new_v4());
        assert_eq!(GamePhase::of(&session), GamePhase::Lobby);

        session.game_started = true;
        assert_eq!(GamePhase::of(&session), GamePhase::AwaitingMove);

        session.show_evaluation_phase = true;
        assert_eq!(GamePhase::of(&session), GamePhase::Evaluating);

        session.game_ended = true;
        assert_eq!(GamePhase::of(&session), GamePhase::Ended);
    }

    #[test]
    fn full_round_trip_through_a_game() {
        let mut phase = GamePhase::Lobby;
        for (event, expected) in [
            (GameEvent::Start, GamePhase::AwaitingMove),
            (
                GameEvent::SubmitMove { reaches_end: false },
                GamePhase::Evaluating,
            ),
            (GameEvent::CancelVote, GamePhase::Evaluating),
            (GameEvent::Resolve, GamePhase::AwaitingMove),
            (GameEvent::SubmitMove { reaches_end: true }, GamePhase::Ended),
            (GameEvent::Start, GamePhase::AwaitingMove),
            (GameEvent::Reset, GamePhase::Lobby),
        ] {
            phase = compute_transition(phase, event).unwrap();
            assert_eq!(phase, expected);
        }
    }

    #[test]
    fn moves_are_rejected_outside_their_turn_phase() {
        for from in [GamePhase::Lobby, GamePhase::Evaluating, GamePhase::Ended] {
            let err =
                compute_transition(from, GameEvent::SubmitMove { reaches_end: false }).unwrap_err();
            assert_eq!(err.from, from);
        }
        assert!(compute_transition(GamePhase::AwaitingMove, GameEvent::Start).is_err());
        assert!(compute_transition(GamePhase::AwaitingMove, GameEvent::CancelVote).is_err());
    }
}
