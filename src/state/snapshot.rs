//! Locally reconciled view of one session.
//!
//! A snapshot is rebuilt from scratch on every refresh; nothing in it is written back to the
//! store.

use std::{collections::HashSet, time::SystemTime};

use indexmap::IndexMap;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::{
        game_store::sort_moves,
        models::{
            EvaluationEntity, EvaluationKind, MoveEntity, ParticipantEntity, SessionEntity,
            VoteEntity, VoteKind,
        },
    },
    state::phase::GamePhase,
};

/// Reactions received by one participant, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReactionTally {
    /// Eggs received.
    pub egg: u32,
    /// Flowers received.
    pub flower: u32,
    /// Poops received.
    pub poop: u32,
    /// Kisses received.
    pub kiss: u32,
}

impl ReactionTally {
    /// Count one more reaction of `kind`.
    pub fn add(&mut self, kind: EvaluationKind) {
        match kind {
            EvaluationKind::Egg => self.egg += 1,
            EvaluationKind::Flower => self.flower += 1,
            EvaluationKind::Poop => self.poop += 1,
            EvaluationKind::Kiss => self.kiss += 1,
        }
    }

    /// Weighted sum used to rank participants once the game ends.
    pub fn positive_score(&self) -> i32 {
        [
            (EvaluationKind::Egg, self.egg),
            (EvaluationKind::Flower, self.flower),
            (EvaluationKind::Poop, self.poop),
            (EvaluationKind::Kiss, self.kiss),
        ]
        .into_iter()
        .map(|(kind, count)| kind.weight() * count as i32)
        .sum()
    }
}

/// Consistent in-memory view of a session assembled from the five shared tables.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Session row.
    pub session: SessionEntity,
    /// Participants in turn order.
    pub participants: Vec<ParticipantEntity>,
    /// Moves of the current epoch, oldest first.
    pub moves: Vec<MoveEntity>,
    /// Evaluations attached to `moves`.
    pub evaluations: Vec<EvaluationEntity>,
    /// Cancel votes on the current move.
    pub current_votes: Vec<VoteEntity>,
    /// Reactions received, keyed by participant in turn order.
    pub received: IndexMap<Uuid, ReactionTally>,
    /// Time of the read that produced this snapshot.
    pub refreshed_at: SystemTime,
    /// Message of the last failed refresh, cleared by the next successful one.
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Reconcile raw table reads into a snapshot.
    ///
    /// `votes` may contain votes of any move; only those on the current move are kept.
    pub fn derive(
        session: SessionEntity,
        mut participants: Vec<ParticipantEntity>,
        mut moves: Vec<MoveEntity>,
        evaluations: Vec<EvaluationEntity>,
        votes: Vec<VoteEntity>,
    ) -> Self {
        order_participants(&mut participants);

        moves.retain(|mv| mv.epoch == session.epoch);
        sort_moves(&mut moves);

        let move_ids: HashSet<Uuid> = moves.iter().map(|mv| mv.id).collect();
        let evaluations: Vec<EvaluationEntity> = evaluations
            .into_iter()
            .filter(|evaluation| move_ids.contains(&evaluation.move_id))
            .collect();

        let current_votes = match moves.last() {
            Some(current) => votes
                .into_iter()
                .filter(|vote| vote.move_id == current.id && vote.kind == VoteKind::CancelRound)
                .collect(),
            None => Vec::new(),
        };

        let mut received: IndexMap<Uuid, ReactionTally> = participants
            .iter()
            .map(|participant| (participant.id, ReactionTally::default()))
            .collect();
        let authors: IndexMap<Uuid, Uuid> = moves
            .iter()
            .map(|mv| (mv.id, mv.participant_id))
            .collect();
        for evaluation in &evaluations {
            if let Some(author) = authors.get(&evaluation.move_id) {
                received.entry(*author).or_default().add(evaluation.kind);
            }
        }

        Self {
            session,
            participants,
            moves,
            evaluations,
            current_votes,
            received,
            refreshed_at: SystemTime::now(),
            last_error: None,
        }
    }

    /// Phase derived from the session row.
    pub fn phase(&self) -> GamePhase {
        GamePhase::of(&self.session)
    }

    /// Chronologically last move of the current epoch.
    pub fn current_move(&self) -> Option<&MoveEntity> {
        self.moves.last()
    }

    /// Participant with the given id.
    pub fn participant(&self, id: Uuid) -> Option<&ParticipantEntity> {
        self.participants.iter().find(|participant| participant.id == id)
    }

    /// Participant whose turn it is, when the session index points at one.
    pub fn current_participant(&self) -> Option<&ParticipantEntity> {
        self.participants.get(self.session.current_player_index)
    }

    /// Move of the current game with the given id.
    pub fn find_move(&self, id: Uuid) -> Option<&MoveEntity> {
        self.moves.iter().find(|mv| mv.id == id)
    }

    /// Whether `participant` already reacted to `move_id`.
    pub fn has_evaluated(&self, move_id: Uuid, participant: Uuid) -> bool {
        self.evaluations
            .iter()
            .any(|evaluation| evaluation.move_id == move_id && evaluation.evaluator_id == participant)
    }

    /// Whether `participant` already voted to cancel the current move.
    pub fn has_voted(&self, participant: Uuid) -> bool {
        self.current_votes
            .iter()
            .any(|vote| vote.voter_id == participant)
    }

    /// Reactions received by `participant`.
    pub fn received_by(&self, participant: Uuid) -> ReactionTally {
        self.received.get(&participant).copied().unwrap_or_default()
    }

    /// Move whose evaluation window is open, if any.
    pub fn move_under_evaluation(&self) -> Option<&MoveEntity> {
        if self.phase() != GamePhase::Evaluating {
            return None;
        }
        self.current_move()
            .filter(|mv| mv.round_number == self.session.round_number)
    }
}

/// Sort participants into turn order: join order, then join time, then identifier.
pub fn order_participants(participants: &mut [ParticipantEntity]) {
    participants.sort_by(|a, b| {
        a.join_order
            .cmp(&b.join_order)
            .then(a.joined_at.cmp(&b.joined_at))
            .then(a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::models::VoteStatus;

    fn participant(name: &str, join_order: usize, joined_at: SystemTime) -> ParticipantEntity {
        ParticipantEntity {
            id: Uuid::new_v4(),
            session_id: "ROOM01".into(),
            name: name.into(),
            join_order,
            is_host: join_order == 0,
            score: 0,
            joined_at,
        }
    }

    fn authored(author: &ParticipantEntity, epoch: u32, created_at: SystemTime) -> MoveEntity {
        MoveEntity {
            id: Uuid::new_v4(),
            session_id: "ROOM01".into(),
            participant_id: author.id,
            participant_name: author.name.clone(),
            character: '好',
            position: 0,
            sentence_before: String::new(),
            sentence_after: "好".into(),
            round_number: 1,
            epoch,
            vote_status: VoteStatus::Pending,
            vote_outcome_message: None,
            created_at,
        }
    }

    fn reaction(mv: &MoveEntity, evaluator: &ParticipantEntity, kind: EvaluationKind) -> EvaluationEntity {
        EvaluationEntity {
            id: Uuid::new_v4(),
            session_id: "ROOM01".into(),
            move_id: mv.id,
            evaluator_id: evaluator.id,
            evaluator_name: evaluator.name.clone(),
            kind,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn join_order_ties_are_broken_by_join_time() {
        let now = SystemTime::now();
        let late = participant("late", 1, now + Duration::from_secs(2));
        let early = participant("early", 1, now + Duration::from_secs(1));
        let host = participant("host", 0, now);
        let mut participants = vec![late.clone(), early.clone(), host.clone()];

        order_participants(&mut participants);

        let names: Vec<&str> = participants.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["host", "early", "late"]);
    }

    #[test]
    fn derive_drops_previous_epochs_and_tallies_reactions() {
        let now = SystemTime::now();
        let alice = participant("alice", 0, now);
        let bob = participant("bob", 1, now);
        let mut session = SessionEntity::new("ROOM01".into(), alice.id);
        session.epoch = 2;

        let old = authored(&alice, 1, now);
        let first = authored(&alice, 2, now + Duration::from_secs(1));
        let second = authored(&bob, 2, now + Duration::from_secs(2));
        let evaluations = vec![
            reaction(&old, &bob, EvaluationKind::Poop),
            reaction(&first, &bob, EvaluationKind::Flower),
            reaction(&second, &alice, EvaluationKind::Kiss),
        ];
        let stale_vote = VoteEntity {
            id: Uuid::new_v4(),
            session_id: "ROOM01".into(),
            move_id: first.id,
            voter_id: bob.id,
            kind: VoteKind::CancelRound,
            created_at: now,
        };

        let snapshot = SessionSnapshot::derive(
            session,
            vec![bob.clone(), alice.clone()],
            vec![second.clone(), old, first.clone()],
            evaluations,
            vec![stale_vote],
        );

        assert_eq!(snapshot.moves.len(), 2);
        assert_eq!(snapshot.current_move().map(|mv| mv.id), Some(second.id));
        assert_eq!(snapshot.evaluations.len(), 2);
        assert!(snapshot.current_votes.is_empty());
        assert_eq!(snapshot.received_by(alice.id).flower, 1);
        assert_eq!(snapshot.received_by(alice.id).poop, 0);
        assert_eq!(snapshot.received_by(bob.id).kiss, 1);
        assert_eq!(snapshot.participants[1].id, bob.id);
        assert!(snapshot.has_evaluated(first.id, bob.id));
        assert!(!snapshot.has_evaluated(second.id, bob.id));
    }

    #[test]
    fn positive_score_weights_each_kind() {
        let mut tally = ReactionTally::default();
        for kind in [
            EvaluationKind::Flower,
            EvaluationKind::Flower,
            EvaluationKind::Kiss,
            EvaluationKind::Egg,
            EvaluationKind::Poop,
        ] {
            tally.add(kind);
        }
        assert_eq!(tally.positive_score(), 4);
    }
}
