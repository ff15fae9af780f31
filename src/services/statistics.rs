use uuid::Uuid;

use crate::{
    dao::models::{EvaluationEntity, MoveEntity},
    dto::session::StatisticsView,
    error::ServiceError,
    state::{SharedState, phase::GamePhase, snapshot::{ReactionTally, SessionSnapshot}},
};

/// Post-game figures for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantStatistics {
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
    /// Cumulative score after rollback penalties.
    pub score: i32,
}

/// Post-game summary of a session's current epoch.
#[derive(Debug, Clone)]
pub struct SessionStatistics {
    /// Sentence at the end of the game.
    pub final_sentence: String,
    /// Moves made in the game.
    pub total_moves: usize,
    /// Per-participant figures, in turn order.
    pub participants: Vec<ParticipantStatistics>,
    /// Most valuable participant.
    pub mvp: Option<Uuid>,
    /// Moves of the game, oldest first.
    pub moves: Vec<MoveEntity>,
    /// Reactions of the game, oldest first.
    pub evaluations: Vec<EvaluationEntity>,
}

impl SessionStatistics {
    /// Figures of the most valuable participant.
    pub fn mvp_statistics(&self) -> Option<&ParticipantStatistics> {
        let mvp = self.mvp?;
        self.participants
            .iter()
            .find(|stats| stats.participant_id == mvp)
    }
}

/// Fold the move and evaluation history of a snapshot into per-participant figures.
///
/// The MVP has the highest positive score; ties go to more moves authored, then to the
/// earliest participant in turn order.
pub fn compute_statistics(snapshot: &SessionSnapshot) -> SessionStatistics {
    let participants: Vec<ParticipantStatistics> = snapshot
        .participants
        .iter()
        .map(|participant| {
            let received = snapshot.received_by(participant.id);
            ParticipantStatistics {
                participant_id: participant.id,
                name: participant.name.clone(),
                moves_authored: snapshot
                    .moves
                    .iter()
                    .filter(|mv| mv.participant_id == participant.id)
                    .count(),
                received,
                positive_score: received.positive_score(),
                score: participant.score,
            }
        })
        .collect();

    let mvp = participants
        .iter()
        .fold(None::<&ParticipantStatistics>, |best, candidate| match best {
            Some(best)
                if (candidate.positive_score, candidate.moves_authored)
                    <= (best.positive_score, best.moves_authored) =>
            {
                Some(best)
            }
            _ => Some(candidate),
        })
        .map(|stats| stats.participant_id);

    SessionStatistics {
        final_sentence: snapshot.session.current_sentence.clone(),
        total_moves: snapshot.moves.len(),
        participants,
        mvp,
        moves: snapshot.moves.clone(),
        evaluations: snapshot.evaluations.clone(),
    }
}

/// Statistics of the attached session, available once it has ended.
pub async fn get_statistics(state: &SharedState) -> Result<StatisticsView, ServiceError> {
    state.require_identity().await?;
    let Some(snapshot) = state.snapshot().await else {
        return Err(ServiceError::InvalidState("no session snapshot yet".into()));
    };
    if snapshot.phase() != GamePhase::Ended {
        return Err(ServiceError::InvalidState("the game has not ended".into()));
    }

    Ok(StatisticsView::from(compute_statistics(&snapshot)))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::dao::models::{
        EvaluationKind, ParticipantEntity, SessionEntity, VoteStatus,
    };

    struct Table {
        now: SystemTime,
        participants: Vec<ParticipantEntity>,
        moves: Vec<MoveEntity>,
        evaluations: Vec<EvaluationEntity>,
    }

    impl Table {
        fn new(names: &[&str]) -> Self {
            let now = SystemTime::now();
            let participants = names
                .iter()
                .enumerate()
                .map(|(join_order, name)| ParticipantEntity {
                    id: Uuid::new_v4(),
                    session_id: "ROOM01".into(),
                    name: name.to_string(),
                    join_order,
                    is_host: join_order == 0,
                    score: 0,
                    joined_at: now,
                })
                .collect();
            Self {
                now,
                participants,
                moves: Vec::new(),
                evaluations: Vec::new(),
            }
        }

        fn play(&mut self, author: usize) -> Uuid {
            let author = &self.participants[author];
            let mv = MoveEntity {
                id: Uuid::new_v4(),
                session_id: "ROOM01".into(),
                participant_id: author.id,
                participant_name: author.name.clone(),
                character: '字',
                position: 0,
                sentence_before: String::new(),
                sentence_after: "字".into(),
                round_number: self.moves.len() as u32 + 1,
                epoch: 1,
                vote_status: VoteStatus::Failed,
                vote_outcome_message: None,
                created_at: self.now + Duration::from_secs(self.moves.len() as u64),
            };
            let id = mv.id;
            self.moves.push(mv);
            id
        }

        fn react(&mut self, move_id: Uuid, evaluator: usize, kind: EvaluationKind) {
            let evaluator = &self.participants[evaluator];
            self.evaluations.push(EvaluationEntity {
                id: Uuid::new_v4(),
                session_id: "ROOM01".into(),
                move_id,
                evaluator_id: evaluator.id,
                evaluator_name: evaluator.name.clone(),
                kind,
                created_at: self.now,
            });
        }

        fn snapshot(self) -> SessionSnapshot {
            let mut session = SessionEntity::new("ROOM01".into(), self.participants[0].id);
            session.epoch = 1;
            session.game_started = true;
            session.game_ended = true;
            session.current_sentence = "字字字".into();
            SessionSnapshot::derive(
                session,
                self.participants,
                self.moves,
                self.evaluations,
                Vec::new(),
            )
        }
    }

    #[test]
    fn flowers_and_poops_decide_the_mvp() {
        let mut table = Table::new(&["A", "B", "C"]);
        let a1 = table.play(0);
        let b1 = table.play(1);
        table.play(2);
        let a2 = table.play(0);
        for evaluator in [1, 2] {
            table.react(a1, evaluator, EvaluationKind::Flower);
        }
        table.react(b1, 0, EvaluationKind::Poop);
        table.react(a2, 1, EvaluationKind::Kiss);

        let stats = compute_statistics(&table.snapshot());

        let a = &stats.participants[0];
        assert_eq!(a.moves_authored, 2);
        assert_eq!(a.received.flower, 2);
        assert_eq!(a.received.kiss, 1);
        assert_eq!(a.positive_score, 5);
        assert_eq!(stats.participants[1].positive_score, -1);
        assert_eq!(stats.participants[2].positive_score, 0);
        assert_eq!(stats.mvp_statistics().map(|mvp| mvp.name.as_str()), Some("A"));
        assert_eq!(stats.total_moves, 4);
        assert_eq!(stats.final_sentence, "字字字");
    }

    #[test]
    fn ties_go_to_more_moves_then_to_turn_order() {
        let mut table = Table::new(&["A", "B", "C"]);
        let a1 = table.play(0);
        let b1 = table.play(1);
        let b2 = table.play(1);
        table.react(a1, 2, EvaluationKind::Flower);
        table.react(a1, 1, EvaluationKind::Kiss);
        table.react(b1, 2, EvaluationKind::Flower);
        table.react(b2, 0, EvaluationKind::Kiss);

        let stats = compute_statistics(&table.snapshot());
        assert_eq!(stats.participants[0].positive_score, 3);
        assert_eq!(stats.participants[1].positive_score, 3);
        assert_eq!(stats.mvp_statistics().map(|mvp| mvp.name.as_str()), Some("B"));

        let table = Table::new(&["A", "B"]);
        let stats = compute_statistics(&table.snapshot());
        assert_eq!(stats.mvp_statistics().map(|mvp| mvp.name.as_str()), Some("A"));
    }
}
