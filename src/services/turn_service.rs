use std::time::SystemTime;

use rand::{Rng, rng};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{MoveEntity, ParticipantEntity, SessionEntity, SessionPatch, VoteStatus},
    dto::{
        session::SessionView,
        validation::{normalize_display_name, single_character},
    },
    error::ServiceError,
    services::session_reader,
    state::{
        LocalIdentity, SharedState,
        phase::{GameEvent, GamePhase, compute_transition},
    },
};

const ROOM_CODE_LENGTH: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_CODE_ATTEMPTS: usize = 5;

/// Random room code made of uppercase letters and digits.
pub fn generate_room_code() -> String {
    let mut rng = rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}

/// Insert `character` before the character at `position`, counting in characters rather than
/// bytes. Returns `None` when `position` lies past the end of `sentence`.
pub fn insert_character(sentence: &str, position: usize, character: char) -> Option<String> {
    let byte_index = if position == 0 {
        0
    } else {
        match sentence.char_indices().nth(position) {
            Some((index, _)) => index,
            None if sentence.chars().count() == position => sentence.len(),
            None => return None,
        }
    };

    let mut result = String::with_capacity(sentence.len() + character.len_utf8());
    result.push_str(&sentence[..byte_index]);
    result.push(character);
    result.push_str(&sentence[byte_index..]);
    Some(result)
}

/// Open a new session with this client as its host.
pub async fn create_session(
    state: &SharedState,
    host_name: &str,
) -> Result<SessionView, ServiceError> {
    let host_name = normalize_display_name(host_name)?;
    let store = state.require_game_store().await?;
    let host_id = Uuid::new_v4();

    let mut attempt = 0;
    let session = loop {
        attempt += 1;
        let candidate = SessionEntity::new(generate_room_code(), host_id);
        match store.insert_session(candidate).await {
            Ok(session) => break session,
            Err(err) if err.is_conflict() && attempt < ROOM_CODE_ATTEMPTS => {
                warn!(attempt, "room code already taken; generating another");
            }
            Err(err) => return Err(err.into()),
        }
    };

    store
        .insert_participant(ParticipantEntity {
            id: host_id,
            session_id: session.id.clone(),
            name: host_name.clone(),
            join_order: 0,
            is_host: true,
            score: 0,
            joined_at: SystemTime::now(),
        })
        .await?;
    info!(session_id = %session.id, host = %host_name, "session created");

    session_reader::attach(
        state,
        LocalIdentity {
            session_id: session.id,
            participant_id: host_id,
        },
    )
    .await
}

/// Join an existing session by its room code. Sessions in the middle of a game decline new
/// participants.
pub async fn join_session(
    state: &SharedState,
    session_id: &str,
    name: &str,
) -> Result<SessionView, ServiceError> {
    let name = normalize_display_name(name)?;
    let session_id = session_id.trim().to_uppercase();
    let store = state.require_game_store().await?;

    let Some(session) = store.find_session(&session_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "session `{session_id}` not found"
        )));
    };
    if matches!(
        GamePhase::of(&session),
        GamePhase::AwaitingMove | GamePhase::Evaluating
    ) {
        return Err(ServiceError::InvalidState(
            "cannot join a game in progress".into(),
        ));
    }

    let participants = store.list_participants(&session_id).await?;
    let participant = ParticipantEntity {
        id: Uuid::new_v4(),
        session_id: session_id.clone(),
        name,
        join_order: participants.len(),
        is_host: false,
        score: 0,
        joined_at: SystemTime::now(),
    };
    let participant = store.insert_participant(participant).await?;
    info!(
        %session_id,
        participant_id = %participant.id,
        join_order = participant.join_order,
        "joined session"
    );

    session_reader::attach(
        state,
        LocalIdentity {
            session_id,
            participant_id: participant.id,
        },
    )
    .await
}

/// Start play, or start a new game once the previous one ended. Host only.
pub async fn start_session(
    state: &SharedState,
    topic: Option<String>,
) -> Result<SessionView, ServiceError> {
    let identity = state.require_identity().await?;
    let store = state.require_game_store().await?;
    let snapshot = session_reader::refresh_now(state).await?;

    if snapshot.session.host_id != identity.participant_id {
        return Err(ServiceError::Unauthorized(
            "only the host can start the game".into(),
        ));
    }
    compute_transition(snapshot.phase(), GameEvent::Start)?;

    let sentence = topic
        .map(|topic| topic.trim().to_string())
        .filter(|topic| !topic.is_empty())
        .unwrap_or_else(|| state.config().random_topic());
    let epoch = snapshot.session.epoch + 1;

    state
        .run_transition(|| async {
            store
                .update_session(
                    &identity.session_id,
                    SessionPatch {
                        current_sentence: Some(sentence.clone()),
                        game_started: Some(true),
                        game_ended: Some(false),
                        current_player_index: Some(0),
                        round_number: Some(1),
                        show_evaluation_phase: Some(false),
                        epoch: Some(epoch),
                        expect: None,
                    },
                )
                .await
                .map(|_| ())
                .map_err(ServiceError::from)
        })
        .await?;
    info!(session_id = %identity.session_id, epoch, %sentence, "game started");

    session_reader::refresh_view(state).await
}

/// Insert one character into the shared sentence on this participant's turn.
pub async fn submit_move(
    state: &SharedState,
    position: usize,
    character: &str,
) -> Result<SessionView, ServiceError> {
    let character = single_character(character)?;
    let identity = state.require_identity().await?;
    let store = state.require_game_store().await?;
    let snapshot = session_reader::refresh_now(state).await?;
    let session = &snapshot.session;

    let Some(sentence_after) = insert_character(&session.current_sentence, position, character)
    else {
        return Err(ServiceError::InvalidInput(format!(
            "position {position} is outside the sentence (length {})",
            session.current_sentence.chars().count()
        )));
    };
    let reaches_end = sentence_after.chars().count() >= state.config().end_length;
    let next_phase = compute_transition(snapshot.phase(), GameEvent::SubmitMove { reaches_end })?;

    let Some(author) = snapshot.current_participant() else {
        return Err(ServiceError::InvalidState(
            "no participant holds the turn".into(),
        ));
    };
    if author.id != identity.participant_id {
        return Err(ServiceError::InvalidState("it is not your turn".into()));
    }

    let mv = MoveEntity {
        id: Uuid::new_v4(),
        session_id: session.id.clone(),
        participant_id: author.id,
        participant_name: author.name.clone(),
        character,
        position,
        sentence_before: session.current_sentence.clone(),
        sentence_after: sentence_after.clone(),
        round_number: session.round_number,
        epoch: session.epoch,
        vote_status: VoteStatus::Pending,
        vote_outcome_message: None,
        created_at: SystemTime::now(),
    };
    let move_id = mv.id;

    state
        .run_transition(|| async {
            store.insert_move(mv).await?;
            store
                .update_session(
                    &identity.session_id,
                    SessionPatch {
                        current_sentence: Some(sentence_after.clone()),
                        show_evaluation_phase: Some(next_phase == GamePhase::Evaluating),
                        game_ended: Some(next_phase == GamePhase::Ended),
                        ..SessionPatch::default()
                    },
                )
                .await
                .map(|_| ())
                .map_err(ServiceError::from)
        })
        .await?;
    info!(
        session_id = %identity.session_id,
        %move_id,
        position,
        %character,
        phase = ?next_phase,
        "move submitted"
    );

    session_reader::refresh_view(state).await
}

/// Return the session to the lobby, keeping every row.
pub async fn reset_session(state: &SharedState) -> Result<SessionView, ServiceError> {
    let identity = state.require_identity().await?;
    let store = state.require_game_store().await?;

    state
        .run_transition(|| async {
            store
                .update_session(
                    &identity.session_id,
                    SessionPatch {
                        current_sentence: Some(String::new()),
                        game_started: Some(false),
                        game_ended: Some(false),
                        current_player_index: Some(0),
                        round_number: Some(1),
                        show_evaluation_phase: Some(false),
                        ..SessionPatch::default()
                    },
                )
                .await
                .map(|_| ())
                .map_err(ServiceError::from)
        })
        .await?;
    state.timers().cancel_all();
    info!(session_id = %identity.session_id, "session reset");

    session_reader::refresh_view(state).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::EngineConfig,
        dao::game_store::memory::MemoryGameStore,
        services::statistics,
        state::AppState,
    };

    async fn client(store: &MemoryGameStore) -> SharedState {
        AppState::with_store(EngineConfig::default(), Arc::new(store.clone())).await
    }

    #[test]
    fn insert_counts_characters_not_bytes() {
        assert_eq!(insert_character("abc", 1, 'x').as_deref(), Some("axbc"));
        assert_eq!(insert_character("abc", 3, 'd').as_deref(), Some("abcd"));
        assert_eq!(insert_character("", 0, '春').as_deref(), Some("春"));
        assert_eq!(insert_character("春天", 1, '的').as_deref(), Some("春的天"));
        assert_eq!(insert_character("春天", 2, '来').as_deref(), Some("春天来"));
        assert_eq!(insert_character("春天", 3, '了'), None);
    }

    #[test]
    fn every_insertion_point_rolls_back_to_the_original() {
        for (original, character) in [("the quick fox", 'x'), ("春天来了，花开了", '的')] {
            let length = original.chars().count();
            for position in 0..=length {
                let inserted = insert_character(original, position, character).unwrap();
                assert_eq!(inserted.chars().count(), length + 1);
                assert_eq!(inserted.chars().nth(position), Some(character));

                let rolled_back: String = inserted
                    .chars()
                    .enumerate()
                    .filter(|(index, _)| *index != position)
                    .map(|(_, c)| c)
                    .collect();
                assert_eq!(rolled_back.as_bytes(), original.as_bytes());
            }
            assert_eq!(insert_character(original, length + 1, character), None);
        }
    }

    #[test]
    fn room_codes_use_uppercase_alphanumerics() {
        let code = generate_room_code();
        assert_eq!(code.len(), ROOM_CODE_LENGTH);
        assert!(
            code.chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[tokio::test]
    async fn move_opens_the_evaluation_phase() {
        let store = MemoryGameStore::new();
        let alice = client(&store).await;
        let bob = client(&store).await;
        let carol = client(&store).await;
        let created = create_session(&alice, "alice").await.unwrap();
        join_session(&bob, &created.session_id.to_lowercase(), " bob ")
            .await
            .unwrap();
        join_session(&carol, &created.session_id, "carol").await.unwrap();
        start_session(&alice, Some(" abc ".into())).await.unwrap();

        let view = submit_move(&alice, 1, "x").await.unwrap();

        assert_eq!(view.sentence, "axbc");
        assert_eq!(view.phase, GamePhase::Evaluating);
        assert_eq!(view.participants[1].name, "bob");
        let mv = view.current_move.unwrap();
        assert_eq!(mv.sentence_before, "abc");
        assert_eq!(mv.sentence_after, "axbc");
        assert_eq!(mv.vote_status, VoteStatus::Pending);
        assert!(view.evaluation_deadline.is_some());
    }

    #[tokio::test]
    async fn reaching_the_end_length_ends_the_game() {
        let store = MemoryGameStore::new();
        let alice = client(&store).await;
        let bob = client(&store).await;
        let created = create_session(&alice, "alice").await.unwrap();
        join_session(&bob, &created.session_id, "bob").await.unwrap();
        let topic = "一".repeat(19);
        start_session(&alice, Some(topic)).await.unwrap();

        let view = submit_move(&alice, 19, "完").await.unwrap();

        assert_eq!(view.phase, GamePhase::Ended);
        assert!(view.game_ended);
        assert_eq!(view.sentence_length, 20);
        assert!(view.evaluation_deadline.is_none());
        assert_eq!(
            view.current_move.map(|mv| mv.vote_status),
            Some(VoteStatus::Pending)
        );
        let stats = statistics::get_statistics(&alice).await.unwrap();
        assert_eq!(stats.total_moves, 1);
        assert_eq!(stats.final_sentence.chars().count(), 20);
    }

    #[tokio::test]
    async fn moves_are_declined_out_of_turn_and_out_of_range() {
        let store = MemoryGameStore::new();
        let alice = client(&store).await;
        let bob = client(&store).await;
        let created = create_session(&alice, "alice").await.unwrap();
        join_session(&bob, &created.session_id, "bob").await.unwrap();

        assert!(matches!(
            submit_move(&alice, 0, "x").await,
            Err(ServiceError::InvalidState(_))
        ));

        start_session(&alice, Some("abc".into())).await.unwrap();
        assert!(matches!(
            submit_move(&bob, 0, "x").await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            submit_move(&alice, 4, "x").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            submit_move(&alice, 0, " ").await,
            Err(ServiceError::InvalidInput(_))
        ));

        submit_move(&alice, 0, "x").await.unwrap();
        assert!(matches!(
            submit_move(&alice, 0, "y").await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn lifecycle_rules_for_join_start_and_reset() {
        let store = MemoryGameStore::new();
        let alice = client(&store).await;
        let bob = client(&store).await;
        let late = client(&store).await;
        let created = create_session(&alice, "alice").await.unwrap();
        assert!(created.is_host);
        join_session(&bob, &created.session_id, "bob").await.unwrap();

        assert!(matches!(
            join_session(&late, "NOPE00", "late").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            start_session(&bob, None).await,
            Err(ServiceError::Unauthorized(_))
        ));

        let started = start_session(&alice, None).await.unwrap();
        assert!(EngineConfig::default().topics().contains(&started.sentence));
        assert_eq!(started.phase, GamePhase::AwaitingMove);
        assert!(started.is_my_turn);
        assert!(matches!(
            join_session(&late, &created.session_id, "late").await,
            Err(ServiceError::InvalidState(_))
        ));

        let reset = reset_session(&bob).await.unwrap();
        assert_eq!(reset.phase, GamePhase::Lobby);
        assert_eq!(reset.sentence, "");
        assert_eq!(reset.round_number, 1);

        let joined = join_session(&late, &created.session_id, "late").await.unwrap();
        assert_eq!(joined.participants.len(), 3);
        assert_eq!(joined.participants[2].join_order, 2);
    }
}
