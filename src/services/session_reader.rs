//! Keeps the local snapshot of the attached session in sync with the shared store.
//!
//! Refreshes come from three places: the poll worker (forced, also woken by
//! [`SharedState::request_refresh`]), the store change feed (passive, throttled) and the
//! client's own writes (forced). Every refresh is a full re-read.

use std::time::{Duration, SystemTime};

use futures::StreamExt;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::game_store::GameStore,
    dto::session::SessionView,
    error::ServiceError,
    services::{sse_events, statistics::compute_statistics, voting_service},
    state::{
        LocalIdentity, SharedState,
        phase::GamePhase,
        snapshot::SessionSnapshot,
        timers::{RefreshKind, RefreshPermit},
    },
};

/// Re-read the attached session and publish the result.
///
/// Returns `Ok(None)` when no session is attached or a passive refresh was throttled. On
/// failure the previous snapshot is kept and annotated with the error.
pub async fn refresh(
    state: &SharedState,
    kind: RefreshKind,
) -> Result<Option<SessionSnapshot>, ServiceError> {
    let Some(identity) = state.identity().await else {
        return Ok(None);
    };

    if let RefreshPermit::Throttled(wait) = state
        .refresh_clock()
        .begin(kind, state.config().min_refresh_interval)
        .await
    {
        schedule_trailing_refresh(state, wait);
        return Ok(None);
    }

    let loaded = match state.require_game_store().await {
        Ok(store) => load_snapshot(store.as_ref(), &identity.session_id).await,
        Err(err) => Err(err),
    };

    match loaded {
        Ok(snapshot) => {
            if state.identity().await.as_ref() != Some(&identity) {
                debug!(session_id = %identity.session_id, "identity changed during refresh; dropping result");
                return Ok(None);
            }
            state.store_snapshot(snapshot.clone()).await;
            publish(state, &identity, &snapshot);
            Ok(Some(snapshot))
        }
        Err(err) => {
            warn!(
                session_id = %identity.session_id,
                error = %err,
                "session refresh failed; keeping last snapshot"
            );
            state.record_refresh_error(err.to_string()).await;
            sse_events::broadcast_refresh_failed(state, &err.to_string());
            Err(err)
        }
    }
}

/// Forced refresh that fails when no session is attached.
pub async fn refresh_now(state: &SharedState) -> Result<SessionSnapshot, ServiceError> {
    refresh(state, RefreshKind::Forced)
        .await?
        .ok_or_else(|| ServiceError::InvalidState("not attached to a session".into()))
}

/// Latest snapshot, preferring a fresh read and falling back to the cached one when the store
/// cannot be read.
pub async fn fresh_or_cached(state: &SharedState) -> Result<SessionSnapshot, ServiceError> {
    match refresh_now(state).await {
        Ok(snapshot) => Ok(snapshot),
        Err(err) => state.snapshot().await.ok_or(err),
    }
}

/// Read all five tables for `session_id` and reconcile them.
pub async fn load_snapshot(
    store: &dyn GameStore,
    session_id: &str,
) -> Result<SessionSnapshot, ServiceError> {
    let (session, participants, moves, evaluations) = tokio::try_join!(
        store.find_session(session_id),
        store.list_participants(session_id),
        store.list_moves(session_id),
        store.list_evaluations(session_id),
    )?;
    let Some(session) = session else {
        return Err(ServiceError::NotFound(format!(
            "session `{session_id}` not found"
        )));
    };

    let votes = match moves.iter().rev().find(|mv| mv.epoch == session.epoch) {
        Some(current) => store.list_votes(session_id, current.id).await?,
        None => Vec::new(),
    };

    Ok(SessionSnapshot::derive(
        session,
        participants,
        moves,
        evaluations,
        votes,
    ))
}

/// Render a snapshot for this client's participant.
pub fn view_of(state: &SharedState, identity: &LocalIdentity, snapshot: &SessionSnapshot) -> SessionView {
    SessionView::new(
        snapshot,
        identity.participant_id,
        state.config().phase_duration,
    )
}

/// Cached view of the attached session, reading the store when nothing is cached yet.
pub async fn get_snapshot(state: &SharedState) -> Result<SessionView, ServiceError> {
    let identity = state.require_identity().await?;
    let snapshot = match state.snapshot().await {
        Some(snapshot) => snapshot,
        None => refresh_now(state).await?,
    };
    Ok(view_of(state, &identity, &snapshot))
}

/// Forced refresh rendered for the local UI.
pub async fn refresh_view(state: &SharedState) -> Result<SessionView, ServiceError> {
    let identity = state.require_identity().await?;
    let snapshot = refresh_now(state).await?;
    Ok(view_of(state, &identity, &snapshot))
}

/// Start acting as `identity`: reset local state, start the poll and notification workers and
/// take a first snapshot.
pub async fn attach(
    state: &SharedState,
    identity: LocalIdentity,
) -> Result<SessionView, ServiceError> {
    info!(
        session_id = %identity.session_id,
        participant_id = %identity.participant_id,
        "attaching to session"
    );
    state.set_identity(identity.clone()).await;
    state
        .replace_workers(vec![
            tokio::spawn(poll_loop(state.clone())),
            tokio::spawn(notification_loop(state.clone(), identity.session_id.clone())),
        ])
        .await;

    let snapshot = refresh_now(state).await?;
    Ok(view_of(state, &identity, &snapshot))
}

fn publish(state: &SharedState, identity: &LocalIdentity, snapshot: &SessionSnapshot) {
    sync_phase_timer(state, snapshot);
    sse_events::broadcast_snapshot(state, &view_of(state, identity, snapshot));
    if snapshot.phase() == GamePhase::Ended {
        sse_events::broadcast_statistics(state, &compute_statistics(snapshot).into());
    }
}

/// Keep exactly one timer, for the move under evaluation, measured from its creation time.
fn sync_phase_timer(state: &SharedState, snapshot: &SessionSnapshot) {
    let Some(mv) = snapshot.move_under_evaluation() else {
        state.timers().cancel_all();
        return;
    };

    let move_id = mv.id;
    state.timers().retain(Some(move_id));

    let deadline = mv.created_at + state.config().phase_duration;
    let delay = deadline
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    let timer_state = state.clone();
    if state
        .timers()
        .arm(move_id, delay, on_phase_elapsed(timer_state, move_id))
    {
        debug!(%move_id, ?delay, "armed phase timer");
    }
}

async fn on_phase_elapsed(state: SharedState, move_id: Uuid) {
    match voting_service::resolve_phase(&state, move_id).await {
        Ok(resolution) => debug!(
            %move_id,
            status = %resolution.vote_status,
            settled_here = resolution.settled_here,
            advanced = resolution.advanced,
            "phase timer resolved move"
        ),
        Err(err) => warn!(%move_id, error = %err, "phase resolution failed"),
    }
    state.request_refresh();
}

/// Request one forced refresh at the end of the throttle window, unless one is pending.
fn schedule_trailing_refresh(state: &SharedState, wait: Duration) {
    if !state.refresh_clock().claim_trailing() {
        return;
    }
    let state = state.clone();
    tokio::spawn(async move {
        sleep(wait).await;
        state.refresh_clock().release_trailing();
        state.request_refresh();
    });
}

async fn poll_loop(state: SharedState) {
    let mut ticker = interval(state.config().poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; attach already refreshes.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = state.refresh_requested() => {}
        }
        if let Err(err) = refresh(&state, RefreshKind::Forced).await {
            debug!(error = %err, "forced refresh failed");
        }
    }
}

async fn notification_loop(state: SharedState, session_id: String) {
    loop {
        let Some(store) = state.game_store().await else {
            sleep(state.config().poll_interval).await;
            continue;
        };

        let mut changes = store.subscribe(&session_id);
        while let Some(change) = changes.next().await {
            debug!(table = %change.table, key = %change.key, "store change notification");
            if let Err(err) = refresh(&state, RefreshKind::Passive).await {
                debug!(error = %err, "passive refresh failed");
            }
        }

        warn!(%session_id, "change feed closed; subscribing again");
        sleep(state.config().poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::EngineConfig,
        dao::{
            game_store::memory::MemoryGameStore,
            models::{ParticipantEntity, SessionEntity, SessionPatch},
        },
        state::AppState,
    };

    async fn seeded_store() -> (MemoryGameStore, LocalIdentity) {
        let store = MemoryGameStore::new();
        let host = Uuid::new_v4();
        store
            .insert_session(SessionEntity::new("ROOM01".into(), host))
            .await
            .unwrap();
        store
            .insert_participant(ParticipantEntity {
                id: host,
                session_id: "ROOM01".into(),
                name: "host".into(),
                join_order: 0,
                is_host: true,
                score: 0,
                joined_at: SystemTime::now(),
            })
            .await
            .unwrap();
        (
            store,
            LocalIdentity {
                session_id: "ROOM01".into(),
                participant_id: host,
            },
        )
    }

    #[tokio::test]
    async fn refresh_without_identity_is_a_no_op() {
        let state = AppState::with_store(EngineConfig::default(), Arc::new(MemoryGameStore::new())).await;
        assert!(refresh(&state, RefreshKind::Forced).await.unwrap().is_none());
        assert!(refresh_now(&state).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn passive_refresh_inside_window_is_skipped() {
        let (store, identity) = seeded_store().await;
        let state = AppState::with_store(EngineConfig::default(), Arc::new(store.clone())).await;
        state.set_identity(identity).await;

        assert!(refresh(&state, RefreshKind::Passive).await.unwrap().is_some());
        store
            .update_session(
                "ROOM01",
                SessionPatch {
                    current_sentence: Some("春天".into()),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();

        assert!(refresh(&state, RefreshKind::Passive).await.unwrap().is_none());
        assert_eq!(state.snapshot().await.unwrap().session.current_sentence, "");

        let forced = refresh(&state, RefreshKind::Forced).await.unwrap().unwrap();
        assert_eq!(forced.session.current_sentence, "春天");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_snapshot() {
        let (store, identity) = seeded_store().await;
        let state = AppState::with_store(EngineConfig::default(), Arc::new(store)).await;
        state.set_identity(identity).await;
        refresh_now(&state).await.unwrap();

        state.clear_game_store().await;
        assert!(matches!(
            refresh_now(&state).await,
            Err(ServiceError::Degraded)
        ));

        let kept = state.snapshot().await.unwrap();
        assert_eq!(kept.session.id, "ROOM01");
        assert!(kept.last_error.is_some());
        assert!(fresh_or_cached(&state).await.is_ok());
    }
}
