use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::VoteStatus,
    dto::{
        session::{SessionView, StatisticsView},
        sse::{MoveResolvedEvent, RefreshFailedEvent, ServerEvent, SystemStatus},
    },
    state::SharedState,
};

/// Event carrying a [`SessionView`].
pub const EVENT_SESSION_SNAPSHOT: &str = "session.snapshot";
/// Event carrying a [`StatisticsView`].
pub const EVENT_SESSION_STATISTICS: &str = "session.statistics";
/// Event carrying a [`MoveResolvedEvent`].
pub const EVENT_MOVE_RESOLVED: &str = "move.resolved";
/// Event carrying a [`RefreshFailedEvent`].
pub const EVENT_REFRESH_FAILED: &str = "session.refresh_failed";
/// Event carrying a [`SystemStatus`].
pub const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast the latest view of the attached session.
pub fn broadcast_snapshot(state: &SharedState, view: &SessionView) {
    send_event(state, EVENT_SESSION_SNAPSHOT, view);
}

/// Broadcast the post-game summary once the session has ended.
pub fn broadcast_statistics(state: &SharedState, statistics: &StatisticsView) {
    send_event(state, EVENT_SESSION_STATISTICS, statistics);
}

/// Broadcast the outcome of a cancel vote settled by this client.
pub fn broadcast_move_resolved(
    state: &SharedState,
    move_id: Uuid,
    vote_status: VoteStatus,
    message: &str,
) {
    let payload = MoveResolvedEvent {
        move_id,
        vote_status,
        message: message.to_string(),
    };
    send_event(state, EVENT_MOVE_RESOLVED, &payload);
}

/// Broadcast that a refresh failed and the previous snapshot is still shown.
pub fn broadcast_refresh_failed(state: &SharedState, message: &str) {
    let payload = RefreshFailedEvent {
        message: message.to_string(),
    };
    send_event(state, EVENT_REFRESH_FAILED, &payload);
}

/// Broadcast the current degraded flag.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    send_event(state, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
}

fn send_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, state::AppState};

    #[tokio::test]
    async fn events_carry_their_name_and_json_payload() {
        let state = AppState::new(EngineConfig::default());
        let mut receiver = state.sse().subscribe();

        let move_id = Uuid::new_v4();
        broadcast_move_resolved(&state, move_id, VoteStatus::Failed, "Vote failed: bob's character stays.");
        broadcast_system_status(&state, true);

        let resolved = receiver.recv().await.unwrap();
        assert_eq!(resolved.event.as_deref(), Some(EVENT_MOVE_RESOLVED));
        let data: serde_json::Value = serde_json::from_str(&resolved.data).unwrap();
        assert_eq!(data["vote_status"], "failed");
        assert_eq!(data["move_id"], move_id.to_string());

        let status = receiver.recv().await.unwrap();
        assert_eq!(status.event.as_deref(), Some(EVENT_SYSTEM_STATUS));
        assert_eq!(status.data, r#"{"degraded":true}"#);
    }
}
