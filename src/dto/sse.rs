use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::VoteStatus;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name, if any.
    pub event: Option<String>,
    /// Rendered data field.
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already rendered data field.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the client is running without a storage backend connection.
    pub degraded: bool,
    /// Session this client is attached to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the client enters or leaves degraded mode.
pub struct SystemStatus {
    /// Whether the client is in degraded mode.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when this client settled the outcome of a move's cancel vote.
pub struct MoveResolvedEvent {
    /// Move whose vote was settled.
    pub move_id: Uuid,
    /// Final vote status.
    pub vote_status: VoteStatus,
    /// Outcome message recorded on the move.
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a refresh failed and the previous snapshot is kept.
pub struct RefreshFailedEvent {
    /// Error reported by the failed refresh.
    pub message: String,
}
