use serde::Serialize;
use utoipa::ToSchema;

/// Connectivity of this client to the shared store.
#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Store installed and answering.
    Ok,
    /// No store installed or the last health check failed.
    Degraded,
}

/// Payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Store connectivity.
    pub status: HealthStatus,
    /// Room code of the attached session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl HealthResponse {
    /// Build the payload from the degraded flag and the attached session.
    pub fn new(degraded: bool, session_id: Option<String>) -> Self {
        let status = if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        Self { status, session_id }
    }
}
