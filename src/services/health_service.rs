use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether this client can reach the shared store, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_game_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let session_id = state.identity().await.map(|identity| identity.session_id);
    HealthResponse::new(state.is_degraded(), session_id)
}
