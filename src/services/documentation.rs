use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document of the word relay client.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::session_stream,
        crate::routes::session::create_session,
        crate::routes::session::join_session,
        crate::routes::session::get_session,
        crate::routes::session::start_session,
        crate::routes::session::submit_move,
        crate::routes::session::submit_evaluation,
        crate::routes::session::submit_cancel_vote,
        crate::routes::session::reset_session,
        crate::routes::session::refresh_session,
        crate::routes::session::get_statistics,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::JoinSessionRequest,
            crate::dto::session::StartSessionRequest,
            crate::dto::session::SubmitMoveRequest,
            crate::dto::session::SubmitEvaluationRequest,
            crate::dto::session::SessionView,
            crate::dto::session::ParticipantView,
            crate::dto::session::MoveView,
            crate::dto::session::EvaluationView,
            crate::dto::session::StatisticsView,
            crate::dto::session::ParticipantStatisticsView,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::MoveResolvedEvent,
            crate::dto::sse::RefreshFailedEvent,
            crate::state::phase::GamePhase,
            crate::state::snapshot::ReactionTally,
            crate::dao::models::VoteStatus,
            crate::dao::models::EvaluationKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Session lifecycle, moves, reactions and votes"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
/// OpenAPI document of the local API.
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_session_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/sessions",
            "/sessions/{id}/join",
            "/session",
            "/session/moves",
            "/session/votes",
            "/session/statistics",
            "/sse/session",
            "/healthcheck",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
