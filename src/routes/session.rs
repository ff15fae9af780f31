use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::session::{
        CreateSessionRequest, JoinSessionRequest, SessionView, StartSessionRequest,
        StatisticsView, SubmitEvaluationRequest, SubmitMoveRequest,
    },
    error::AppError,
    services::{session_reader, statistics, turn_service, voting_service},
    state::SharedState,
};

/// Routes driving the session this client participates in.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}/join", post(join_session))
        .route("/session", get(get_session))
        .route("/session/start", post(start_session))
        .route("/session/moves", post(submit_move))
        .route("/session/evaluations", post(submit_evaluation))
        .route("/session/votes", post(submit_cancel_vote))
        .route("/session/reset", post(reset_session))
        .route("/session/refresh", post(refresh_session))
        .route("/session/statistics", get(get_statistics))
}

/// Open a new session hosted by this client.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created and attached", body = SessionView),
        (status = 400, description = "Invalid display name"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let view = turn_service::create_session(&state, &payload.host_name).await?;
    Ok(Json(view))
}

/// Join an existing session by its room code.
#[utoipa::path(
    post,
    path = "/sessions/{id}/join",
    tag = "session",
    params(("id" = String, Path, description = "Room code of the session")),
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Session joined and attached", body = SessionView),
        (status = 404, description = "Unknown room code"),
        (status = 409, description = "Game in progress")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let view = turn_service::join_session(&state, &id, &payload.name).await?;
    Ok(Json(view))
}

/// Cached view of the attached session.
#[utoipa::path(
    get,
    path = "/session",
    tag = "session",
    responses(
        (status = 200, description = "Current session view", body = SessionView),
        (status = 409, description = "Not attached to a session")
    )
)]
pub async fn get_session(State(state): State<SharedState>) -> Result<Json<SessionView>, AppError> {
    let view = session_reader::get_snapshot(&state).await?;
    Ok(Json(view))
}

/// Start the game, or a new one after the previous game ended. Host only.
#[utoipa::path(
    post,
    path = "/session/start",
    tag = "session",
    request_body = StartSessionRequest,
    responses(
        (status = 200, description = "Game started", body = SessionView),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Game already running")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<StartSessionRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let view = turn_service::start_session(&state, payload.topic).await?;
    Ok(Json(view))
}

/// Insert one character into the sentence.
#[utoipa::path(
    post,
    path = "/session/moves",
    tag = "session",
    request_body = SubmitMoveRequest,
    responses(
        (status = 200, description = "Move recorded", body = SessionView),
        (status = 400, description = "Invalid character or position"),
        (status = 409, description = "Not this participant's turn")
    )
)]
pub async fn submit_move(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SubmitMoveRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let view = turn_service::submit_move(&state, payload.position, &payload.character).await?;
    Ok(Json(view))
}

/// React to the current move.
#[utoipa::path(
    post,
    path = "/session/evaluations",
    tag = "session",
    request_body = SubmitEvaluationRequest,
    responses(
        (status = 200, description = "Reaction recorded", body = SessionView),
        (status = 409, description = "Nothing to evaluate or already evaluated")
    )
)]
pub async fn submit_evaluation(
    State(state): State<SharedState>,
    Json(payload): Json<SubmitEvaluationRequest>,
) -> Result<Json<SessionView>, AppError> {
    let view = voting_service::submit_evaluation(&state, payload.kind).await?;
    Ok(Json(view))
}

/// Vote to withdraw the current move.
#[utoipa::path(
    post,
    path = "/session/votes",
    tag = "session",
    responses(
        (status = 200, description = "Vote recorded", body = SessionView),
        (status = 409, description = "Vote closed or already cast")
    )
)]
pub async fn submit_cancel_vote(
    State(state): State<SharedState>,
) -> Result<Json<SessionView>, AppError> {
    let view = voting_service::submit_cancel_vote(&state).await?;
    Ok(Json(view))
}

/// Return the session to the lobby.
#[utoipa::path(
    post,
    path = "/session/reset",
    tag = "session",
    responses((status = 200, description = "Session reset", body = SessionView))
)]
pub async fn reset_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionView>, AppError> {
    let view = turn_service::reset_session(&state).await?;
    Ok(Json(view))
}

/// Re-read the session from the store right away.
#[utoipa::path(
    post,
    path = "/session/refresh",
    tag = "session",
    responses(
        (status = 200, description = "Fresh session view", body = SessionView),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn refresh_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionView>, AppError> {
    let view = session_reader::refresh_view(&state).await?;
    Ok(Json(view))
}

/// Post-game summary, once the sentence reached its end length.
#[utoipa::path(
    get,
    path = "/session/statistics",
    tag = "session",
    responses(
        (status = 200, description = "Game statistics", body = StatisticsView),
        (status = 409, description = "Game not ended")
    )
)]
pub async fn get_statistics(
    State(state): State<SharedState>,
) -> Result<Json<StatisticsView>, AppError> {
    let view = statistics::get_statistics(&state).await?;
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::{
        config::EngineConfig, dao::game_store::memory::MemoryGameStore, routes, state::AppState,
    };

    async fn post_json(app: axum::Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn create_then_start_over_http() {
        let state =
            AppState::with_store(EngineConfig::default(), Arc::new(MemoryGameStore::new())).await;
        let app = routes::router(state);

        let (status, created) =
            post_json(app.clone(), "/sessions", r#"{"host_name":"alice"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["phase"], "lobby");
        assert_eq!(created["is_host"], true);

        let (status, started) =
            post_json(app.clone(), "/session/start", r#"{"topic":"abc"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["sentence"], "abc");
        assert_eq!(started["phase"], "awaiting_move");

        let (status, _) = post_json(
            app.clone(),
            "/session/moves",
            r#"{"position":0,"character":"xy"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post_json(app, "/session/votes", "").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn blank_host_name_is_rejected() {
        let state = AppState::new(EngineConfig::default());
        let (status, _) =
            post_json(routes::router(state), "/sessions", r#"{"host_name":"  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
