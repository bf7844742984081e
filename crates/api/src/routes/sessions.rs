//! Session lifecycle REST endpoints.
//!
//! Ownership is enforced here by comparing the session's owner with the
//! authenticated caller; the services below stay auth-agnostic.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::middleware::AuthenticatedUser;
use crate::models::{ApiError, ErrorResponse};
use crate::state::AppState;
use services::buffers::RealtimeBufferChunk;
use services::sessions::{Session, SessionMetadata, SessionStatus};
use services::{ErrorCode, ServiceError};

const DEFAULT_CHUNKS_LIMIT: i64 = 200;
const MAX_CHUNKS_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartSessionRequest {
    /// interview | casual
    #[serde(rename = "type")]
    pub session_type: String,
    /// e.g. "id" or "en"
    pub language: String,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

/// Start a new coaching session for the authenticated user.
#[utoipa::path(
    post,
    path = "/session/start",
    request_body = StartSessionRequest,
    responses(
        (status = 200, description = "Session created", body = StartSessionResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
    ),
    tag = "Sessions"
)]
pub async fn start_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    let session = state
        .sessions
        .start(
            &user.user_id,
            &request.session_type,
            &request.language,
            request.metadata,
        )
        .await?;

    Ok(Json(StartSessionResponse {
        session_id: session.session_id,
        status: session.status,
        created_at: session.created_at,
    }))
}

/// Fetch one session; owner only.
#[utoipa::path(
    get,
    path = "/session/{session_id}",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "The session", body = Session),
        (status = 403, description = "Not the session owner", body = ErrorResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse),
    ),
    tag = "Sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session =
        owned_session(&state, &session_id, &user.user_id, "SessionHandler.Get").await?;
    Ok(Json(session))
}

/// End a session; owner only, idempotent.
#[utoipa::path(
    post,
    path = "/session/{session_id}/end",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "The ended session", body = Session),
        (status = 403, description = "Not the session owner", body = ErrorResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse),
    ),
    tag = "Sessions"
)]
pub async fn end_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    owned_session(&state, &session_id, &user.user_id, "SessionHandler.End").await?;
    let ended = state.sessions.end(&session_id).await?;
    Ok(Json(ended))
}

#[derive(Debug, Deserialize)]
pub struct ListChunksQuery {
    pub limit: Option<i64>,
}

/// List the buffered chunks of one session, ascending by chunk index.
#[utoipa::path(
    get,
    path = "/session/{session_id}/chunks",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("limit" = Option<i64>, Query, description = "Max chunks to return (default 200, cap 1000)"),
    ),
    responses(
        (status = 200, description = "Buffered chunks", body = [RealtimeBufferChunk]),
        (status = 403, description = "Not the session owner", body = ErrorResponse),
        (status = 404, description = "Unknown session", body = ErrorResponse),
    ),
    tag = "Sessions"
)]
pub async fn list_session_chunks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<String>,
    Query(query): Query<ListChunksQuery>,
) -> Result<Json<Vec<RealtimeBufferChunk>>, ApiError> {
    owned_session(&state, &session_id, &user.user_id, "SessionHandler.ListChunks").await?;

    let limit = match query.limit {
        Some(limit) if limit > 0 => limit.min(MAX_CHUNKS_LIMIT),
        _ => DEFAULT_CHUNKS_LIMIT,
    };

    let chunks = state.buffers.list_by_session(&session_id, limit).await?;
    Ok(Json(chunks))
}

/// Load a session and enforce that `user_id` owns it.
pub(crate) async fn owned_session(
    state: &AppState,
    session_id: &str,
    user_id: &str,
    op: &'static str,
) -> Result<Session, ApiError> {
    let session = state.sessions.get(session_id).await?;
    if session.user_id != user_id {
        return Err(ServiceError::new(ErrorCode::Forbidden, op, "forbidden").into());
    }
    Ok(session)
}
