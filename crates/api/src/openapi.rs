//! OpenAPI document for the REST surface.

use axum::response::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "YooSpeak Coaching API",
        description = "Realtime interview-coaching sessions and audio pipeline"
    ),
    paths(
        crate::routes::health::health_check,
        crate::routes::sessions::start_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::end_session,
        crate::routes::sessions::list_session_chunks,
    ),
    components(schemas(
        crate::models::ErrorResponse,
        crate::routes::health::HealthResponse,
        crate::routes::sessions::StartSessionRequest,
        crate::routes::sessions::StartSessionResponse,
        services::common::ErrorCode,
        services::sessions::Session,
        services::sessions::SessionMetadata,
        services::sessions::SessionStatus,
        services::buffers::RealtimeBufferChunk,
        services::buffers::ChunkStatus,
    )),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Sessions", description = "Session lifecycle and buffered chunks"),
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
