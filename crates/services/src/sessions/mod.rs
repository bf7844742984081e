//! Validated lifecycle operations over the session store.

pub mod ports;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::common::{ErrorCode, RepositoryError, ServiceError};
pub use ports::{Session, SessionMetadata, SessionRepository, SessionStatus};

pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
}

impl SessionService {
    pub fn new(sessions: Arc<dyn SessionRepository>) -> Self {
        Self { sessions }
    }

    /// Create a fresh active session owned by `user_id`.
    pub async fn start(
        &self,
        user_id: &str,
        session_type: &str,
        language: &str,
        metadata: SessionMetadata,
    ) -> Result<Session, ServiceError> {
        const OP: &str = "SessionService.Start";

        if user_id.is_empty() || session_type.is_empty() || language.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "user_id, type, and language are required",
            ));
        }

        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_type: session_type.to_string(),
            language: language.to_string(),
            status: SessionStatus::Active,
            metadata,
            created_at: Utc::now(),
            ended_at: None,
            duration_seconds: 0,
        };

        self.sessions.create(&session).await.map_err(|e| {
            ServiceError::with_source(ErrorCode::Internal, OP, "failed to create session", e)
        })?;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            session_type = %session.session_type,
            "session started"
        );
        Ok(session)
    }

    /// Fetch a session by id. Callers enforce ownership by comparing
    /// `Session.user_id` with the authenticated caller.
    pub async fn get(&self, session_id: &str) -> Result<Session, ServiceError> {
        const OP: &str = "SessionService.Get";

        if session_id.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "session_id is required",
            ));
        }

        match self.sessions.get_by_session_id(session_id).await {
            Ok(session) => Ok(session),
            Err(RepositoryError::NotFound(_)) => Err(ServiceError::new(
                ErrorCode::NotFound,
                OP,
                "session not found",
            )),
            Err(e) => Err(ServiceError::with_source(
                ErrorCode::Internal,
                OP,
                "failed to get session",
                e,
            )),
        }
    }

    /// End a session, computing its duration from `created_at`.
    ///
    /// Idempotent: ending an already-ended session recomputes the final
    /// state from the same `created_at`, so the duration never decreases.
    pub async fn end(&self, session_id: &str) -> Result<Session, ServiceError> {
        const OP: &str = "SessionService.End";

        let mut session = self.get(session_id).await?;

        let now = Utc::now();
        let duration_seconds = (now - session.created_at).num_seconds().max(0);

        self.sessions
            .end(session_id, now, duration_seconds)
            .await
            .map_err(|e| {
                ServiceError::with_source(ErrorCode::Internal, OP, "failed to end session", e)
            })?;

        session.status = SessionStatus::Ended;
        session.ended_at = Some(now);
        session.duration_seconds = duration_seconds;

        tracing::info!(session_id = %session.session_id, duration_seconds, "session ended");
        Ok(session)
    }

    /// Used for paused/active transitions.
    pub async fn set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), ServiceError> {
        const OP: &str = "SessionService.SetStatus";

        if session_id.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "session_id is required",
            ));
        }

        self.sessions
            .set_status(session_id, status)
            .await
            .map_err(|e| {
                ServiceError::with_source(ErrorCode::Internal, OP, "failed to set status", e)
            })
    }
}
