use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use mongodb::Collection;

use services::common::RepositoryError;
use services::sessions::{Session, SessionRepository, SessionStatus};

use crate::models::SessionDocument;
use crate::mongo::{is_duplicate_key_error, Database};

pub struct MongoSessionRepository {
    col: Collection<SessionDocument>,
}

impl MongoSessionRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            col: db.sessions_collection(),
        }
    }
}

#[async_trait]
impl SessionRepository for MongoSessionRepository {
    async fn create(&self, session: &Session) -> Result<(), RepositoryError> {
        let doc = SessionDocument::from(session);
        self.col.insert_one(&doc).await.map_err(|e| {
            if is_duplicate_key_error(&e) {
                RepositoryError::AlreadyExists
            } else {
                RepositoryError::DatabaseError(e.into())
            }
        })?;
        Ok(())
    }

    async fn get_by_session_id(&self, session_id: &str) -> Result<Session, RepositoryError> {
        let doc = self
            .col
            .find_one(doc! { "session_id": session_id })
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?
            .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))?;
        Ok(doc.into())
    }

    async fn end(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<(), RepositoryError> {
        self.col
            .update_one(
                doc! { "session_id": session_id },
                doc! { "$set": {
                    "status": SessionStatus::Ended.as_str(),
                    "ended_at": mongodb::bson::DateTime::from_chrono(ended_at),
                    "duration_seconds": duration_seconds,
                }},
            )
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        Ok(())
    }

    async fn set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), RepositoryError> {
        self.col
            .update_one(
                doc! { "session_id": session_id },
                doc! { "$set": { "status": status.as_str() } },
            )
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        Ok(())
    }
}
