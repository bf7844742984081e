use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Collection;

use services::buffers::{BufferRepository, ChunkStatus, RealtimeBufferChunk};
use services::common::RepositoryError;

use crate::models::RealtimeBufferDocument;
use crate::mongo::{is_duplicate_key_error, Database};

const DEFAULT_LIST_LIMIT: i64 = 200;

pub struct MongoBufferRepository {
    col: Collection<RealtimeBufferDocument>,
}

impl MongoBufferRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            col: db.buffer_collection(),
        }
    }
}

#[async_trait]
impl BufferRepository for MongoBufferRepository {
    async fn insert_chunk(&self, chunk: &RealtimeBufferChunk) -> Result<(), RepositoryError> {
        let doc = RealtimeBufferDocument::from(chunk);
        self.col.insert_one(&doc).await.map_err(|e| {
            if is_duplicate_key_error(&e) {
                RepositoryError::AlreadyExists
            } else {
                RepositoryError::DatabaseError(e.into())
            }
        })?;
        Ok(())
    }

    async fn update_stt(
        &self,
        session_id: &str,
        chunk_index: i64,
        raw_text: &str,
        confidence: f64,
        status: ChunkStatus,
    ) -> Result<(), RepositoryError> {
        self.col
            .update_one(
                doc! { "session_id": session_id, "chunk_index": chunk_index },
                doc! { "$set": {
                    "raw_text": raw_text,
                    "stt_confidence": confidence,
                    "stt_status": status.as_str(),
                }},
            )
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        Ok(())
    }

    async fn update_llm(
        &self,
        session_id: &str,
        chunk_index: i64,
        response: &str,
        status: ChunkStatus,
        processing_ms: i64,
    ) -> Result<(), RepositoryError> {
        self.col
            .update_one(
                doc! { "session_id": session_id, "chunk_index": chunk_index },
                doc! { "$set": {
                    "llm_response": response,
                    "llm_status": status.as_str(),
                    "processing_time_ms": processing_ms,
                }},
            )
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?;
        Ok(())
    }

    async fn list_by_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<RealtimeBufferChunk>, RepositoryError> {
        let limit = if limit <= 0 { DEFAULT_LIST_LIMIT } else { limit };

        let cursor = self
            .col
            .find(doc! { "session_id": session_id })
            .sort(doc! { "chunk_index": 1 })
            .limit(limit)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?;

        let docs: Vec<RealtimeBufferDocument> = cursor
            .try_collect()
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?;

        Ok(docs.into_iter().map(Into::into).collect())
    }
}
