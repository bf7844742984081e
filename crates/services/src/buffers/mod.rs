//! Validated chunk operations over the realtime buffer store.

pub mod ports;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::common::{ErrorCode, ServiceError};
pub use ports::{BufferRepository, ChunkStatus, RealtimeBufferChunk};

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct BufferService {
    buffers: Arc<dyn BufferRepository>,
    ttl: chrono::Duration,
}

impl BufferService {
    /// A zero `ttl` falls back to the 24h default.
    pub fn new(buffers: Arc<dyn BufferRepository>, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
        let ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        Self { buffers, ttl }
    }

    /// Persist a fresh pending chunk stamped with the configured TTL.
    pub async fn insert_audio_chunk(
        &self,
        session_id: &str,
        chunk_index: i64,
        audio_url: Option<String>,
        audio_base64: Option<String>,
    ) -> Result<RealtimeBufferChunk, ServiceError> {
        const OP: &str = "BufferService.InsertAudioChunk";

        if session_id.is_empty() || chunk_index <= 0 {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "session_id is required and chunk_index must be > 0",
            ));
        }

        let now = Utc::now();
        let chunk = RealtimeBufferChunk {
            session_id: session_id.to_string(),
            chunk_index,
            audio_url,
            audio_base64,
            raw_text: String::new(),
            stt_status: ChunkStatus::Pending,
            stt_confidence: 0.0,
            llm_status: ChunkStatus::Pending,
            llm_response: String::new(),
            processing_time_ms: 0,
            timestamp: now,
            expires_at: now + self.ttl,
        };

        self.buffers.insert_chunk(&chunk).await.map_err(|e| {
            ServiceError::with_source(ErrorCode::Internal, OP, "failed to insert audio chunk", e)
        })?;
        Ok(chunk)
    }

    /// Move the chunk's STT state forward. `status` must be one of
    /// processing, done, failed.
    pub async fn mark_stt(
        &self,
        session_id: &str,
        chunk_index: i64,
        raw_text: &str,
        confidence: f64,
        status: ChunkStatus,
    ) -> Result<(), ServiceError> {
        const OP: &str = "BufferService.MarkSTT";

        if session_id.is_empty() || chunk_index <= 0 {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "session_id and chunk_index (>0) are required",
            ));
        }
        if status == ChunkStatus::Pending {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "status must be processing, done, or failed",
            ));
        }

        self.buffers
            .update_stt(session_id, chunk_index, raw_text, confidence, status)
            .await
            .map_err(|e| {
                ServiceError::with_source(ErrorCode::Internal, OP, "failed to update stt fields", e)
            })
    }

    /// Move the chunk's LLM state forward. Same status contract as
    /// [`BufferService::mark_stt`].
    pub async fn mark_llm(
        &self,
        session_id: &str,
        chunk_index: i64,
        response: &str,
        status: ChunkStatus,
        processing_ms: i64,
    ) -> Result<(), ServiceError> {
        const OP: &str = "BufferService.MarkLLM";

        if session_id.is_empty() || chunk_index <= 0 {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "session_id and chunk_index (>0) are required",
            ));
        }
        if status == ChunkStatus::Pending {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "status must be processing, done, or failed",
            ));
        }

        self.buffers
            .update_llm(session_id, chunk_index, response, status, processing_ms)
            .await
            .map_err(|e| {
                ServiceError::with_source(ErrorCode::Internal, OP, "failed to update llm fields", e)
            })
    }

    pub async fn list_by_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<RealtimeBufferChunk>, ServiceError> {
        const OP: &str = "BufferService.ListBySession";

        if session_id.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "session_id is required",
            ));
        }

        self.buffers
            .list_by_session(session_id, limit)
            .await
            .map_err(|e| {
                ServiceError::with_source(
                    ErrorCode::Internal,
                    OP,
                    "failed to list realtime buffer",
                    e,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InMemoryBufferRepository;

    fn service() -> (Arc<InMemoryBufferRepository>, BufferService) {
        let repo = Arc::new(InMemoryBufferRepository::new());
        let service = BufferService::new(repo.clone(), Duration::from_secs(3600));
        (repo, service)
    }

    #[tokio::test]
    async fn insert_creates_pending_chunk_with_ttl() {
        let (repo, service) = service();

        let chunk = service
            .insert_audio_chunk("s-1", 1, None, Some("AAAA".to_string()))
            .await
            .unwrap();

        assert_eq!(chunk.stt_status, ChunkStatus::Pending);
        assert_eq!(chunk.llm_status, ChunkStatus::Pending);
        assert_eq!(chunk.expires_at - chunk.timestamp, chrono::Duration::hours(1));
        assert!(repo.get("s-1", 1).is_some());
    }

    #[tokio::test]
    async fn insert_validates_arguments() {
        let (_, service) = service();

        let err = service
            .insert_audio_chunk("", 1, None, Some("AAAA".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);

        let err = service
            .insert_audio_chunk("s-1", 0, None, Some("AAAA".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn duplicate_chunk_is_surfaced_as_internal_and_not_duplicated() {
        let (repo, service) = service();

        service
            .insert_audio_chunk("s-1", 1, None, Some("AAAA".to_string()))
            .await
            .unwrap();
        let err = service
            .insert_audio_chunk("s-1", 1, None, Some("BBBB".to_string()))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(repo.chunks().len(), 1);
    }

    #[tokio::test]
    async fn mark_stt_rejects_pending() {
        let (_, service) = service();

        let err = service
            .mark_stt("s-1", 1, "", 0.0, ChunkStatus::Pending)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn mark_stt_updates_fields() {
        let (repo, service) = service();

        service
            .insert_audio_chunk("s-1", 1, None, Some("AAAA".to_string()))
            .await
            .unwrap();
        service
            .mark_stt("s-1", 1, "hello", 0.95, ChunkStatus::Done)
            .await
            .unwrap();

        let chunk = repo.get("s-1", 1).unwrap();
        assert_eq!(chunk.raw_text, "hello");
        assert_eq!(chunk.stt_status, ChunkStatus::Done);
        assert!((chunk.stt_confidence - 0.95).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn mark_llm_updates_fields() {
        let (repo, service) = service();

        service
            .insert_audio_chunk("s-1", 1, None, Some("AAAA".to_string()))
            .await
            .unwrap();
        service
            .mark_llm("s-1", 1, "an answer", ChunkStatus::Done, 120)
            .await
            .unwrap();

        let chunk = repo.get("s-1", 1).unwrap();
        assert_eq!(chunk.llm_response, "an answer");
        assert_eq!(chunk.llm_status, ChunkStatus::Done);
        assert_eq!(chunk.processing_time_ms, 120);
    }

    #[tokio::test]
    async fn list_returns_chunks_in_ascending_index_order() {
        let (_, service) = service();

        for index in [3, 1, 2] {
            service
                .insert_audio_chunk("s-1", index, None, Some("AAAA".to_string()))
                .await
                .unwrap();
        }

        let chunks = service.list_by_session("s-1", 0).await.unwrap();
        let indexes: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }
}
