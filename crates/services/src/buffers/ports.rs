//! Realtime buffer chunk model and repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::RepositoryError;

/// Per-subsystem processing state of one chunk. Values progress forward
/// only; a done chunk never returns to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Processing => "processing",
            ChunkStatus::Done => "done",
            ChunkStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indexed slice of audio, the unit of work throughout the pipeline.
///
/// `(session_id, chunk_index)` is unique; the store physically deletes rows
/// past `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RealtimeBufferChunk {
    pub session_id: String,
    pub chunk_index: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,

    #[serde(default)]
    pub raw_text: String,
    pub stt_status: ChunkStatus,
    #[serde(default)]
    pub stt_confidence: f64,

    pub llm_status: ChunkStatus,
    #[serde(default)]
    pub llm_response: String,

    #[serde(default)]
    pub processing_time_ms: i64,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait BufferRepository: Send + Sync {
    async fn insert_chunk(&self, chunk: &RealtimeBufferChunk) -> Result<(), RepositoryError>;

    /// Partial update of the STT fields; never creates a document.
    async fn update_stt(
        &self,
        session_id: &str,
        chunk_index: i64,
        raw_text: &str,
        confidence: f64,
        status: ChunkStatus,
    ) -> Result<(), RepositoryError>;

    /// Partial update of the LLM fields; never creates a document.
    async fn update_llm(
        &self,
        session_id: &str,
        chunk_index: i64,
        response: &str,
        status: ChunkStatus,
        processing_ms: i64,
    ) -> Result<(), RepositoryError>;

    /// Chunks of one session ordered ascending by `chunk_index`.
    /// A non-positive limit falls back to the store default of 200.
    async fn list_by_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<RealtimeBufferChunk>, RepositoryError>;
}
