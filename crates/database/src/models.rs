//! BSON document models and conversions to the domain types.
//!
//! Kept separate from the domain structs so the storage encoding (BSON
//! datetimes, `_id`) never leaks into the services layer.

use bson::oid::ObjectId;
use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use services::buffers::{ChunkStatus, RealtimeBufferChunk};
use services::sessions::{Session, SessionMetadata, SessionStatus};

/// BSON datetimes for `Option<DateTime<Utc>>` fields.
mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(bson::DateTime::from_chrono).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<bson::DateTime>::deserialize(deserializer)?;
        Ok(value.map(|dt| dt.to_chrono()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub session_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub language: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub metadata: SessionMetadata,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        with = "opt_chrono_datetime_as_bson_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
}

impl From<&Session> for SessionDocument {
    fn from(session: &Session) -> Self {
        Self {
            id: None,
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            session_type: session.session_type.clone(),
            language: session.language.clone(),
            status: session.status,
            metadata: session.metadata.clone(),
            created_at: session.created_at,
            ended_at: session.ended_at,
            duration_seconds: session.duration_seconds,
        }
    }
}

impl From<SessionDocument> for Session {
    fn from(doc: SessionDocument) -> Self {
        Self {
            session_id: doc.session_id,
            user_id: doc.user_id,
            session_type: doc.session_type,
            language: doc.language,
            status: doc.status,
            metadata: doc.metadata,
            created_at: doc.created_at,
            ended_at: doc.ended_at,
            duration_seconds: doc.duration_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeBufferDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
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
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl From<&RealtimeBufferChunk> for RealtimeBufferDocument {
    fn from(chunk: &RealtimeBufferChunk) -> Self {
        Self {
            id: None,
            session_id: chunk.session_id.clone(),
            chunk_index: chunk.chunk_index,
            audio_url: chunk.audio_url.clone(),
            audio_base64: chunk.audio_base64.clone(),
            raw_text: chunk.raw_text.clone(),
            stt_status: chunk.stt_status,
            stt_confidence: chunk.stt_confidence,
            llm_status: chunk.llm_status,
            llm_response: chunk.llm_response.clone(),
            processing_time_ms: chunk.processing_time_ms,
            timestamp: chunk.timestamp,
            expires_at: chunk.expires_at,
        }
    }
}

impl From<RealtimeBufferDocument> for RealtimeBufferChunk {
    fn from(doc: RealtimeBufferDocument) -> Self {
        Self {
            session_id: doc.session_id,
            chunk_index: doc.chunk_index,
            audio_url: doc.audio_url,
            audio_base64: doc.audio_base64,
            raw_text: doc.raw_text,
            stt_status: doc.stt_status,
            stt_confidence: doc.stt_confidence,
            llm_status: doc.llm_status,
            llm_response: doc.llm_response,
            processing_time_ms: doc.processing_time_ms,
            timestamp: doc.timestamp,
            expires_at: doc.expires_at,
        }
    }
}
