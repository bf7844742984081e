//! Wire protocol and broker ports for the realtime session pipeline.
//!
//! All frames are UTF-8 JSON text frames with a `type` discriminator. The
//! socket writer never inspects payloads beyond forwarding bytes; these
//! types exist for the producers (ingress, workers) and for tests.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::common::ErrorCode;

// ==================== Client Frames ====================

/// Frames sent from client to server on the session socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    AudioChunk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default)]
        chunk_index: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_base64: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_url: Option<String>,
        #[serde(default)]
        is_final: bool,
    },
    Pause,
    Resume,
    EndSession,
}

// ==================== Server Frames ====================

/// Control-frame status kinds published on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Processing,
    Paused,
    Ready,
    Ended,
    Failed,
    Done,
}

/// Frames sent from server to client, either via pub/sub fan-out or inline
/// on the socket (`Error`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    SttResult {
        chunk_index: i64,
        text: String,
        confidence: f64,
        is_final: bool,
    },
    LlmChunk {
        chunk_index: i64,
        seq: i64,
        chunk: String,
    },
    LlmComplete {
        chunk_index: i64,
        full_response: String,
        processing_time_ms: i64,
    },
    Status {
        status: StatusKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_index: Option<i64>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

// ==================== Work Log ====================

/// One unit of work enqueued by the ingress and claimed by a worker.
///
/// Lives on the work log as a string-to-string field map.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub session_id: String,
    pub chunk_index: i64,
    pub is_final: bool,
    pub ts_unix: i64,
    pub language: Option<String>,
    pub audio_base64: Option<String>,
    pub audio_url: Option<String>,
}

impl WorkItem {
    /// Field map as stored on the stream.
    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("session_id".to_string(), self.session_id.clone()),
            ("chunk_index".to_string(), self.chunk_index.to_string()),
            ("is_final".to_string(), self.is_final.to_string()),
            ("ts_unix".to_string(), self.ts_unix.to_string()),
        ];
        if let Some(language) = &self.language {
            fields.push(("language".to_string(), language.clone()));
        }
        if let Some(audio_base64) = &self.audio_base64 {
            fields.push(("audio_base64".to_string(), audio_base64.clone()));
        }
        if let Some(audio_url) = &self.audio_url {
            fields.push(("audio_url".to_string(), audio_url.clone()));
        }
        fields
    }

    /// Parse a stream entry. `None` when `session_id` or `chunk_index` is
    /// missing or unparseable; such entries cannot be retried usefully.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let session_id = fields.get("session_id")?.clone();
        if session_id.is_empty() {
            return None;
        }
        let chunk_index = fields.get("chunk_index")?.parse::<i64>().ok()?;

        Some(Self {
            session_id,
            chunk_index,
            is_final: fields.get("is_final").map(|v| v == "true").unwrap_or(false),
            ts_unix: fields
                .get("ts_unix")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            language: fields.get("language").cloned(),
            audio_base64: fields.get("audio_base64").cloned(),
            audio_url: fields.get("audio_url").cloned(),
        })
    }
}

/// A claimed stream entry: the broker-assigned id plus the raw field map.
#[derive(Debug, Clone)]
pub struct WorkEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

// ==================== Broker Ports ====================

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    ConnectionFailed(String),
    #[error("broker operation error: {0}")]
    OperationError(#[source] anyhow::Error),
}

/// Append-only consumer-group stream used as the durable queue between
/// ingress and workers. At-least-once delivery; an entry is owned by exactly
/// one consumer after a claim and destroyed on acknowledgement.
#[async_trait]
pub trait WorkLog: Send + Sync {
    /// Idempotently create the consumer group.
    async fn ensure_group(&self) -> Result<(), BrokerError>;

    /// Append one item; returns the broker-assigned entry id.
    async fn append(&self, item: &WorkItem) -> Result<String, BrokerError>;

    /// Claim up to `count` never-delivered entries for `consumer`, blocking
    /// up to `block`. An empty vec means the read timed out with no data.
    async fn read_group(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<WorkEntry>, BrokerError>;

    /// Acknowledge one claimed entry.
    async fn ack(&self, entry_id: &str) -> Result<(), BrokerError>;
}

/// Payload stream of a pub/sub subscription.
pub type Subscription = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Per-channel pub/sub bus re-uniting worker output with the originating
/// socket.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;

    /// Subscribe to the given channels; the subscription is released when
    /// the returned stream is dropped.
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, BrokerError>;
}

/// Data-frame topic of one session (stt_result, llm_chunk, llm_complete).
pub fn response_topic(session_id: &str) -> String {
    format!("session:{session_id}:response")
}

/// Control-frame topic of one session (status frames).
pub fn status_topic(session_id: &str) -> String {
    format!("session:{session_id}:status")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_deserialize_by_type_tag() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"audio_chunk","session_id":"s-1","chunk_index":1,"audio_base64":"AAAA","is_final":false}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::AudioChunk {
                chunk_index,
                audio_base64,
                audio_url,
                is_final,
                ..
            } => {
                assert_eq!(chunk_index, 1);
                assert_eq!(audio_base64.as_deref(), Some("AAAA"));
                assert_eq!(audio_url, None);
                assert!(!is_final);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"pause"}"#).unwrap(),
            ClientFrame::Pause
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"end_session"}"#).unwrap(),
            ClientFrame::EndSession
        ));
    }

    #[test]
    fn unknown_client_frame_type_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"upload_cv"}"#).is_err());
    }

    #[test]
    fn server_frames_serialize_in_wire_form() {
        let status = ServerFrame::Status {
            status: StatusKind::Processing,
            message: "audio chunk queued".to_string(),
            chunk_index: Some(1),
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"type":"status","status":"processing","message":"audio chunk queued","chunk_index":1}"#
        );

        let error = ServerFrame::Error {
            code: ErrorCode::InvalidArgument,
            message: "invalid json".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"type":"error","code":"INVALID_ARGUMENT","message":"invalid json"}"#
        );

        let stt = ServerFrame::SttResult {
            chunk_index: 1,
            text: "hello".to_string(),
            confidence: 0.95,
            is_final: true,
        };
        assert_eq!(
            serde_json::to_string(&stt).unwrap(),
            r#"{"type":"stt_result","chunk_index":1,"text":"hello","confidence":0.95,"is_final":true}"#
        );
    }

    #[test]
    fn work_item_round_trips_through_fields() {
        let item = WorkItem {
            session_id: "s-1".to_string(),
            chunk_index: 7,
            is_final: true,
            ts_unix: 1_700_000_000,
            language: Some("en-US".to_string()),
            audio_base64: Some("AAAA".to_string()),
            audio_url: None,
        };

        let map: HashMap<String, String> = item.fields().into_iter().collect();
        assert_eq!(WorkItem::from_fields(&map).unwrap(), item);
    }

    #[test]
    fn malformed_work_entries_are_rejected() {
        let mut fields = HashMap::new();
        fields.insert("chunk_index".to_string(), "1".to_string());
        assert!(WorkItem::from_fields(&fields).is_none());

        fields.insert("session_id".to_string(), "s-1".to_string());
        fields.insert("chunk_index".to_string(), "not-a-number".to_string());
        assert!(WorkItem::from_fields(&fields).is_none());
    }

    #[test]
    fn topics_follow_the_session_naming_scheme() {
        assert_eq!(response_topic("abc"), "session:abc:response");
        assert_eq!(status_topic("abc"), "session:abc:status");
    }
}
