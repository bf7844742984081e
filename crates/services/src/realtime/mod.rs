//! Ingress-side realtime operations: chunk intake, control frames, and the
//! pub/sub fan-out subscription used by the session socket.

pub mod ports;

use std::sync::Arc;

use chrono::Utc;

use crate::buffers::BufferService;
use crate::common::{ErrorCode, ServiceError};
use crate::sessions::{Session, SessionService};
pub use ports::{
    response_topic, status_topic, BrokerError, ClientFrame, MessageBus, ServerFrame, StatusKind,
    Subscription, WorkEntry, WorkItem, WorkLog,
};

pub struct RealtimeService {
    sessions: Arc<SessionService>,
    buffers: Arc<BufferService>,
    work_log: Arc<dyn WorkLog>,
    bus: Arc<dyn MessageBus>,
}

impl RealtimeService {
    pub fn new(
        sessions: Arc<SessionService>,
        buffers: Arc<BufferService>,
        work_log: Arc<dyn WorkLog>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            sessions,
            buffers,
            work_log,
            bus,
        }
    }

    /// Subscribe to both fan-out topics of one session.
    pub async fn subscribe(&self, session_id: &str) -> Result<Subscription, ServiceError> {
        const OP: &str = "RealtimeService.Subscribe";

        self.bus
            .subscribe(&[response_topic(session_id), status_topic(session_id)])
            .await
            .map_err(|e| {
                ServiceError::with_source(ErrorCode::Unavailable, OP, "failed to subscribe", e)
            })
    }

    /// Intake one audio chunk: persist a pending buffer document, append a
    /// work item to the log, and acknowledge with `status:processing`.
    ///
    /// The session document is not touched.
    pub async fn ingest_chunk(
        &self,
        session: &Session,
        chunk_index: i64,
        audio_base64: Option<String>,
        audio_url: Option<String>,
        is_final: bool,
    ) -> Result<(), ServiceError> {
        const OP: &str = "RealtimeService.IngestChunk";

        if chunk_index <= 0 {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "chunk_index must be > 0",
            ));
        }
        if audio_base64.is_none() && audio_url.is_none() {
            return Err(ServiceError::new(
                ErrorCode::InvalidArgument,
                OP,
                "audio_base64 or audio_url required",
            ));
        }

        self.buffers
            .insert_audio_chunk(
                &session.session_id,
                chunk_index,
                audio_url.clone(),
                audio_base64.clone(),
            )
            .await?;

        let item = WorkItem {
            session_id: session.session_id.clone(),
            chunk_index,
            is_final,
            ts_unix: Utc::now().timestamp(),
            language: Some(session.language.clone()),
            audio_base64,
            audio_url,
        };

        self.work_log.append(&item).await.map_err(|e| {
            ServiceError::with_source(ErrorCode::Unavailable, OP, "failed to enqueue audio", e)
        })?;

        self.publish_status(
            &session.session_id,
            StatusKind::Processing,
            "audio chunk queued",
            Some(chunk_index),
        )
        .await;

        tracing::debug!(
            session_id = %session.session_id,
            chunk_index,
            is_final,
            "audio chunk queued"
        );
        Ok(())
    }

    pub async fn pause(&self, session_id: &str) {
        self.publish_status(session_id, StatusKind::Paused, "paused", None)
            .await;
    }

    pub async fn resume(&self, session_id: &str) {
        self.publish_status(session_id, StatusKind::Ready, "resumed", None)
            .await;
    }

    /// End the session and tell every subscriber.
    pub async fn end_session(&self, session_id: &str) -> Result<Session, ServiceError> {
        let session = self.sessions.end(session_id).await?;
        self.publish_status(session_id, StatusKind::Ended, "session ended", None)
            .await;
        Ok(session)
    }

    /// Best-effort status publication; a lost status frame is not worth
    /// failing the connection over.
    async fn publish_status(
        &self,
        session_id: &str,
        status: StatusKind,
        message: &str,
        chunk_index: Option<i64>,
    ) {
        let frame = ServerFrame::Status {
            status,
            message: message.to_string(),
            chunk_index,
        };
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise status frame");
                return;
            }
        };
        if let Err(e) = self.bus.publish(&status_topic(session_id), &payload).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to publish status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{SessionMetadata, SessionStatus};
    use crate::test_utils::{
        InMemoryBufferRepository, InMemoryBus, InMemorySessionRepository, InMemoryWorkLog,
    };
    use std::time::Duration;

    struct Fixture {
        buffer_repo: Arc<InMemoryBufferRepository>,
        work_log: Arc<InMemoryWorkLog>,
        bus: Arc<InMemoryBus>,
        service: RealtimeService,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let session_repo = Arc::new(InMemorySessionRepository::new());
        let buffer_repo = Arc::new(InMemoryBufferRepository::new());
        let work_log = Arc::new(InMemoryWorkLog::new());
        let bus = Arc::new(InMemoryBus::new());

        let sessions = Arc::new(SessionService::new(session_repo.clone()));
        let buffers = Arc::new(BufferService::new(
            buffer_repo.clone(),
            Duration::from_secs(3600),
        ));
        let session = sessions
            .start("user-1", "interview", "en", SessionMetadata::default())
            .await
            .unwrap();

        let service = RealtimeService::new(sessions, buffers, work_log.clone(), bus.clone());
        Fixture {
            buffer_repo,
            work_log,
            bus,
            service,
            session,
        }
    }

    #[tokio::test]
    async fn accepted_chunk_creates_buffer_doc_work_entry_and_ack() {
        let f = fixture().await;

        f.service
            .ingest_chunk(&f.session, 1, Some("AAAA".to_string()), None, false)
            .await
            .unwrap();

        // exactly one pending buffer document
        let chunks = f.buffer_repo.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].session_id, f.session.session_id);
        assert_eq!(chunks[0].chunk_index, 1);
        assert_eq!(chunks[0].stt_status, crate::buffers::ChunkStatus::Pending);

        // exactly one matching work entry, carrying the session language
        let items = f.work_log.appended();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].session_id, f.session.session_id);
        assert_eq!(items[0].chunk_index, 1);
        assert_eq!(items[0].language.as_deref(), Some("en"));

        // immediate processing ack on the status topic
        let acks = f.bus.published_on(&status_topic(&f.session.session_id));
        assert_eq!(acks.len(), 1);
        assert!(acks[0].contains(r#""status":"processing""#));
        assert!(acks[0].contains(r#""message":"audio chunk queued""#));
        assert!(acks[0].contains(r#""chunk_index":1"#));
    }

    #[tokio::test]
    async fn zero_chunk_index_is_rejected_without_side_effects() {
        let f = fixture().await;

        let err = f
            .service
            .ingest_chunk(&f.session, 0, Some("x".to_string()), None, false)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.message, "chunk_index must be > 0");
        assert!(f.buffer_repo.chunks().is_empty());
        assert!(f.work_log.appended().is_empty());
        assert!(f.bus.published().is_empty());
    }

    #[tokio::test]
    async fn missing_audio_source_is_rejected() {
        let f = fixture().await;

        let err = f
            .service
            .ingest_chunk(&f.session, 2, None, None, false)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.message, "audio_base64 or audio_url required");
        assert!(f.buffer_repo.chunks().is_empty());
        assert!(f.work_log.appended().is_empty());
    }

    #[tokio::test]
    async fn both_audio_sources_are_accepted() {
        let f = fixture().await;

        f.service
            .ingest_chunk(
                &f.session,
                1,
                Some("AAAA".to_string()),
                Some("https://blob/1.wav".to_string()),
                false,
            )
            .await
            .unwrap();

        let items = f.work_log.appended();
        assert_eq!(items[0].audio_base64.as_deref(), Some("AAAA"));
        assert_eq!(items[0].audio_url.as_deref(), Some("https://blob/1.wav"));
    }

    #[tokio::test]
    async fn enqueue_failure_is_unavailable() {
        let f = fixture().await;
        f.work_log.fail_next_append();

        let err = f
            .service
            .ingest_chunk(&f.session, 1, Some("AAAA".to_string()), None, false)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::Unavailable);
        assert_eq!(err.message, "failed to enqueue audio");
    }

    #[tokio::test]
    async fn control_frames_publish_status() {
        let f = fixture().await;
        let topic = status_topic(&f.session.session_id);

        f.service.pause(&f.session.session_id).await;
        f.service.resume(&f.session.session_id).await;

        let published = f.bus.published_on(&topic);
        assert!(published[0].contains(r#""status":"paused""#));
        assert!(published[1].contains(r#""status":"ready""#));
    }

    #[tokio::test]
    async fn end_session_ends_and_publishes() {
        let f = fixture().await;

        let ended = f.service.end_session(&f.session.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);

        let published = f.bus.published_on(&status_topic(&f.session.session_id));
        assert!(published.last().unwrap().contains(r#""status":"ended""#));
    }

    #[tokio::test]
    async fn subscription_receives_published_frames() {
        use futures_util::StreamExt;

        let f = fixture().await;
        let mut sub = f.service.subscribe(&f.session.session_id).await.unwrap();

        f.service.pause(&f.session.session_id).await;

        let payload = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert!(payload.contains(r#""status":"paused""#));
    }
}
