//! In-memory doubles for the repository and broker ports.
//!
//! Used by the unit tests in this crate and by api-level tests; none of
//! these talk to a real store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::buffers::{BufferRepository, ChunkStatus, RealtimeBufferChunk};
use crate::common::RepositoryError;
use crate::realtime::{BrokerError, MessageBus, Subscription, WorkEntry, WorkItem, WorkLog};
use crate::sessions::{Session, SessionRepository, SessionStatus};

// ==================== Sessions ====================

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn insert(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session);
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&session.session_id) {
            return Err(RepositoryError::AlreadyExists);
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_by_session_id(&self, session_id: &str) -> Result<Session, RepositoryError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))
    }

    async fn end(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<(), RepositoryError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.status = SessionStatus::Ended;
            session.ended_at = Some(ended_at);
            session.duration_seconds = duration_seconds;
        }
        Ok(())
    }

    async fn set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), RepositoryError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.status = status;
        }
        Ok(())
    }
}

// ==================== Buffers ====================

#[derive(Default)]
pub struct InMemoryBufferRepository {
    chunks: Mutex<Vec<RealtimeBufferChunk>>,
}

impl InMemoryBufferRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<RealtimeBufferChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn get(&self, session_id: &str, chunk_index: i64) -> Option<RealtimeBufferChunk> {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.session_id == session_id && c.chunk_index == chunk_index)
            .cloned()
    }
}

#[async_trait]
impl BufferRepository for InMemoryBufferRepository {
    async fn insert_chunk(&self, chunk: &RealtimeBufferChunk) -> Result<(), RepositoryError> {
        let mut chunks = self.chunks.lock().unwrap();
        if chunks
            .iter()
            .any(|c| c.session_id == chunk.session_id && c.chunk_index == chunk.chunk_index)
        {
            return Err(RepositoryError::AlreadyExists);
        }
        chunks.push(chunk.clone());
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
        // Mirrors an UpdateOne without upsert: no-op when the doc is gone.
        if let Some(chunk) = self
            .chunks
            .lock()
            .unwrap()
            .iter_mut()
            .find(|c| c.session_id == session_id && c.chunk_index == chunk_index)
        {
            chunk.raw_text = raw_text.to_string();
            chunk.stt_confidence = confidence;
            chunk.stt_status = status;
        }
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
        if let Some(chunk) = self
            .chunks
            .lock()
            .unwrap()
            .iter_mut()
            .find(|c| c.session_id == session_id && c.chunk_index == chunk_index)
        {
            chunk.llm_response = response.to_string();
            chunk.llm_status = status;
            chunk.processing_time_ms = processing_ms;
        }
        Ok(())
    }

    async fn list_by_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<RealtimeBufferChunk>, RepositoryError> {
        let limit = if limit <= 0 { 200 } else { limit } as usize;
        let mut chunks: Vec<RealtimeBufferChunk> = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        chunks.truncate(limit);
        Ok(chunks)
    }
}

// ==================== Work Log ====================

#[derive(Default)]
pub struct InMemoryWorkLog {
    entries: Mutex<VecDeque<WorkEntry>>,
    appended: Mutex<Vec<WorkItem>>,
    acked: Mutex<Vec<String>>,
    next_id: AtomicU64,
    fail_next_append: AtomicBool,
}

impl InMemoryWorkLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appended(&self) -> Vec<WorkItem> {
        self.appended.lock().unwrap().clone()
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn fail_next_append(&self) {
        self.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// Enqueue a raw field map, bypassing [`WorkItem`] validation. Lets
    /// tests exercise malformed entries.
    pub fn push_raw(&self, fields: &[(&str, &str)]) -> String {
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let entry = WorkEntry {
            id: id.clone(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.entries.lock().unwrap().push_back(entry);
        id
    }
}

#[async_trait]
impl WorkLog for InMemoryWorkLog {
    async fn ensure_group(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn append(&self, item: &WorkItem) -> Result<String, BrokerError> {
        if self.fail_next_append.swap(false, Ordering::SeqCst) {
            return Err(BrokerError::ConnectionFailed(
                "simulated append failure".to_string(),
            ));
        }

        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.entries.lock().unwrap().push_back(WorkEntry {
            id: id.clone(),
            fields: item.fields().into_iter().collect(),
        });
        self.appended.lock().unwrap().push(item.clone());
        Ok(id)
    }

    async fn read_group(
        &self,
        _consumer: &str,
        count: usize,
        _block: Duration,
    ) -> Result<Vec<WorkEntry>, BrokerError> {
        let mut out = Vec::new();
        {
            let mut entries = self.entries.lock().unwrap();
            while out.len() < count {
                match entries.pop_front() {
                    Some(entry) => out.push(entry),
                    None => break,
                }
            }
        }
        if out.is_empty() {
            // Simulated block timeout, shortened to keep tests fast.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(out)
    }

    async fn ack(&self, entry_id: &str) -> Result<(), BrokerError> {
        self.acked.lock().unwrap().push(entry_id.to_string());
        Ok(())
    }
}

// ==================== Message Bus ====================

pub struct InMemoryBus {
    published: Mutex<Vec<(String, String)>>,
    senders: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            senders: Mutex::new(HashMap::new()),
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.senders
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.to_string()));
        // No subscribers is fine.
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, BrokerError> {
        use futures_util::StreamExt;
        use tokio_stream::wrappers::BroadcastStream;

        let streams: Vec<_> = channels
            .iter()
            .map(|channel| BroadcastStream::new(self.sender(channel).subscribe()))
            .collect();

        let merged = futures::stream::select_all(streams)
            .filter_map(|item| async move { item.ok() });
        Ok(Box::pin(merged))
    }
}
