//! At-least-once consumer-group worker pool driving the STT -> LLM stream
//! pipeline.
//!
//! Every error path still acknowledges the claimed entry: the design prefers
//! losing a failed chunk to redelivering it unboundedly, so callers must
//! treat each chunk as best-effort. Failures surface to the client as
//! `status:failed` frames plus a buffer status transition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffers::{BufferService, ChunkStatus};
use crate::common::{ErrorCode, ServiceError};
use crate::realtime::{
    response_topic, status_topic, MessageBus, ServerFrame, StatusKind, WorkEntry, WorkItem, WorkLog,
};
use inference_providers::{LlmProvider, SttProvider};

const DEFAULT_NUM_WORKERS: usize = 5;
const DEFAULT_CONSUMER_PREFIX: &str = "c";

const READ_COUNT: usize = 10;
const READ_BLOCK: Duration = Duration::from_secs(5);
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Read cap applied when resolving `audio_url` payloads.
const MAX_AUDIO_FETCH_BYTES: usize = 10 * 1024 * 1024;

const COACH_PROMPT_PREFIX: &str =
    "You are an interview speaking coach. Reply concisely.\n\nUser said:\n";

#[derive(Clone)]
pub struct AudioWorkerPool {
    work_log: Arc<dyn WorkLog>,
    bus: Arc<dyn MessageBus>,
    buffers: Arc<BufferService>,
    stt: Arc<dyn SttProvider>,
    llm: Arc<dyn LlmProvider>,
    http: reqwest::Client,
    num_workers: usize,
    consumer_prefix: String,
}

impl AudioWorkerPool {
    /// A zero `num_workers` and an empty `consumer_prefix` fall back to the
    /// defaults (5 workers, prefix "c").
    pub fn new(
        work_log: Arc<dyn WorkLog>,
        bus: Arc<dyn MessageBus>,
        buffers: Arc<BufferService>,
        stt: Arc<dyn SttProvider>,
        llm: Arc<dyn LlmProvider>,
        num_workers: usize,
        consumer_prefix: &str,
    ) -> Self {
        Self {
            work_log,
            bus,
            buffers,
            stt,
            llm,
            http: reqwest::Client::new(),
            num_workers: if num_workers == 0 {
                DEFAULT_NUM_WORKERS
            } else {
                num_workers
            },
            consumer_prefix: if consumer_prefix.is_empty() {
                DEFAULT_CONSUMER_PREFIX.to_string()
            } else {
                consumer_prefix.to_string()
            },
        }
    }

    /// Ensure the consumer group exists and spawn the long-lived consumer
    /// tasks. Tasks run until `shutdown` is cancelled; in-flight chunks
    /// finish before a task exits.
    pub async fn start(
        &self,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, ServiceError> {
        const OP: &str = "AudioWorkerPool.Start";

        self.work_log.ensure_group().await.map_err(|e| {
            ServiceError::with_source(ErrorCode::Unavailable, OP, "failed to ensure group", e)
        })?;

        let mut handles = Vec::with_capacity(self.num_workers);
        for i in 1..=self.num_workers {
            let consumer = format!("{}-{}", self.consumer_prefix, i);
            let pool = self.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.run_consumer(consumer, token).await;
            }));
        }

        tracing::info!(num_workers = self.num_workers, "audio worker pool started");
        Ok(handles)
    }

    async fn run_consumer(&self, consumer: String, shutdown: CancellationToken) {
        tracing::info!(consumer = %consumer, "audio worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let entries = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.work_log.read_group(&consumer, READ_COUNT, READ_BLOCK) => {
                    match result {
                        Ok(entries) => entries,
                        Err(e) => {
                            tracing::warn!(consumer = %consumer, error = %e, "work log read failed");
                            tokio::time::sleep(READ_ERROR_BACKOFF).await;
                            continue;
                        }
                    }
                }
            };

            for entry in entries {
                self.handle_entry(&entry).await;
                // Ack regardless of the outcome.
                if let Err(e) = self.work_log.ack(&entry.id).await {
                    tracing::warn!(entry_id = %entry.id, error = %e, "failed to ack work entry");
                }
            }
        }

        tracing::info!(consumer = %consumer, "audio worker stopped");
    }

    async fn handle_entry(&self, entry: &WorkEntry) {
        let Some(item) = WorkItem::from_fields(&entry.fields) else {
            tracing::debug!(entry_id = %entry.id, "dropping malformed work entry");
            return;
        };
        self.process_chunk(&item).await;
    }

    /// The per-chunk pipeline: resolve audio, STT, then the streamed LLM
    /// answer, updating the buffer document and publishing along the way.
    async fn process_chunk(&self, item: &WorkItem) {
        let session_id = item.session_id.as_str();
        let chunk_index = item.chunk_index;
        let language = normalize_language(item.language.as_deref().unwrap_or(""));

        let audio = match self.resolve_audio(item).await {
            Ok(Some(audio)) => audio,
            Ok(None) => return,
            Err(message) => {
                self.publish_status(session_id, StatusKind::Failed, &message, Some(chunk_index))
                    .await;
                return;
            }
        };

        // STT leg
        self.mark_stt(session_id, chunk_index, "", 0.0, ChunkStatus::Processing)
            .await;
        self.publish_status(
            session_id,
            StatusKind::Processing,
            "stt processing",
            Some(chunk_index),
        )
        .await;

        let transcription = match self.stt.transcribe(&audio, &language).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(session_id, chunk_index, error = %e, "stt failed");
                self.mark_stt(session_id, chunk_index, "", 0.0, ChunkStatus::Failed)
                    .await;
                self.publish_status(
                    session_id,
                    StatusKind::Failed,
                    "stt failed",
                    Some(chunk_index),
                )
                .await;
                return;
            }
        };

        self.mark_stt(
            session_id,
            chunk_index,
            &transcription.text,
            transcription.confidence,
            ChunkStatus::Done,
        )
        .await;
        self.publish_frame(
            &response_topic(session_id),
            &ServerFrame::SttResult {
                chunk_index,
                text: transcription.text.clone(),
                confidence: transcription.confidence,
                is_final: true,
            },
        )
        .await;

        // LLM leg
        let started = Instant::now();
        self.mark_llm(session_id, chunk_index, "", ChunkStatus::Processing, 0)
            .await;
        self.publish_status(
            session_id,
            StatusKind::Processing,
            "llm processing",
            Some(chunk_index),
        )
        .await;

        let prompt = format!("{COACH_PROMPT_PREFIX}{}", transcription.text);
        let mut stream = match self.llm.stream_answer(&prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session_id, chunk_index, error = %e, "llm request failed");
                self.mark_llm(
                    session_id,
                    chunk_index,
                    "",
                    ChunkStatus::Failed,
                    started.elapsed().as_millis() as i64,
                )
                .await;
                self.publish_status(
                    session_id,
                    StatusKind::Failed,
                    "llm failed",
                    Some(chunk_index),
                )
                .await;
                return;
            }
        };

        let mut full_response = String::new();
        let mut seq: i64 = 0;
        let mut stream_error = None;

        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(chunk) => {
                    seq += 1;
                    full_response.push_str(&chunk);
                    self.publish_frame(
                        &response_topic(session_id),
                        &ServerFrame::LlmChunk {
                            chunk_index,
                            seq,
                            chunk,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    // Terminal by contract: no fragments follow an error.
                    stream_error = Some(e);
                    break;
                }
            }
        }

        let processing_time_ms = started.elapsed().as_millis() as i64;

        if let Some(e) = stream_error {
            tracing::warn!(session_id, chunk_index, error = %e, "llm stream failed");
            self.mark_llm(
                session_id,
                chunk_index,
                "",
                ChunkStatus::Failed,
                processing_time_ms,
            )
            .await;
            self.publish_status(
                session_id,
                StatusKind::Failed,
                "llm failed",
                Some(chunk_index),
            )
            .await;
            return;
        }

        self.mark_llm(
            session_id,
            chunk_index,
            &full_response,
            ChunkStatus::Done,
            processing_time_ms,
        )
        .await;
        self.publish_frame(
            &response_topic(session_id),
            &ServerFrame::LlmComplete {
                chunk_index,
                full_response,
                processing_time_ms,
            },
        )
        .await;
        self.publish_status(
            session_id,
            StatusKind::Done,
            "chunk processed",
            Some(chunk_index),
        )
        .await;

        tracing::debug!(session_id, chunk_index, processing_time_ms, "chunk processed");
    }

    /// Resolve the chunk's audio bytes. `Ok(None)` means no audio source was
    /// present and the item is dropped silently; `Err` carries the
    /// client-facing failure message.
    async fn resolve_audio(&self, item: &WorkItem) -> Result<Option<Vec<u8>>, String> {
        if let Some(encoded) = &item.audio_base64 {
            let payload = strip_data_url_prefix(encoded);
            return match BASE64.decode(payload) {
                Ok(audio) => Ok(Some(audio)),
                Err(_) => Err("invalid audio_base64".to_string()),
            };
        }

        if let Some(url) = &item.audio_url {
            let audio = self.fetch_audio(url).await?;
            if audio.is_empty() {
                return Err("empty audio".to_string());
            }
            return Ok(Some(audio));
        }

        Ok(None)
    }

    async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url, error = %e, "audio fetch failed");
                "failed to fetch audio".to_string()
            })?;

        if !response.status().is_success() {
            return Err("failed to fetch audio".to_string());
        }

        let mut audio = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::warn!(url, error = %e, "audio fetch failed mid-body");
                "failed to fetch audio".to_string()
            })?;
            let remaining = MAX_AUDIO_FETCH_BYTES - audio.len();
            if chunk.len() >= remaining {
                audio.extend_from_slice(&chunk[..remaining]);
                break;
            }
            audio.extend_from_slice(&chunk);
        }
        Ok(audio)
    }

    async fn mark_stt(
        &self,
        session_id: &str,
        chunk_index: i64,
        text: &str,
        confidence: f64,
        status: ChunkStatus,
    ) {
        if let Err(e) = self
            .buffers
            .mark_stt(session_id, chunk_index, text, confidence, status)
            .await
        {
            tracing::warn!(session_id, chunk_index, error = %e, "failed to mark stt status");
        }
    }

    async fn mark_llm(
        &self,
        session_id: &str,
        chunk_index: i64,
        response: &str,
        status: ChunkStatus,
        processing_ms: i64,
    ) {
        if let Err(e) = self
            .buffers
            .mark_llm(session_id, chunk_index, response, status, processing_ms)
            .await
        {
            tracing::warn!(session_id, chunk_index, error = %e, "failed to mark llm status");
        }
    }

    async fn publish_status(
        &self,
        session_id: &str,
        status: StatusKind,
        message: &str,
        chunk_index: Option<i64>,
    ) {
        self.publish_frame(
            &status_topic(session_id),
            &ServerFrame::Status {
                status,
                message: message.to_string(),
                chunk_index,
            },
        )
        .await;
    }

    async fn publish_frame(&self, channel: &str, frame: &ServerFrame) {
        let payload = match serde_json::to_string(frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise server frame");
                return;
            }
        };
        if let Err(e) = self.bus.publish(channel, &payload).await {
            tracing::warn!(channel, error = %e, "failed to publish frame");
        }
    }
}

/// Collapse the language tags the clients actually send onto the codes the
/// STT service expects; anything else passes through.
fn normalize_language(language: &str) -> String {
    match language {
        "id" | "id-ID" => "id-ID".to_string(),
        "en" | "en-US" | "" => "en-US".to_string(),
        other => other.to_string(),
    }
}

/// Strip an optional `data:<mime>;base64,` prefix from an audio payload.
fn strip_data_url_prefix(encoded: &str) -> &str {
    if encoded.starts_with("data:") {
        match encoded.split_once(',') {
            Some((_, payload)) => payload,
            None => encoded,
        }
    } else {
        encoded
    }
}
