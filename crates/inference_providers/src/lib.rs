//! Speech-to-text and language-model providers for the realtime pipeline.
//!
//! This crate provides capability traits over the two remote services the
//! audio workers depend on, plus the concrete Google REST backends and an
//! in-process mock pair for tests.
//!
//! # Streaming-first LLM contract
//!
//! [`LlmProvider::stream_answer`] returns a lazy sequence of text fragments.
//! An `Err` item is terminal: no further fragments follow it. A stream that
//! ends without an `Err` completed successfully. Consumers are expected to
//! drain the stream and accumulate fragments as they arrive.

pub mod gemini;
pub mod google_speech;
pub mod mock;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

// Re-export commonly used types for convenience
pub use gemini::{VertexGemini, VertexGeminiConfig};
pub use google_speech::{GoogleSpeech, GoogleSpeechConfig};
pub use mock::{MockLlm, MockStt};

/// Result of one synchronous transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub confidence: f64,
}

/// Errors from speech-to-text backends
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("transcription request failed: {0}")]
    RequestError(String),
    #[error("transcription HTTP error {status_code}: {message}")]
    HttpError { status_code: u16, message: String },
    #[error("failed to parse transcription response: {0}")]
    ParseError(String),
}

/// Errors from language-model backends
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    RequestError(String),
    #[error("completion HTTP error {status_code}: {message}")]
    HttpError { status_code: u16, message: String },
    #[error("failed to parse completion stream: {0}")]
    ParseError(String),
    #[error("completion stream error: {0}")]
    StreamError(String),
}

/// Lazy sequence of answer fragments; an `Err` item terminates the stream.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Capability set of a speech-to-text service.
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe one audio payload in the given BCP-47 language.
    ///
    /// An empty `language` falls back to the backend default ("en-US").
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<Transcription, SttError>;
}

/// Capability set of a streaming language-model service.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Start a streamed completion for `prompt`.
    async fn stream_answer(&self, prompt: &str) -> Result<AnswerStream, LlmError>;
}
