//! In-process fake providers for testing the worker pipeline without any
//! remote call. Both record the requests they receive so tests can assert on
//! them.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::{AnswerStream, LlmError, LlmProvider, SttError, SttProvider, Transcription};

/// Scriptable speech-to-text fake.
#[derive(Default)]
pub struct MockStt {
    transcript: Option<(String, f64)>,
    fail: bool,
    calls: Mutex<Vec<(usize, String)>>,
}

impl MockStt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with the given transcript and confidence.
    pub fn with_transcript(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            transcript: Some((text.into(), confidence)),
            ..Self::default()
        }
    }

    /// Fail every transcription call.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// The `(audio_len, language)` pairs seen so far.
    pub fn calls(&self) -> Vec<(usize, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SttProvider for MockStt {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<Transcription, SttError> {
        self.calls
            .lock()
            .unwrap()
            .push((audio.len(), language.to_string()));

        if self.fail {
            return Err(SttError::RequestError("mock stt failure".to_string()));
        }

        match &self.transcript {
            Some((text, confidence)) => Ok(Transcription {
                text: text.clone(),
                confidence: *confidence,
            }),
            None => Ok(Transcription {
                text: format!("transcribed({} bytes)", audio.len()),
                confidence: 0.9,
            }),
        }
    }
}

/// Scriptable streaming language-model fake.
#[derive(Default)]
pub struct MockLlm {
    fragments: Vec<String>,
    terminal_error: Option<String>,
    fail_on_start: bool,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    /// Stream the given fragments, then end successfully.
    pub fn with_fragments(fragments: Vec<&str>) -> Self {
        Self {
            fragments: fragments.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    /// Stream the given fragments, then signal a terminal error.
    pub fn failing_mid_stream(fragments: Vec<&str>, message: impl Into<String>) -> Self {
        Self {
            fragments: fragments.into_iter().map(str::to_string).collect(),
            terminal_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Fail before any fragment is produced.
    pub fn failing_on_start() -> Self {
        Self {
            fail_on_start: true,
            ..Self::default()
        }
    }

    /// The prompts seen so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn stream_answer(&self, prompt: &str) -> Result<AnswerStream, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if self.fail_on_start {
            return Err(LlmError::RequestError("mock llm failure".to_string()));
        }

        let mut items: Vec<Result<String, LlmError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.terminal_error {
            items.push(Err(LlmError::StreamError(message.clone())));
        }

        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn mock_llm_streams_fragments_then_ends() {
        let llm = MockLlm::with_fragments(vec!["Hi", " there"]);
        let mut stream = llm.stream_answer("prompt").await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "Hi");
        assert_eq!(stream.next().await.unwrap().unwrap(), " there");
        assert!(stream.next().await.is_none());
        assert_eq!(llm.prompts(), vec!["prompt"]);
    }

    #[tokio::test]
    async fn mock_llm_terminal_error_is_last_item() {
        let llm = MockLlm::failing_mid_stream(vec!["partial"], "boom");
        let mut stream = llm.stream_answer("prompt").await.unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn mock_stt_records_calls() {
        let stt = MockStt::with_transcript("hello", 0.95);
        let out = stt.transcribe(b"AAAA", "en-US").await.unwrap();

        assert_eq!(out.text, "hello");
        assert_eq!(stt.calls(), vec![(4, "en-US".to_string())]);
    }
}
