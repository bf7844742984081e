//! Google Cloud Speech-to-Text backend.
//!
//! Synchronous `speech:recognize` calls over REST. Audio is LINEAR16 at
//! 16 kHz unless configured otherwise; the best-confidence alternative wins.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{SttError, SttProvider, Transcription};

const RECOGNIZE_URL: &str = "https://speech.googleapis.com/v1/speech:recognize";
const DEFAULT_LANGUAGE: &str = "en-US";

#[derive(Debug, Clone)]
pub struct GoogleSpeechConfig {
    pub api_key: Option<String>,
    pub encoding: String,
    pub sample_rate_hertz: i32,
    pub timeout_seconds: u64,
}

impl Default for GoogleSpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            encoding: "LINEAR16".to_string(),
            sample_rate_hertz: 16_000,
            timeout_seconds: 60,
        }
    }
}

pub struct GoogleSpeech {
    client: Client,
    config: GoogleSpeechConfig,
}

impl GoogleSpeech {
    pub fn new(config: GoogleSpeechConfig) -> Result<Self, SttError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SttError::RequestError(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest {
    config: RecognitionConfig,
    audio: RecognitionAudio,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig {
    encoding: String,
    sample_rate_hertz: i32,
    language_code: String,
    enable_automatic_punctuation: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionAudio {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeResult {
    #[serde(default)]
    alternatives: Vec<RecognizeAlternative>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

/// Pick the non-empty alternative with the highest confidence.
fn best_alternative(response: RecognizeResponse) -> Transcription {
    let mut best_text = String::new();
    let mut best_confidence = 0.0_f64;

    for result in response.results {
        for alternative in result.alternatives {
            if !alternative.transcript.is_empty() && alternative.confidence >= best_confidence {
                best_text = alternative.transcript;
                best_confidence = alternative.confidence;
            }
        }
    }

    Transcription {
        text: best_text,
        confidence: best_confidence,
    }
}

#[async_trait]
impl SttProvider for GoogleSpeech {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<Transcription, SttError> {
        let language_code = if language.is_empty() {
            DEFAULT_LANGUAGE
        } else {
            language
        };

        tracing::debug!(
            audio_len = audio.len(),
            language = language_code,
            "starting speech recognition"
        );

        let request = RecognizeRequest {
            config: RecognitionConfig {
                encoding: self.config.encoding.clone(),
                sample_rate_hertz: self.config.sample_rate_hertz,
                language_code: language_code.to_string(),
                enable_automatic_punctuation: true,
            },
            audio: RecognitionAudio {
                content: BASE64.encode(audio),
            },
        };

        let mut builder = self
            .client
            .post(RECOGNIZE_URL)
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("x-goog-api-key", api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SttError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error response body: {e}"));
            return Err(SttError::HttpError {
                status_code,
                message,
            });
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| SttError::ParseError(e.to_string()))?;

        Ok(best_alternative(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_alternative_prefers_highest_confidence() {
        let response: RecognizeResponse = serde_json::from_str(
            r#"{"results":[
                {"alternatives":[{"transcript":"low","confidence":0.4}]},
                {"alternatives":[{"transcript":"high","confidence":0.92},{"transcript":"","confidence":0.99}]}
            ]}"#,
        )
        .unwrap();

        let best = best_alternative(response);
        assert_eq!(best.text, "high");
        assert!((best.confidence - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_results_yield_empty_transcription() {
        let best = best_alternative(RecognizeResponse { results: vec![] });
        assert_eq!(best.text, "");
        assert_eq!(best.confidence, 0.0);
    }
}
