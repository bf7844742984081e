//! Vertex Gemini backend.
//!
//! Streams completions from Google's Gemini API over
//! `:streamGenerateContent?alt=sse`. When a project id and location are
//! configured the regional Vertex endpoint is used, otherwise the request
//! goes to the Generative Language API endpoint. Authentication is an API
//! key sent as `x-goog-api-key`.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::sse::SseDataStream;
use crate::{AnswerStream, LlmError, LlmProvider};

const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct VertexGeminiConfig {
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for VertexGeminiConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: None,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_seconds: 120,
        }
    }
}

/// Gemini provider - handles HTTP communication with Google's Gemini API
pub struct VertexGemini {
    client: Client,
    config: VertexGeminiConfig,
}

impl VertexGemini {
    pub fn new(mut config: VertexGeminiConfig) -> Result<Self, LlmError> {
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.to_string();
        }

        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| LlmError::RequestError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn stream_url(&self) -> String {
        match (&self.config.project_id, &self.config.location) {
            (Some(project), Some(location)) => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:streamGenerateContent?alt=sse",
                model = self.config.model,
            ),
            _ => format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:streamGenerateContent?alt=sse",
                model = self.config.model,
            ),
        }
    }

    fn build_headers(&self) -> Result<reqwest::header::HeaderMap, LlmError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Content-Type",
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(api_key) = &self.config.api_key {
            headers.insert(
                "x-goog-api-key",
                reqwest::header::HeaderValue::from_str(api_key)
                    .map_err(|e| LlmError::RequestError(format!("Invalid API key: {e}")))?,
            );
        }
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiRequestPart>,
}

#[derive(Debug, Serialize)]
struct GeminiRequestPart {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponsePart {
    text: Option<String>,
}

/// Extract the concatenated candidate text from one SSE event payload.
fn extract_fragment(data: &str) -> Result<String, LlmError> {
    let response: GeminiStreamResponse = serde_json::from_str(data)
        .map_err(|e| LlmError::ParseError(format!("invalid stream event: {e}")))?;

    let mut fragment = String::new();
    for candidate in response.candidates {
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if let Some(text) = part.text {
                fragment.push_str(&text);
            }
        }
    }
    Ok(fragment)
}

#[async_trait]
impl LlmProvider for VertexGemini {
    async fn stream_answer(&self, prompt: &str) -> Result<AnswerStream, LlmError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiRequestPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        tracing::debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            "starting gemini stream"
        );

        let response = self
            .client
            .post(self.stream_url())
            .headers(self.build_headers()?)
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error response body: {e}"));
            return Err(LlmError::HttpError {
                status_code,
                message,
            });
        }

        let fragments = SseDataStream::new(response.bytes_stream())
            .map(|event| event.and_then(|data| extract_fragment(&data)))
            .filter_map(|fragment| async move {
                match fragment {
                    Ok(text) if text.is_empty() => None,
                    other => Some(other),
                }
            });

        Ok(Box::pin(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_candidate_text() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hello"},{"text":" there"}],"role":"model"}}]}"#;
        assert_eq!(extract_fragment(data).unwrap(), "Hello there");
    }

    #[test]
    fn tolerates_empty_candidates() {
        assert_eq!(extract_fragment("{}").unwrap(), "");
    }

    #[test]
    fn rejects_malformed_event() {
        assert!(matches!(
            extract_fragment("not json"),
            Err(LlmError::ParseError(_))
        ));
    }

    #[test]
    fn regional_endpoint_when_project_configured() {
        let provider = VertexGemini::new(VertexGeminiConfig {
            project_id: Some("demo".to_string()),
            location: Some("us-central1".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert!(provider
            .stream_url()
            .starts_with("https://us-central1-aiplatform.googleapis.com/v1/projects/demo/"));
    }

    #[test]
    fn falls_back_to_generative_language_endpoint() {
        let provider = VertexGemini::new(VertexGeminiConfig::default()).unwrap();
        assert!(provider
            .stream_url()
            .starts_with("https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash"));
    }
}
