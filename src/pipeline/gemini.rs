//! Gemini `generateContent` backend.
//!
//! Gemini accepts PDFs and images as `inlineData` parts next to the text
//! prompt, so the uploaded document is forwarded untouched (no rasterisation).
//! The call is a plain REST request over the shared `reqwest::Client`; the
//! client is built once per process and reused by every request.
//!
//! Status mapping:
//! * connection / read failure or an undecodable body → `ModelUnavailable`
//! * any non-2xx status → `ModelRejected { status }`
//! * 2xx without answer text (safety block, empty candidate) → `ModelRejected { status: None }`

use crate::error::{ExtractError, ServiceError};
use crate::pipeline::llm::{ExtractionRequest, ModelInvoker};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// [`ModelInvoker`] calling the Gemini REST API directly.
pub struct GeminiInvoker {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: usize,
}

impl GeminiInvoker {
    /// Build an invoker. `timeout` bounds each call when set; by default the
    /// call waits as long as the server keeps the connection open.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ServiceError> {
        let mut builder =
            Client::builder().user_agent(concat!("nahed-extract/", env!("CARGO_PKG_VERSION")));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder.build().map_err(|e| ServiceError::ProviderNotConfigured {
            provider: "gemini".into(),
            hint: format!("HTTP client construction failed: {e}"),
        })?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.1,
            max_output_tokens: 8192,
        })
    }

    pub fn with_generation(mut self, temperature: f32, max_output_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn unavailable(&self, detail: String) -> ExtractError {
        ExtractError::ModelUnavailable {
            model: self.model.clone(),
            detail,
        }
    }

    fn rejected(&self, status: Option<u16>, detail: String) -> ExtractError {
        ExtractError::ModelRejected {
            model: self.model.clone(),
            status,
            detail,
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 2],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(&'a str),
    InlineData(InlineData<'a>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'static str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn answer_text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }

    fn refusal_reason(&self) -> String {
        let blocked = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref());
        if let Some(reason) = blocked {
            return format!("prompt blocked: {reason}");
        }
        match self.candidates.first() {
            None => "no candidates returned".to_string(),
            Some(c) => format!(
                "empty answer (finish reason {})",
                c.finish_reason.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

#[async_trait]
impl ModelInvoker for GeminiInvoker {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: &ExtractionRequest) -> Result<String, ExtractError> {
        let start = Instant::now();
        let doc = request.document();
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [
                    Part::Text(request.prompt()),
                    Part::InlineData(InlineData {
                        mime_type: doc.media_type.as_mime(),
                        data: &doc.data,
                    }),
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.unavailable("request timed out".to_string())
                } else {
                    self.unavailable(format!("failed to reach {}: {e}", self.base_url))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|env| format!("{} {}", env.error.status, env.error.message).trim().to_string())
                .unwrap_or(raw);
            return Err(self.rejected(Some(status.as_u16()), detail));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("unreadable response body: {e}")))?;

        if let Some(usage) = &parsed.usage_metadata {
            debug!(
                "{}: {} input tokens, {} output tokens, {:?}",
                self.model,
                usage.prompt_token_count,
                usage.candidates_token_count,
                start.elapsed()
            );
        }

        parsed
            .answer_text()
            .ok_or_else(|| self.rejected(None, parsed.refusal_reason()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::{EncodedDocument, MediaType};
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn request() -> ExtractionRequest {
        ExtractionRequest::new(EncodedDocument {
            media_type: MediaType::Pdf,
            data: "JVBERi0xLjc=".into(),
            byte_len: 8,
        })
    }

    fn invoker(base_url: String) -> GeminiInvoker {
        GeminiInvoker::new("test-key", DEFAULT_GEMINI_MODEL, base_url, None).expect("client")
    }

    #[tokio::test]
    async fn sends_prompt_and_inline_document_in_one_message() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash:generateContent")
                    .header("x-goog-api-key", "test-key")
                    .body_contains("\"inlineData\":{\"mimeType\":\"application/pdf\",\"data\":\"JVBERi0xLjc=\"}")
                    .body_contains("medical data extraction specialist");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": {"parts": [{"text": "{\"patient_id\":"}, {"text": "\"NAHED-2024-001\"}"}]},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 1200, "candidatesTokenCount": 300}
                }));
            })
            .await;

        let text = invoker(server.base_url()).invoke(&request()).await.expect("answer");

        mock.assert_async().await;
        assert_eq!(text, "{\"patient_id\":\"NAHED-2024-001\"}");
    }

    #[tokio::test]
    async fn error_status_is_rejection_with_vendor_detail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(403).json_body(json!({
                    "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
                }));
            })
            .await;

        let err = invoker(server.base_url()).invoke(&request()).await.unwrap_err();
        match err {
            ExtractError::ModelRejected { status, detail, .. } => {
                assert_eq!(status, Some(403));
                assert!(detail.contains("API key not valid"), "got: {detail}");
            }
            other => panic!("expected ModelRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocked_prompt_is_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200)
                    .json_body(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
            })
            .await;

        let err = invoker(server.base_url()).invoke(&request()).await.unwrap_err();
        assert!(
            matches!(&err, ExtractError::ModelRejected { status: None, detail, .. } if detail.contains("SAFETY")),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn undecodable_body_is_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).body("<html>gateway</html>");
            })
            .await;

        let err = invoker(server.base_url()).invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ExtractError::ModelUnavailable { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        // Port 9 (discard) is closed on test hosts.
        let err = invoker("http://127.0.0.1:9".into()).invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ExtractError::ModelUnavailable { .. }), "got {err:?}");
    }

    #[test]
    fn part_serialisation_matches_rest_shape() {
        let v = serde_json::to_value(Part::InlineData(InlineData {
            mime_type: "image/png",
            data: "AA==",
        }))
        .unwrap();
        assert_eq!(v, json!({"inlineData": {"mimeType": "image/png", "data": "AA=="}}));
        let v = serde_json::to_value(Part::Text("hi")).unwrap();
        assert_eq!(v, json!({"text": "hi"}));
    }
}
