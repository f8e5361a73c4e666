//! Model invocation: one multimodal call per uploaded document.
//!
//! [`ModelInvoker`] is the seam between the pipeline and a concrete vendor.
//! Implementations send the prompt text and the encoded document as two parts
//! of a single user message, wait for the whole answer, and return its text.
//!
//! ## At most once
//!
//! There is no retry loop here: a request is attempted exactly
//! once, and a transport failure surfaces as
//! [`ExtractError::ModelUnavailable`] for the caller to retry if it wants to.
//! Answers are not cached either, so two uploads of the same file cause two
//! calls.
//!
//! Two backends ship with the crate:
//! * [`crate::pipeline::gemini::GeminiInvoker`]: direct REST call, native PDF support
//! * [`ProviderInvoker`]: any `edgequake_llm` provider (OpenAI, Anthropic, Ollama, …)

use crate::error::ExtractError;
use crate::pipeline::encode::EncodedDocument;
use crate::prompts::extraction_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// The model's input payload: fixed prompt plus one encoded document.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    prompt: &'static str,
    document: EncodedDocument,
}

impl ExtractionRequest {
    /// Pair the extraction prompt with an encoded document.
    pub fn new(document: EncodedDocument) -> Self {
        Self {
            prompt: extraction_prompt(),
            document,
        }
    }

    pub fn prompt(&self) -> &str {
        self.prompt
    }

    pub fn document(&self) -> &EncodedDocument {
        &self.document
    }
}

/// Performs the single model call of an extraction.
///
/// Implementations must be stateless with respect to requests: the same
/// invoker is shared by every concurrent extraction.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Model identifier used in logs and error messages.
    fn model(&self) -> &str;

    /// Send `request` and return the model's raw text answer.
    ///
    /// # Errors
    /// * [`ExtractError::ModelUnavailable`]: the endpoint could not be reached
    ///   or its response could not be read
    /// * [`ExtractError::ModelRejected`]: the provider returned a non-success
    ///   status or declined to answer
    async fn invoke(&self, request: &ExtractionRequest) -> Result<String, ExtractError>;
}

/// [`ModelInvoker`] backed by an `edgequake_llm` provider.
///
/// The document travels as an image attachment of the user message. Not every
/// provider accepts `application/pdf` there; prefer the Gemini backend for
/// PDF uploads.
pub struct ProviderInvoker {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: CompletionOptions,
}

impl ProviderInvoker {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl ModelInvoker for ProviderInvoker {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: &ExtractionRequest) -> Result<String, ExtractError> {
        let start = Instant::now();
        let doc = request.document();
        if !doc.media_type.is_image() {
            warn!(
                "Sending {} to '{}' as an image attachment; the provider may not accept it",
                doc.media_type, self.model
            );
        }

        let messages = vec![ChatMessage::user_with_images(
            request.prompt(),
            vec![ImageData::new(doc.data.clone(), doc.media_type.as_mime())],
        )];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| classify_provider_error(&self.model, e))?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.model,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(response.content)
    }
}

/// Network-level provider failures are "unavailable"; everything else the
/// provider reported (auth, quota, content filter, bad request) is a rejection.
fn classify_provider_error(model: &str, e: LlmError) -> ExtractError {
    match e {
        LlmError::NetworkError(detail) => ExtractError::ModelUnavailable {
            model: model.to_string(),
            detail,
        },
        LlmError::Timeout => ExtractError::ModelUnavailable {
            model: model.to_string(),
            detail: "request timed out".to_string(),
        },
        other => ExtractError::ModelRejected {
            model: model.to_string(),
            status: None,
            detail: other.to_string(),
        },
    }
}
