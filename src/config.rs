//! Service configuration.
//!
//! Everything the extraction service needs at startup lives in
//! [`ServiceConfig`], built via [`ServiceConfigBuilder`]. The config is only
//! read while wiring the service: [`ServiceConfig::build_invoker`] and
//! [`ServiceConfig::build_speech`] turn it into the long-lived clients that
//! `main` injects into the HTTP state.

use crate::error::ServiceError;
use crate::pipeline::gemini::{GeminiInvoker, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use crate::pipeline::llm::{ModelInvoker, ProviderInvoker};
use crate::speech::{ElevenLabsClient, SpeechSynthesizer};
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default upload cap: 20 MiB, the inline-data limit of the Gemini API.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub const DEFAULT_ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
pub const DEFAULT_SPEECH_MODEL: &str = "eleven_multilingual_v2";

/// Which model backend answers extraction requests.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backend {
    /// Direct Gemini REST call. (default)
    #[default]
    Gemini,
    /// Any provider known to `edgequake_llm` ("openai", "anthropic", "ollama", ...).
    Provider(String),
}

impl Backend {
    /// Parse a CLI/env value. `"gemini"` (any case) or empty selects Gemini.
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("gemini") {
            Backend::Gemini
        } else {
            Backend::Provider(name.to_ascii_lowercase())
        }
    }
}

/// Configuration of the extraction service.
///
/// # Example
/// ```rust
/// use nahed_extract::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .gemini_api_key("AIza...")
///     .temperature(0.0)
///     .build()
///     .unwrap();
/// assert_eq!(config.model, "gemini-2.0-flash");
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    pub backend: Backend,

    /// Model identifier sent to the backend. Default: `gemini-2.0-flash`.
    pub model: String,

    /// Pre-constructed provider. Takes precedence over `backend`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction is transcription, not generation; keep it near zero.
    pub temperature: f32,

    /// Output token cap. Default: 8192.
    ///
    /// A fully populated record with long free-text fields runs to roughly
    /// 1 500 tokens; the headroom covers verbose models that pad strings.
    pub max_tokens: usize,

    /// Transport timeout for one model call. Default: none.
    pub api_timeout: Option<Duration>,

    /// Largest accepted upload in bytes. Default: 20 MiB.
    pub max_upload_bytes: usize,

    pub speech: SpeechConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            provider: None,
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            temperature: 0.1,
            max_tokens: 8192,
            api_timeout: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            speech: SpeechConfig::default(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("gemini_base_url", &self.gemini_base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout", &self.api_timeout)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("speech", &self.speech)
            .finish()
    }
}

fn redact(key: &Option<String>) -> Option<&'static str> {
    key.as_ref().map(|_| "<redacted>")
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Construct the model invoker, from most-specific to least-specific:
    ///
    /// 1. **Pre-built provider** (`provider`): used as-is, e.g. a mock in tests.
    /// 2. **Named provider** (`Backend::Provider`): created through
    ///    [`ProviderFactory::create_llm_provider`], which reads that vendor's
    ///    API key from the environment.
    /// 3. **Gemini** (`Backend::Gemini`): requires `gemini_api_key`.
    pub fn build_invoker(&self) -> Result<Arc<dyn ModelInvoker>, ServiceError> {
        if let Some(ref provider) = self.provider {
            info!("Using pre-built LLM provider with model {}", self.model);
            return Ok(Arc::new(ProviderInvoker::new(
                Arc::clone(provider),
                &self.model,
                self.temperature,
                self.max_tokens,
            )));
        }

        match &self.backend {
            Backend::Provider(name) => {
                let provider = ProviderFactory::create_llm_provider(name, &self.model).map_err(|e| {
                    ServiceError::ProviderNotConfigured {
                        provider: name.clone(),
                        hint: format!("{e}"),
                    }
                })?;
                info!("Using {} provider with model {}", name, self.model);
                Ok(Arc::new(ProviderInvoker::new(
                    provider,
                    &self.model,
                    self.temperature,
                    self.max_tokens,
                )))
            }
            Backend::Gemini => {
                let key = self
                    .gemini_api_key
                    .as_deref()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| ServiceError::ProviderNotConfigured {
                        provider: "gemini".into(),
                        hint: "Set GOOGLE_GEMINI_API_KEY or pass --gemini-api-key.".into(),
                    })?;
                info!("Using Gemini REST backend with model {}", self.model);
                let invoker =
                    GeminiInvoker::new(key, &self.model, &self.gemini_base_url, self.api_timeout)?
                        .with_generation(self.temperature, self.max_tokens);
                Ok(Arc::new(invoker))
            }
        }
    }

    /// Construct the speech client, or `None` when no API key is configured.
    ///
    /// The service still starts without one; `/api/tts` then answers 500
    /// "ElevenLabs API key not configured".
    pub fn build_speech(&self) -> Result<Option<Arc<dyn SpeechSynthesizer>>, ServiceError> {
        if self.speech.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Ok(None);
        }
        let client = ElevenLabsClient::from_config(&self.speech)?;
        Ok(Some(Arc::new(client)))
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.gemini_api_key = Some(key.into());
        self
    }

    pub fn gemini_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.gemini_base_url = url.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n.max(256);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn speech(mut self, speech: SpeechConfig) -> Self {
        self.config.speech = speech;
        self
    }

    pub fn elevenlabs_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.speech.api_key = Some(key.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(ServiceError::InvalidConfig("model must not be empty".into()));
        }
        if c.max_upload_bytes == 0 {
            return Err(ServiceError::InvalidConfig(
                "max upload size must be ≥ 1 byte".into(),
            ));
        }
        if !c.gemini_base_url.starts_with("http://") && !c.gemini_base_url.starts_with("https://") {
            return Err(ServiceError::InvalidConfig(format!(
                "Gemini base URL must be http(s), got '{}'",
                c.gemini_base_url
            )));
        }
        c.speech.validate()?;
        Ok(self.config)
    }
}

/// Settings of the text-to-speech proxy.
#[derive(Clone, PartialEq)]
pub struct SpeechConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub voice_id: String,
    pub model_id: String,
    /// Voice stability, 0–1. Default: 0.5.
    pub stability: f32,
    /// Similarity boost, 0–1. Default: 0.75.
    pub similarity_boost: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_ELEVENLABS_BASE_URL.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            model_id: DEFAULT_SPEECH_MODEL.to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

impl fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("stability", &self.stability)
            .field("similarity_boost", &self.similarity_boost)
            .finish()
    }
}

impl SpeechConfig {
    fn validate(&self) -> Result<(), ServiceError> {
        let ranged = [
            ("stability", self.stability),
            ("similarity boost", self.similarity_boost),
        ];
        for (name, v) in ranged {
            if !(0.0..=1.0).contains(&v) {
                return Err(ServiceError::InvalidConfig(format!(
                    "speech {name} must be 0–1, got {v}"
                )));
            }
        }
        if self.voice_id.trim().is_empty() {
            return Err(ServiceError::InvalidConfig("voice id must not be empty".into()));
        }
        Ok(())
    }
}
