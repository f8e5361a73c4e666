//! Text-to-speech proxy.
//!
//! Reads an extraction summary aloud through ElevenLabs. The API key stays on
//! the server; the browser only ever sees MP3 bytes or a short error. Vendor
//! and unexpected failures are flagged with `fallback: true`, telling it to use
//! the platform's built-in speech engine.

use crate::config::SpeechConfig;
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SpeechError {
    #[error("No text provided")]
    EmptyText,

    #[error("ElevenLabs API key not configured")]
    NotConfigured,

    /// Vendor answered 401. `missing_permissions` when the key is valid but the
    /// plan lacks text-to-speech access.
    #[error("ElevenLabs authentication failed (missing permissions: {missing_permissions})")]
    AuthFailure { missing_permissions: bool },

    #[error("ElevenLabs rate limit exceeded")]
    RateLimited,

    #[error("ElevenLabs rejected the request: {detail}")]
    InvalidRequest { detail: String },

    /// Any other non-success status.
    #[error("ElevenLabs returned {status}: {detail}")]
    UpstreamStatus { status: u16, detail: String },

    /// Transport failure or unreadable audio body.
    #[error("ElevenLabs unavailable: {0}")]
    Unavailable(String),
}

impl SpeechError {
    pub fn status_code(&self) -> u16 {
        match self {
            SpeechError::EmptyText | SpeechError::InvalidRequest { .. } => 400,
            SpeechError::AuthFailure { .. } => 401,
            SpeechError::RateLimited => 429,
            SpeechError::NotConfigured
            | SpeechError::UpstreamStatus { .. }
            | SpeechError::Unavailable(_) => 500,
        }
    }

    /// `false` only for the local checks made before the vendor is contacted
    /// (missing text, missing key).
    pub fn suggests_fallback(&self) -> bool {
        !matches!(self, SpeechError::EmptyText | SpeechError::NotConfigured)
    }

    /// Message safe to return to the caller.
    pub fn user_message(&self) -> &'static str {
        match self {
            SpeechError::EmptyText => "No text provided",
            SpeechError::NotConfigured => "ElevenLabs API key not configured",
            SpeechError::AuthFailure {
                missing_permissions: true,
            } => {
                "Your ElevenLabs account doesn't have text-to-speech permissions. \
                 Please check your subscription plan includes TTS access."
            }
            SpeechError::AuthFailure {
                missing_permissions: false,
            } => "Authentication failed. Please verify your API key is correct.",
            SpeechError::RateLimited => "Rate limit exceeded. Please try again later.",
            SpeechError::InvalidRequest { .. } => "Invalid request to ElevenLabs API.",
            SpeechError::UpstreamStatus { .. } => "Failed to generate audio from ElevenLabs",
            SpeechError::Unavailable(_) => "Failed to process text-to-speech request",
        }
    }
}

/// Interface implemented by speech-synthesis backends.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` and return MP3 bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError>;
}

/// [`SpeechSynthesizer`] backed by the ElevenLabs REST API.
pub struct ElevenLabsClient {
    http: Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    model_id: String,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Default, Deserialize)]
struct VendorError {
    #[serde(default)]
    detail: Option<VendorDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum VendorDetail {
    Structured {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Text(String),
    #[default]
    Other,
}

impl VendorError {
    fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }

    fn missing_permissions(&self) -> bool {
        matches!(
            &self.detail,
            Some(VendorDetail::Structured { status: Some(s), .. }) if s == "missing_permissions"
        )
    }

    fn message(&self, raw: &str) -> String {
        match &self.detail {
            Some(VendorDetail::Structured { message: Some(m), .. }) => m.clone(),
            Some(VendorDetail::Text(t)) => t.clone(),
            _ => raw.chars().take(200).collect(),
        }
    }
}

impl ElevenLabsClient {
    /// Build a client from `config`; fails if no API key is set.
    pub fn from_config(config: &SpeechConfig) -> Result<Self, ServiceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ServiceError::ProviderNotConfigured {
                provider: "elevenlabs".into(),
                hint: "Set ELEVENLABS_API_KEY or pass --elevenlabs-api-key.".into(),
            })?;
        let http = Client::builder()
            .user_agent(concat!("nahed-extract/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::ProviderNotConfigured {
                provider: "elevenlabs".into(),
                hint: format!("HTTP client construction failed: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            voice_settings: VoiceSettings {
                stability: config.stability,
                similarity_boost: config.similarity_boost,
            },
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/text-to-speech/{}", self.base_url, self.voice_id)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        if text.is_empty() {
            return Err(SpeechError::EmptyText);
        }
        debug!("Synthesizing {} chars with voice {}", text.len(), self.voice_id);

        let response = self
            .http
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&SynthesisRequest {
                text,
                model_id: &self.model_id,
                voice_settings: self.voice_settings,
            })
            .send()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("failed to reach ElevenLabs: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let vendor = VendorError::parse(&raw);
            warn!("ElevenLabs returned {}: {}", status, vendor.message(&raw));
            return Err(match status {
                StatusCode::UNAUTHORIZED => SpeechError::AuthFailure {
                    missing_permissions: vendor.missing_permissions(),
                },
                StatusCode::TOO_MANY_REQUESTS => SpeechError::RateLimited,
                StatusCode::BAD_REQUEST => SpeechError::InvalidRequest {
                    detail: vendor.message(&raw),
                },
                other => SpeechError::UpstreamStatus {
                    status: other.as_u16(),
                    detail: vendor.message(&raw),
                },
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("unreadable audio body: {e}")))?;
        debug!("Received {} bytes of audio", audio.len());
        Ok(audio.to_vec())
    }
}
