//! Error types for the nahed-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`]: **Per-request**: one uploaded document could not be
//!   turned into a [`crate::schema::PatientRecord`] (wrong file type, model
//!   unreachable, unusable answer). Every variant maps to exactly one
//!   [`OutcomeCategory`] and one short user-facing message, so nothing the
//!   vendor or the model said ever reaches the end user.
//!
//! * [`ServiceError`]: **Fatal**: the service cannot start or be wired up
//!   (invalid configuration, missing API key, port already bound).
//!
//! Speech-synthesis failures live in [`crate::speech::SpeechError`]; the core
//! pipeline never depends on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// All failures of a single extraction request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Declared MIME type is outside the accepted set. No model call is made.
    #[error("Unsupported media type '{mime}' (supported: PDF, JPEG, PNG, GIF, WebP)")]
    UnsupportedMediaType { mime: String },

    // ── Upstream errors ───────────────────────────────────────────────────
    /// The model endpoint could not be reached or its response could not be read.
    #[error("Model '{model}' unavailable: {detail}")]
    ModelUnavailable { model: String, detail: String },

    /// The provider answered with a non-success status or refused the request.
    #[error("Model '{model}' rejected the request{}: {detail}", status_suffix(.status))]
    ModelRejected {
        model: String,
        status: Option<u16>,
        detail: String,
    },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The model's answer contains no `{ … }` span at all.
    #[error("No JSON object found in model response")]
    NoJsonFound,

    /// A `{ … }` span was found but is not valid JSON.
    #[error("Model response contains malformed JSON: {detail}")]
    MalformedJson { detail: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Machine-readable tag for an [`ExtractError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedMediaType,
    ModelUnavailable,
    ModelRejected,
    NoJsonFound,
    MalformedJson,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnsupportedMediaType => "UnsupportedMediaType",
            ErrorKind::ModelUnavailable => "ModelUnavailable",
            ErrorKind::ModelRejected => "ModelRejected",
            ErrorKind::NoJsonFound => "NoJsonFound",
            ErrorKind::MalformedJson => "MalformedJson",
        };
        f.write_str(s)
    }
}

/// The three failure outcomes of the Result Classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeCategory {
    /// Client error, caught before any network call.
    RejectedInput,
    /// The model call itself failed.
    UpstreamFailure,
    /// The model answered but its answer could not be trusted as structured data.
    ExtractionFailure,
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::UnsupportedMediaType { .. } => ErrorKind::UnsupportedMediaType,
            ExtractError::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            ExtractError::ModelRejected { .. } => ErrorKind::ModelRejected,
            ExtractError::NoJsonFound => ErrorKind::NoJsonFound,
            ExtractError::MalformedJson { .. } => ErrorKind::MalformedJson,
        }
    }

    pub fn category(&self) -> OutcomeCategory {
        match self.kind() {
            ErrorKind::UnsupportedMediaType => OutcomeCategory::RejectedInput,
            ErrorKind::ModelUnavailable | ErrorKind::ModelRejected => {
                OutcomeCategory::UpstreamFailure
            }
            ErrorKind::NoJsonFound | ErrorKind::MalformedJson => OutcomeCategory::ExtractionFailure,
        }
    }

    /// HTTP-style status: 400 for rejected input, 500 for everything else.
    pub fn status_code(&self) -> u16 {
        match self.category() {
            OutcomeCategory::RejectedInput => 400,
            OutcomeCategory::UpstreamFailure | OutcomeCategory::ExtractionFailure => 500,
        }
    }

    /// Short, non-technical message safe to show to an end user.
    ///
    /// Depends only on the category; vendor detail and model output stay in
    /// the logs.
    pub fn user_message(&self) -> &'static str {
        match self.category() {
            OutcomeCategory::RejectedInput => {
                "Unsupported file type. Supported types: PDF, JPEG, PNG, GIF, WebP"
            }
            OutcomeCategory::UpstreamFailure => "Failed to analyze medical report",
            OutcomeCategory::ExtractionFailure => "Failed to parse medical data from report",
        }
    }
}

/// The `{kind, message}` shape of a failed extraction, safe to hand to a
/// caller: `message` is the user-facing text, never vendor or model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ExtractError> for ErrorReport {
    fn from(e: &ExtractError) -> Self {
        Self {
            kind: e.kind(),
            message: e.user_message().to_string(),
        }
    }
}

/// Fatal errors raised while configuring or starting the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The selected model backend cannot be constructed (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Binding or serving the HTTP listener failed.
    #[error("Server error on '{addr}': {source}")]
    Server {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_input_maps_to_400() {
        let e = ExtractError::UnsupportedMediaType {
            mime: "text/plain".into(),
        };
        assert_eq!(e.status_code(), 400);
        assert_eq!(e.category(), OutcomeCategory::RejectedInput);
        assert!(e.to_string().contains("text/plain"));
        assert!(e.user_message().contains("WebP"));
    }

    #[test]
    fn upstream_and_extraction_map_to_500() {
        let errors = [
            ExtractError::ModelUnavailable {
                model: "gemini-2.0-flash".into(),
                detail: "connection refused".into(),
            },
            ExtractError::ModelRejected {
                model: "gemini-2.0-flash".into(),
                status: Some(403),
                detail: "API key invalid".into(),
            },
            ExtractError::NoJsonFound,
            ExtractError::MalformedJson {
                detail: "EOF while parsing".into(),
            },
        ];
        for e in errors {
            assert_eq!(e.status_code(), 500, "{e}");
        }
    }

    #[test]
    fn user_message_never_leaks_detail() {
        let e = ExtractError::ModelRejected {
            model: "gemini-2.0-flash".into(),
            status: Some(429),
            detail: "quota exceeded for project 1234".into(),
        };
        assert!(!e.user_message().contains("1234"));
        assert_eq!(e.user_message(), "Failed to analyze medical report");
    }

    #[test]
    fn model_rejected_display_with_status() {
        let e = ExtractError::ModelRejected {
            model: "m".into(),
            status: Some(503),
            detail: "overloaded".into(),
        };
        assert!(e.to_string().contains("HTTP 503"), "got: {e}");
    }

    #[test]
    fn model_rejected_display_without_status() {
        let e = ExtractError::ModelRejected {
            model: "m".into(),
            status: None,
            detail: "blocked: SAFETY".into(),
        };
        let msg = e.to_string();
        assert!(!msg.contains("HTTP"), "got: {msg}");
        assert!(msg.contains("SAFETY"));
    }

    #[test]
    fn error_report_uses_user_message() {
        let e = ExtractError::MalformedJson {
            detail: "expected value at line 1 column 16".into(),
        };
        let report = ErrorReport::from(&e);
        assert_eq!(report.kind, ErrorKind::MalformedJson);
        assert_eq!(report.message, "Failed to parse medical data from report");
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["kind"], "MalformedJson");
    }

    #[test]
    fn kind_display_matches_variant_name() {
        assert_eq!(ErrorKind::NoJsonFound.to_string(), "NoJsonFound");
        assert_eq!(
            ExtractError::MalformedJson { detail: "x".into() }.kind(),
            ErrorKind::MalformedJson
        );
    }
}
