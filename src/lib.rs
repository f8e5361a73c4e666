//! # nahed-extract
//!
//! Turn an uploaded medical report (PDF or image) into a structured
//! [`PatientRecord`] by asking a multimodal LLM to read it.
//!
//! Scanned pathology reports, lab sheets and referral letters rarely share a
//! layout, so instead of templates the document is handed to a vision model
//! together with a schema-describing prompt, and the JSON it answers with is
//! salvaged and shaped into the record.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (bytes + MIME)
//!  │
//!  ├─ 1. Encode   MIME gate (PDF, JPEG, PNG, GIF, WebP) → base64
//!  ├─ 2. Prompt   one fixed, versioned extraction prompt
//!  ├─ 3. Invoke   single model call (Gemini REST or any edgequake-llm provider)
//!  ├─ 4. Recover  first `{` … last `}` → serde_json::Value
//!  └─ 5. Classify Success / RejectedInput / UpstreamFailure / ExtractionFailure
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nahed_extract::{extract, ServiceConfig, UploadedDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .gemini_api_key(std::env::var("GOOGLE_GEMINI_API_KEY")?)
//!         .build()?;
//!     let invoker = config.build_invoker()?;
//!
//!     let bytes = std::fs::read("pathology.pdf")?;
//!     let outcome = extract(invoker.as_ref(), UploadedDocument::new(bytes, "application/pdf")).await;
//!     println!("{} {}", outcome.status_code(), outcome.to_body());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `nahed` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod server;
pub mod speech;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Backend, ServiceConfig, ServiceConfigBuilder, SpeechConfig};
pub use error::{ErrorKind, ErrorReport, ExtractError, OutcomeCategory, ServiceError};
pub use extract::{document_from_path, extract, extract_batch, Outcome};
pub use pipeline::encode::{encode, EncodedDocument, MediaType, UploadedDocument};
pub use pipeline::gemini::GeminiInvoker;
pub use pipeline::llm::{ExtractionRequest, ModelInvoker, ProviderInvoker};
pub use pipeline::recover::recover_json;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{ConformanceIssue, PatientRecord};
pub use server::{create_router, AppState};
pub use speech::{ElevenLabsClient, SpeechError, SpeechSynthesizer};
