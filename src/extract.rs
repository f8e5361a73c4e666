//! Extraction entry points and the result classifier.
//!
//! [`extract`] runs one uploaded document through the whole pipeline and
//! always returns an [`Outcome`]. Every failure is caught here and classified
//! into one of three categories; nothing propagates past this boundary.
//!
//! ```text
//!                    ┌──────────────┐ Err ──▶ RejectedInput      (400, no model call)
//! UploadedDocument ─▶│ encode       │
//!                    └──────┬───────┘
//!                    ┌──────▼───────┐ Err ──▶ UpstreamFailure    (500)
//!                    │ model invoke │
//!                    └──────┬───────┘
//!                    ┌──────▼───────┐ Err ──▶ ExtractionFailure  (500, raw text logged only)
//!                    │ recover JSON │
//!                    └──────┬───────┘
//!                           ▼
//!                    Success(PatientRecord)
//! ```
//!
//! The pipeline keeps no state between calls: concurrent extractions share
//! only the `&dyn ModelInvoker`, and the document bytes are dropped as soon as
//! the request payload has been built.

use crate::error::{ErrorReport, ExtractError, OutcomeCategory};
use crate::pipeline::encode::{self, MediaType, UploadedDocument};
use crate::pipeline::llm::{ExtractionRequest, ModelInvoker};
use crate::pipeline::recover;
use crate::progress::ProgressCallback;
use crate::prompts::PROMPT_VERSION;
use crate::schema::PatientRecord;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Terminal state of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Box<PatientRecord>),
    /// Encoder refused the document (`UnsupportedMediaType`).
    RejectedInput(ExtractError),
    /// The model call failed (`ModelUnavailable` / `ModelRejected`).
    UpstreamFailure(ExtractError),
    /// The answer held no usable JSON (`NoJsonFound` / `MalformedJson`).
    ExtractionFailure(ExtractError),
}

impl From<Result<PatientRecord, ExtractError>> for Outcome {
    fn from(result: Result<PatientRecord, ExtractError>) -> Self {
        match result {
            Ok(record) => Outcome::Success(Box::new(record)),
            Err(e) => match e.category() {
                OutcomeCategory::RejectedInput => Outcome::RejectedInput(e),
                OutcomeCategory::UpstreamFailure => Outcome::UpstreamFailure(e),
                OutcomeCategory::ExtractionFailure => Outcome::ExtractionFailure(e),
            },
        }
    }
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn record(&self) -> Option<&PatientRecord> {
        match self {
            Outcome::Success(r) => Some(r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ExtractError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::RejectedInput(e)
            | Outcome::UpstreamFailure(e)
            | Outcome::ExtractionFailure(e) => Some(e),
        }
    }

    /// 200 on success, otherwise the error's 400/500.
    pub fn status_code(&self) -> u16 {
        self.error().map_or(200, ExtractError::status_code)
    }

    /// The response body: the record itself, or `{"error": "<user message>"}`.
    pub fn to_body(&self) -> Value {
        match self {
            Outcome::Success(record) => serde_json::to_value(record.as_ref())
                .unwrap_or_else(|_| json!({ "error": "Failed to analyze medical report" })),
            _ => json!({ "error": self.error().map(ExtractError::user_message) }),
        }
    }

    /// `{kind, message}` for failures, `None` on success.
    pub fn report(&self) -> Option<ErrorReport> {
        self.error().map(ErrorReport::from)
    }

    pub fn into_result(self) -> Result<PatientRecord, ExtractError> {
        match self {
            Outcome::Success(r) => Ok(*r),
            Outcome::RejectedInput(e)
            | Outcome::UpstreamFailure(e)
            | Outcome::ExtractionFailure(e) => Err(e),
        }
    }
}

/// Run one document through encode → invoke → recover and classify the result.
///
/// Exactly one model call is made for an accepted document and none for a
/// rejected one. Empty documents are not special-cased.
pub async fn extract(invoker: &dyn ModelInvoker, document: UploadedDocument) -> Outcome {
    let name = document.display_name().to_string();
    let outcome = Outcome::from(run_pipeline(invoker, document, &name).await);
    if let Some(e) = outcome.error() {
        match e.category() {
            OutcomeCategory::RejectedInput => info!("{}: rejected: {}", name, e),
            _ => warn!("{}: extraction failed: {}", name, e),
        }
    }
    outcome
}

async fn run_pipeline(
    invoker: &dyn ModelInvoker,
    document: UploadedDocument,
    name: &str,
) -> Result<PatientRecord, ExtractError> {
    let start = Instant::now();
    info!(
        "Extracting {} ({}, {} bytes) with {} [prompt v{}]",
        name,
        document.mime_type(),
        document.bytes().len(),
        invoker.model(),
        PROMPT_VERSION
    );

    // ── Step 1: MIME gate + base64 ───────────────────────────────────────
    let encoded = encode::encode(&document)?;
    drop(document);

    // ── Step 2: Single model call ────────────────────────────────────────
    let request = ExtractionRequest::new(encoded);
    let llm_start = Instant::now();
    let text = invoker.invoke(&request).await?;
    drop(request);
    debug!(
        "{}: model answered {} chars in {}ms",
        name,
        text.len(),
        llm_start.elapsed().as_millis()
    );

    // ── Step 3: Recover JSON ─────────────────────────────────────────────
    let value = recover::recover_json(&text).inspect_err(|e| {
        error!("{}: unusable model answer ({}). Raw text:\n{}", name, e, text);
    })?;

    // ── Step 4: Shape into the schema ────────────────────────────────────
    let mut record = PatientRecord::from_value(value).map_err(|e| {
        error!("{}: answer is not a record ({}). Raw text:\n{}", name, e, text);
        ExtractError::MalformedJson {
            detail: format!("top-level value is not a record: {e}"),
        }
    })?;

    for issue in record.conformance_issues() {
        warn!("{}: {}", name, issue);
    }
    if record.clamp_urgency() {
        debug!("{}: urgency_score clamped into [0, 1]", name);
    }

    info!(
        "{}: extracted {} in {}ms",
        name,
        record.patient_id.as_deref().unwrap_or("<no patient_id>"),
        start.elapsed().as_millis()
    );
    Ok(record)
}

/// Extract several documents with at most `concurrency` model calls in flight.
///
/// Each document is independent: one failure never affects another.
/// Outcomes are returned in input order.
pub async fn extract_batch(
    invoker: &dyn ModelInvoker,
    documents: Vec<UploadedDocument>,
    concurrency: usize,
    progress: Option<ProgressCallback>,
) -> Vec<Outcome> {
    let total = documents.len();
    if let Some(ref cb) = progress {
        cb.on_batch_start(total);
    }

    let tasks = documents.into_iter().enumerate().map(|(index, doc)| {
        let progress = progress.clone();
        async move {
            let name = doc.display_name().to_string();
            if let Some(ref cb) = progress {
                cb.on_document_start(index, total, &name);
            }
            let outcome = extract(invoker, doc).await;
            if let Some(ref cb) = progress {
                match outcome.error() {
                    None => cb.on_document_complete(index, total, &name),
                    Some(e) => cb.on_document_error(index, total, &name, &e.to_string()),
                }
            }
            (index, outcome)
        }
    });
    let mut results: Vec<(usize, Outcome)> = stream::iter(tasks)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _)| *index);
    let success = results.iter().filter(|(_, o)| o.is_success()).count();
    if let Some(ref cb) = progress {
        cb.on_batch_complete(total, success);
    }
    results.into_iter().map(|(_, o)| o).collect()
}

/// Load a local file as an [`UploadedDocument`].
///
/// The MIME type comes from `mime` when given, otherwise from the file
/// extension. Unknown extensions are declared as `application/octet-stream`,
/// which the encoder then rejects.
pub async fn document_from_path(
    path: impl AsRef<Path>,
    mime: Option<&str>,
) -> std::io::Result<UploadedDocument> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await?;
    let mime = match mime {
        Some(m) => m.to_string(),
        None => path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaType::from_extension)
            .map_or("application/octet-stream", |m| m.as_mime())
            .to_string(),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(UploadedDocument::new(bytes, mime).with_filename(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedInvoker {
        answer: Result<String, ExtractError>,
        calls: AtomicUsize,
    }

    impl CannedInvoker {
        fn answering(text: &str) -> Self {
            Self {
                answer: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelInvoker for CannedInvoker {
        fn model(&self) -> &str {
            "canned"
        }

        async fn invoke(&self, _request: &ExtractionRequest) -> Result<String, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn pdf() -> UploadedDocument {
        UploadedDocument::new(b"%PDF-1.7\n".to_vec(), "application/pdf").with_filename("report.pdf")
    }

    #[tokio::test]
    async fn success_carries_record() {
        let inv = CannedInvoker::answering(r#"{"patient_id":"NAHED-2024-001"}"#);
        let outcome = extract(&inv, pdf()).await;
        assert_eq!(outcome.status_code(), 200);
        assert_eq!(
            outcome.record().and_then(|r| r.patient_id.as_deref()),
            Some("NAHED-2024-001")
        );
        assert_eq!(outcome.to_body()["patient_id"], "NAHED-2024-001");
        assert!(outcome.report().is_none());
    }

    #[tokio::test]
    async fn unsupported_type_never_calls_model() {
        let inv = CannedInvoker::answering("{}");
        let doc = UploadedDocument::new(b"hello".to_vec(), "text/plain");
        let outcome = extract(&inv, doc).await;
        assert!(matches!(
            outcome,
            Outcome::RejectedInput(ExtractError::UnsupportedMediaType { .. })
        ));
        assert_eq!(outcome.status_code(), 400);
        assert_eq!(inv.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn prose_answer_is_extraction_failure_without_raw_text() {
        let inv = CannedInvoker::answering("Sorry, the scan is unreadable. Patient SSN 123-45-6789.");
        let outcome = extract(&inv, pdf()).await;
        assert!(matches!(outcome, Outcome::ExtractionFailure(ExtractError::NoJsonFound)));
        let body = outcome.to_body().to_string();
        assert!(!body.contains("6789"), "raw model text leaked: {body}");
        assert_eq!(outcome.to_body()["error"], "Failed to parse medical data from report");
    }

    #[tokio::test]
    async fn upstream_error_is_classified() {
        let inv = CannedInvoker {
            answer: Err(ExtractError::ModelRejected {
                model: "canned".into(),
                status: Some(500),
                detail: "internal".into(),
            }),
            calls: AtomicUsize::new(0),
        };
        let outcome = extract(&inv, pdf()).await;
        assert!(matches!(outcome, Outcome::UpstreamFailure(_)));
        assert_eq!(outcome.to_body(), json!({"error": "Failed to analyze medical report"}));
        assert_eq!(inv.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn out_of_range_urgency_is_clamped() {
        let inv = CannedInvoker::answering(r#"{"clinical_data":{"urgency_score":3}}"#);
        let outcome = extract(&inv, pdf()).await;
        assert_eq!(outcome.to_body()["clinical_data"]["urgency_score"], json!(1));
        let record = outcome.into_result().unwrap();
        assert_eq!(record.clinical_data.urgency(), Some(1.0));
    }

    #[tokio::test]
    async fn success_body_keeps_numbers_as_written() {
        let inv = CannedInvoker::answering(
            r#"{"clinical_data":{"urgency_score":0},"financial_profile":{"annual_income":24000},
                "logistics":{"distance_km":12.5}}"#,
        );
        let body = extract(&inv, pdf()).await.to_body();
        assert_eq!(body["clinical_data"]["urgency_score"], json!(0));
        assert_eq!(body["financial_profile"]["annual_income"], json!(24000));
        assert_eq!(body["logistics"]["distance_km"], json!(12.5));
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let inv = CannedInvoker::answering(r#"{"patient_id":"NAHED-2024-002"}"#);
        let docs = vec![
            pdf(),
            UploadedDocument::new(Vec::new(), "application/zip"),
            UploadedDocument::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg"),
        ];
        let outcomes = extract_batch(&inv, docs, 2, None).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(matches!(outcomes[1], Outcome::RejectedInput(_)));
        assert!(outcomes[2].is_success());
        assert_eq!(inv.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn document_from_path_infers_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.PNG");
        tokio::fs::write(&path, b"\x89PNG").await.unwrap();

        let doc = document_from_path(&path, None).await.unwrap();
        assert_eq!(doc.mime_type(), "image/png");
        assert_eq!(doc.filename(), Some("scan.PNG"));

        let other = dir.path().join("notes.txt");
        tokio::fs::write(&other, b"hi").await.unwrap();
        let doc = document_from_path(&other, None).await.unwrap();
        assert_eq!(doc.mime_type(), "application/octet-stream");

        let doc = document_from_path(&other, Some("application/pdf")).await.unwrap();
        assert_eq!(doc.mime_type(), "application/pdf");
    }
}
