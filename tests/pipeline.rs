//! Pipeline integration tests.
//!
//! Everything runs offline: the model is either a counting stub or an
//! httpmock server speaking the Gemini REST dialect.

use async_trait::async_trait;
use httpmock::{Method::POST, MockServer};
use nahed_extract::schema::BiomarkerStatus;
use nahed_extract::{
    extract, extract_batch, recover_json, ExtractError, ExtractionProgressCallback, ExtractionRequest,
    ModelInvoker, Outcome, PatientRecord, ProgressCallback, ServiceConfig, UploadedDocument,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Returns a fixed answer and counts how often it was asked.
struct CountingInvoker {
    answer: Result<String, ExtractError>,
    calls: AtomicUsize,
    seen_mime: Mutex<Vec<&'static str>>,
}

impl CountingInvoker {
    fn new(answer: Result<String, ExtractError>) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
            seen_mime: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInvoker for CountingInvoker {
    fn model(&self) -> &str {
        "counting-stub"
    }

    async fn invoke(&self, request: &ExtractionRequest) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_mime.lock().unwrap().push(request.document().media_type.as_mime());
        self.answer.clone()
    }
}

fn minimal_record_json() -> serde_json::Value {
    json!({
        "patient_id": "NAHED-2024-001",
        "clinical_data": {
            "diagnosis": "Invasive ductal carcinoma",
            "stage": "II",
            "biomarkers": {"HER2": "unknown", "ER": "unknown", "PR": "unknown"},
            "urgency_score": 0,
            "recommended_action": "Oncology referral"
        },
        "financial_profile": {
            "annual_income": null,
            "income_currency": "EGP",
            "country": "Egypt",
            "insurance_status": "none",
            "fibo_class": "LowIncome"
        },
        "pharma_integration": {
            "drug_needed": {
                "generic_name": null,
                "brand_options": [],
                "treatment_duration_months": null,
                "estimated_market_cost": null
            },
            "eligibility_flags": {"income_verified": false, "clinical_need_verified": false},
            "patient_access_program": {
                "program_name": null,
                "subsidy_percentage": null,
                "application_status": "not_started"
            }
        },
        "holistic_support": {
            "nutrition_plan": {
                "regimen_type": null,
                "focus": null,
                "recommended_foods": [],
                "avoid": [],
                "hydration_goal": null
            },
            "psychological_support": {
                "assessment": null,
                "recommended_intervention": null,
                "resource_assigned": null,
                "support_session_available": false
            }
        },
        "logistics": {
            "nearest_center": null,
            "distance_km": null,
            "next_appointment": null,
            "transport_support_needed": false,
            "ngo_contacts": []
        },
        "diagnostic_summary": {"urgency": "low", "clinical_steps": []},
        "fibo_financial_mapping": {
            "estimated_total_cost": null,
            "funding_sources": {"patient_coverage": null, "ngo_support": null, "grant_pending": null}
        }
    })
}

fn pdf() -> UploadedDocument {
    UploadedDocument::new(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec(), "application/pdf")
        .with_filename("report.pdf")
}

// ── Classification ───────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_mime_makes_no_model_call() {
    let invoker = CountingInvoker::new(Ok("{}".into()));
    for mime in ["text/plain", "application/zip", "image/tiff", ""] {
        let outcome = extract(&invoker, UploadedDocument::new(b"data".to_vec(), mime)).await;
        assert!(
            matches!(outcome, Outcome::RejectedInput(ExtractError::UnsupportedMediaType { .. })),
            "{mime}: {outcome:?}"
        );
        assert_eq!(outcome.status_code(), 400);
    }
    assert_eq!(invoker.calls(), 0);
}

#[tokio::test]
async fn transport_failure_is_attempted_exactly_once() {
    let invoker = CountingInvoker::new(Err(ExtractError::ModelUnavailable {
        model: "counting-stub".into(),
        detail: "connection reset".into(),
    }));
    let outcome = extract(&invoker, pdf()).await;

    assert!(matches!(
        outcome,
        Outcome::UpstreamFailure(ExtractError::ModelUnavailable { .. })
    ));
    assert_eq!(outcome.status_code(), 500);
    assert_eq!(invoker.calls(), 1);
}

#[tokio::test]
async fn zero_byte_document_is_still_sent() {
    let invoker = CountingInvoker::new(Ok(r#"{"patient_id": null}"#.into()));
    let outcome = extract(&invoker, UploadedDocument::new(Vec::new(), "image/webp")).await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(invoker.calls(), 1);
    assert_eq!(*invoker.seen_mime.lock().unwrap(), vec!["image/webp"]);
}

#[tokio::test]
async fn prose_wrapped_answer_is_recovered() {
    let answer = format!(
        "Sure! Here is the extracted data:\n```json\n{}\n```\nLet me know if anything is missing.",
        minimal_record_json()
    );
    let invoker = CountingInvoker::new(Ok(answer));
    let record = extract(&invoker, pdf()).await.into_result().expect("record");

    assert_eq!(record.patient_id.as_deref(), Some("NAHED-2024-001"));
    assert_eq!(record.clinical_data.stage.as_deref(), Some("II"));
}

#[tokio::test]
async fn answer_without_json_is_extraction_failure() {
    let invoker = CountingInvoker::new(Ok("The document appears to be blank.".into()));
    let outcome = extract(&invoker, pdf()).await;

    assert!(matches!(outcome, Outcome::ExtractionFailure(ExtractError::NoJsonFound)));
    assert_eq!(outcome.to_body(), json!({"error": "Failed to parse medical data from report"}));
    let report = outcome.report().expect("report");
    assert_eq!(report.kind.to_string(), "NoJsonFound");
}

// ── Round-trip ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn minimal_record_survives_serialise_and_recover() {
    let record = PatientRecord::from_value(minimal_record_json()).expect("record");
    let bio = &record.clinical_data.biomarkers;
    assert_eq!(bio.her2, Some(BiomarkerStatus::Unknown));
    assert_eq!(bio.er, Some(BiomarkerStatus::Unknown));
    assert_eq!(bio.pr, Some(BiomarkerStatus::Unknown));
    assert_eq!(record.clinical_data.urgency(), Some(0.0));
    assert!(record.conformance_issues().is_empty(), "{:?}", record.conformance_issues());

    let text = serde_json::to_string(&record).unwrap();
    let recovered = PatientRecord::from_value(recover_json(&text).unwrap()).unwrap();
    assert_eq!(recovered, record);

    // Through the whole pipeline the body is the model's object, value for value.
    let invoker = CountingInvoker::new(Ok(minimal_record_json().to_string()));
    let outcome = extract(&invoker, pdf()).await;
    assert_eq!(outcome.to_body(), minimal_record_json());
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Events {
    completed: AtomicUsize,
    failed: AtomicUsize,
    success_reported: AtomicUsize,
}

impl ExtractionProgressCallback for Events {
    fn on_document_complete(&self, _index: usize, _total: usize, _name: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_error(&self, _index: usize, _total: usize, _name: &str, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_batch_complete(&self, _total: usize, success_count: usize) {
        self.success_reported.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn batch_isolates_failures_and_reports_progress() {
    let invoker = CountingInvoker::new(Ok(minimal_record_json().to_string()));
    let events = Arc::new(Events::default());
    let docs = vec![
        pdf(),
        UploadedDocument::new(b"GIF89a".to_vec(), "image/gif"),
        UploadedDocument::new(b"<html>".to_vec(), "text/html"),
        UploadedDocument::new(b"\x89PNG".to_vec(), "image/png"),
    ];

    let progress: ProgressCallback = events.clone();
    let outcomes = extract_batch(&invoker, docs, 3, Some(progress)).await;

    let statuses: Vec<u16> = outcomes.iter().map(Outcome::status_code).collect();
    assert_eq!(statuses, vec![200, 200, 400, 200]);
    assert_eq!(invoker.calls(), 3);
    assert_eq!(events.completed.load(Ordering::SeqCst), 3);
    assert_eq!(events.failed.load(Ordering::SeqCst), 1);
    assert_eq!(events.success_reported.load(Ordering::SeqCst), 3);
}

// ── Gemini over HTTP ─────────────────────────────────────────────────────────

#[tokio::test]
async fn gemini_backend_end_to_end() {
    let server = MockServer::start_async().await;
    let answer = format!("```json\n{}\n```", minimal_record_json());
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-2.0-flash:generateContent")
                .header("x-goog-api-key", "test-key")
                .body_contains("\"mimeType\":\"application/pdf\"");
            then.status(200).json_body(json!({
                "candidates": [{"content": {"parts": [{"text": answer}]}, "finishReason": "STOP"}]
            }));
        })
        .await;

    let config = ServiceConfig::builder()
        .gemini_api_key("test-key")
        .gemini_base_url(server.base_url())
        .build()
        .unwrap();
    let invoker = config.build_invoker().unwrap();
    let outcome = extract(invoker.as_ref(), pdf()).await;

    mock.assert_async().await;
    assert_eq!(outcome.status_code(), 200);
    assert_eq!(outcome.to_body()["clinical_data"]["biomarkers"]["HER2"], "unknown");
}

#[tokio::test]
async fn gemini_quota_error_is_upstream_failure() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST);
            then.status(429).json_body(json!({
                "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
            }));
        })
        .await;

    let config = ServiceConfig::builder()
        .gemini_api_key("test-key")
        .gemini_base_url(server.base_url())
        .build()
        .unwrap();
    let invoker = config.build_invoker().unwrap();
    let outcome = extract(invoker.as_ref(), pdf()).await;

    mock.assert_hits_async(1).await;
    assert!(matches!(
        outcome,
        Outcome::UpstreamFailure(ExtractError::ModelRejected { status: Some(429), .. })
    ));
    assert_eq!(outcome.to_body(), json!({"error": "Failed to analyze medical report"}));
}
