//! HTTP surface.
//!
//! - `POST /api/analyze-report` – multipart upload (field `file`), answered
//!   with a `PatientRecord` or `{"error": ...}` (400 / 500). A body that is
//!   not multipart at all gets the same generic 500 as any unreadable upload.
//! - `POST /api/tts` – JSON `{"text": ...}`, answered with `audio/mpeg` bytes
//!   or `{"error": ...}`. Vendor and unexpected failures add `"fallback": true`.
//!
//! Handlers hold no state of their own. The invoker and the speech client
//! are built once in `main` and shared through [`AppState`].

use crate::error::ServiceError;
use crate::extract::extract;
use crate::pipeline::encode::UploadedDocument;
use crate::pipeline::llm::ModelInvoker;
use crate::speech::{SpeechError, SpeechSynthesizer};
use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared, read-only handler state.
#[derive(Clone)]
pub struct AppState {
    pub invoker: Arc<dyn ModelInvoker>,
    /// `None` when no speech API key is configured.
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
}

impl AppState {
    pub fn new(invoker: Arc<dyn ModelInvoker>, speech: Option<Arc<dyn SpeechSynthesizer>>) -> Self {
        Self { invoker, speech }
    }
}

/// Build the router. Uploads larger than `max_upload_bytes` are refused.
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/analyze-report", post(analyze_report))
        .route("/api/tts", post(text_to_speech))
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD)))
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    max_upload_bytes: usize,
) -> Result<(), ServiceError> {
    let listener = TcpListener::bind(addr).await.map_err(|source| ServiceError::Server {
        addr: addr.to_string(),
        source,
    })?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, create_router(state, max_upload_bytes))
        .await
        .map_err(|source| ServiceError::Server {
            addr: addr.to_string(),
            source,
        })
}

fn status_of(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn analyze_report(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            warn!("Not a multipart upload: {}", e);
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            return error_body(status, "Failed to analyze medical report");
        }
    };
    let mut document = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Unreadable multipart body: {}", e);
                return error_body(e.status(), "Failed to analyze medical report");
            }
        };
        if field.name() != Some("file") {
            continue;
        }
        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let filename = field.file_name().map(str::to_string);
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to read upload bytes: {}", e);
                return error_body(e.status(), "Failed to analyze medical report");
            }
        };
        let mut doc = UploadedDocument::new(bytes.to_vec(), mime);
        if let Some(name) = filename {
            doc = doc.with_filename(name);
        }
        document = Some(doc);
        break;
    }

    let Some(document) = document else {
        return error_body(StatusCode::BAD_REQUEST, "No file provided");
    };

    let outcome = extract(state.invoker.as_ref(), document).await;
    (status_of(outcome.status_code()), Json(outcome.to_body())).into_response()
}

#[derive(Debug, Deserialize)]
struct TtsRequest {
    #[serde(default)]
    text: Option<String>,
}

/// Speech failure rendered as `{error}`, plus `fallback: true` when the
/// client should switch to its own speech engine.
struct SpeechFailure(SpeechError);

impl IntoResponse for SpeechFailure {
    fn into_response(self) -> Response {
        let status = status_of(self.0.status_code());
        let message = self.0.user_message();
        if self.0.suggests_fallback() {
            (status, Json(json!({ "error": message, "fallback": true }))).into_response()
        } else {
            error_body(status, message)
        }
    }
}

impl From<SpeechError> for SpeechFailure {
    fn from(inner: SpeechError) -> Self {
        Self(inner)
    }
}

async fn text_to_speech(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TtsRequest>, JsonRejection>,
) -> Result<Response, SpeechFailure> {
    let Json(request) = payload.map_err(|e| {
        warn!("Unreadable TTS request: {}", e);
        SpeechError::Unavailable(e.body_text())
    })?;
    let text = request.text.filter(|t| !t.is_empty()).ok_or(SpeechError::EmptyText)?;
    let speech = state.speech.as_ref().ok_or(SpeechError::NotConfigured)?;

    let audio = speech.synthesize(&text).await.inspect_err(|e| warn!("TTS failed: {}", e))?;
    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg".to_string()),
            (header::CONTENT_LENGTH, audio.len().to_string()),
        ],
        audio,
    )
        .into_response())
}
