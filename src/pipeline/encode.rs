//! Document encoding: uploaded bytes → base64 + resolved MIME type.
//!
//! Multimodal APIs (Gemini `inline_data`, OpenAI/Anthropic image parts) take
//! the document as base64 text embedded in the JSON request body, so the raw
//! upload is never written to disk. The MIME gate runs first: a document with
//! a declared type outside [`MediaType`] is rejected before any byte is
//! encoded and before any network call.
//!
//! The declared type is authoritative. Content sniffing only produces a
//! warning, and an empty upload is encoded like any other.

use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use std::fmt;
use tracing::{debug, warn};

/// The document types accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Pdf,
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl MediaType {
    pub const ALL: [MediaType; 5] = [
        MediaType::Pdf,
        MediaType::Jpeg,
        MediaType::Png,
        MediaType::Gif,
        MediaType::Webp,
    ];

    /// Resolve a declared MIME type. Case-insensitive; parameters such as
    /// `; name=scan.png` are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|m| m.as_mime() == essence)
    }

    /// Guess from a file extension (CLI inputs carry no declared type).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MediaType::Pdf),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            "gif" => Some(MediaType::Gif),
            "webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    pub fn as_mime(&self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Gif => "image/gif",
            MediaType::Webp => "image/webp",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, MediaType::Pdf)
    }

    fn image_format(&self) -> Option<ImageFormat> {
        match self {
            MediaType::Pdf => None,
            MediaType::Jpeg => Some(ImageFormat::Jpeg),
            MediaType::Png => Some(ImageFormat::Png),
            MediaType::Gif => Some(ImageFormat::Gif),
            MediaType::Webp => Some(ImageFormat::WebP),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// One uploaded file, owned for the duration of a single extraction.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    bytes: Vec<u8>,
    mime_type: String,
    filename: Option<String>,
}

impl UploadedDocument {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            filename: None,
        }
    }

    /// Attach the client-side filename. Used in log lines only.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Filename for diagnostics, `"<unnamed>"` when the client sent none.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("<unnamed>")
    }
}

/// A document ready to embed in a model request.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedDocument {
    pub media_type: MediaType,
    /// Standard (padded) base64 of the raw bytes.
    pub data: String,
    /// Size of the raw document before encoding.
    pub byte_len: usize,
}

/// Validate the declared MIME type and base64-encode the document.
///
/// # Errors
/// [`ExtractError::UnsupportedMediaType`] when the declared type is not one
/// of PDF, JPEG, PNG, GIF or WebP.
pub fn encode(doc: &UploadedDocument) -> Result<EncodedDocument, ExtractError> {
    let media_type =
        MediaType::from_mime(doc.mime_type()).ok_or_else(|| ExtractError::UnsupportedMediaType {
            mime: doc.mime_type().to_string(),
        })?;

    if let Some(found) = sniff_mismatch(media_type, doc.bytes()) {
        warn!(
            "{}: declared {} but content looks like {}; sending as declared",
            doc.display_name(),
            media_type,
            found
        );
    }

    let data = STANDARD.encode(doc.bytes());
    debug!(
        "Encoded {} ({} bytes) → {} bytes base64",
        doc.display_name(),
        doc.bytes().len(),
        data.len()
    );

    Ok(EncodedDocument {
        media_type,
        data,
        byte_len: doc.bytes().len(),
    })
}

/// Describe what the content actually looks like when it disagrees with the
/// declared type. Empty input is never reported.
fn sniff_mismatch(declared: MediaType, bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let is_pdf = bytes.starts_with(b"%PDF");
    match declared.image_format() {
        None if is_pdf => None,
        None => Some(
            image::guess_format(bytes)
                .map(|f| format!("{f:?}"))
                .unwrap_or_else(|_| "unknown data".to_string()),
        ),
        Some(_) if is_pdf => Some("PDF".to_string()),
        Some(expected) => match image::guess_format(bytes) {
            Ok(found) if found == expected => None,
            Ok(found) => Some(format!("{found:?}")),
            Err(_) => Some("unknown data".to_string()),
        },
    }
}
