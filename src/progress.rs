//! Progress-callback trait for batch extraction events.
//!
//! Pass an [`Arc<dyn ExtractionProgressCallback>`] to
//! [`crate::extract::extract_batch`] to receive an event as each document
//! starts, succeeds or fails. The CLI forwards these to a terminal progress
//! bar; a server could forward them to a channel or a WebSocket.
//!
//! # Example
//!
//! ```rust
//! use nahed_extract::ExtractionProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     failed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {name}: {error}", index + 1, total);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by [`crate::extract::extract_batch`] as it processes each document.
///
/// All methods have no-op defaults. Documents run concurrently, so
/// `on_document_*` may be called from several tasks at once; protect shared
/// state with atomics or a `Mutex`.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any document is encoded.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before a document enters the pipeline.
    ///
    /// `index` is 0-based and refers to the input order.
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document produced a [`crate::schema::PatientRecord`].
    fn on_document_complete(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document ended in any failure outcome.
    ///
    /// `error` is the internal description (vendor detail included); do not
    /// forward it to end users.
    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every document has reached a terminal outcome.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Shared handle accepted by [`crate::extract::extract_batch`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
