//! Pipeline stages for patient-record extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its own
//! and the model backend can be swapped without touching encoding or recovery.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ encode ──▶ llm ──▶ recover ──▶ (classify, in crate::extract)
//! (bytes)    (base64)   (VLM)   (JSON)
//! ```
//!
//! 1. [`encode`] : MIME gate and base64 transport encoding
//! 2. [`llm`]    : the [`llm::ModelInvoker`] seam; the only stage with network I/O
//! 3. [`gemini`] : default invoker, direct Gemini REST call
//! 4. [`recover`]: salvage the JSON object from the model's free-text answer

pub mod encode;
pub mod gemini;
pub mod llm;
pub mod recover;
