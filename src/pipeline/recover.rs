//! JSON recovery from a free-text model answer.
//!
//! The prompt says "JSON only", but model output is not a contract: answers
//! arrive wrapped in ```` ```json ```` fences, prefixed with "Here is the
//! result:", or followed by a closing remark. Recovery therefore takes the
//! widest candidate span, from the first `{` to the last `}`, and parses
//! exactly that. Anything outside the span is ignored; anything wrong inside
//! it fails closed.
//!
//! The span is greedy, so braces inside string values stay inside it. A span
//! that does not parse is never repaired.

use crate::error::ExtractError;
use serde_json::Value;

/// Locate the candidate span: first `{` through the last `}` after it.
pub fn find_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Extract and parse the JSON object embedded in a model answer.
///
/// # Errors
/// * [`ExtractError::NoJsonFound`]: no `{` or no `}` after it
/// * [`ExtractError::MalformedJson`]: the span is not valid JSON
pub fn recover_json(text: &str) -> Result<Value, ExtractError> {
    let span = find_json_span(text).ok_or(ExtractError::NoJsonFound)?;
    serde_json::from_str(span).map_err(|e| ExtractError::MalformedJson {
        detail: e.to_string(),
    })
}
