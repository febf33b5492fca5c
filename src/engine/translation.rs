//! Payload translation — kernel message payloads → outgoing event content.
//!
//! Pure deterministic mapping, separated from the poll loop so every
//! classification rule is unit-testable without a kernel.
//!
//! Mime-bundle priority (exactly one sub-case fires per message):
//!   image/png   → Image (richer representation wins over text)
//!   text/plain  → Text
//!   (otherwise) → Rich, tagged "html" if text/html is present, else "data"

use serde_json::Value;

/// Classification of a display/result mime bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayContent {
    /// Base64 image payload, to be handed to the artifact store.
    Image { base64: String },
    /// Plain-text representation, forwarded verbatim.
    Text(Value),
    /// Structured payload the bridge doesn't interpret; the host applies
    /// its own rendering.
    Rich { tag: &'static str, data: Value },
}

/// Classify the `data` mapping of a `display_data`/`execute_result` payload.
pub fn classify_mime_bundle(data: &Value) -> DisplayContent {
    if let Some(image) = data.get("image/png").and_then(Value::as_str) {
        return DisplayContent::Image {
            base64: image.to_string(),
        };
    }
    if let Some(text) = data.get("text/plain") {
        return DisplayContent::Text(text.clone());
    }
    let tag = if data.get("text/html").is_some() {
        "html"
    } else {
        "data"
    };
    DisplayContent::Rich {
        tag,
        data: data.clone(),
    }
}

/// Whether a `status` payload signals the end of output for the request.
pub fn is_idle(payload: &Value) -> bool {
    payload
        .get("execution_state")
        .and_then(Value::as_str)
        .map(|state| state == "idle")
        .unwrap_or(false)
}

/// Content for a `stream` event: channel name and text, verbatim.
pub fn stream_content(payload: &Value) -> Value {
    serde_json::json!({
        "name": payload.get("name").cloned().unwrap_or(Value::Null),
        "text": payload.get("text").and_then(Value::as_str).unwrap_or(""),
    })
}

/// Content for a `clear_output` event. `wait` passes through unreinterpreted.
pub fn clear_content(payload: &Value) -> Value {
    serde_json::json!({
        "wait": payload.get("wait").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Content for a kernel-reported `error` event.
pub fn error_content(payload: &Value) -> Value {
    serde_json::json!({
        "ename": payload.get("ename").cloned().unwrap_or(Value::Null),
        "evalue": payload.get("evalue").cloned().unwrap_or(Value::Null),
        "traceback": payload.get("traceback").cloned().unwrap_or_else(|| Value::Array(vec![])),
    })
}

/// Extract an `execution_count` if the payload carries one.
pub fn execution_count_of(payload: &Value) -> Option<i64> {
    payload.get("execution_count").and_then(Value::as_i64)
}
