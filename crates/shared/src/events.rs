//! Wire events exchanged with the chat backend.
//!
//! Streaming frames are decoded exactly once, here, into [`ChatEvent`]; the
//! single blocking endpoint's body is decoded into [`FallbackReply`].

use serde_json::Value;

use crate::chat::Step;

/// A decoded streaming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Progress update for one named step.
    Step(Step),
    /// Terminal frame carrying the complete response text.
    Final { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,
}

impl ChatEvent {
    /// Decode the payload of one `data: ` frame.
    ///
    /// The terminal flag decides the variant; the step name is only consulted
    /// for non-terminal frames.
    pub fn from_json(payload: &str) -> Result<Self, EventDecodeError> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EventDecodeError> {
        let obj = value.as_object().ok_or(EventDecodeError::NotAnObject)?;
        if obj.get("is_final").is_some_and(is_truthy) {
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(ChatEvent::Final { message });
        }
        Ok(ChatEvent::Step(serde_json::from_value(value)?))
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ChatEvent::Final { .. })
    }
}

/// JavaScript-style truthiness. The backend's flags (`is_final`, `error`,
/// `response`) are interpreted this way.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Body of the blocking chat endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReply {
    Response(String),
    /// Application-level error reported with an otherwise successful exchange.
    Error(String),
    /// Neither `response` nor `error` was present.
    Unexpected,
}

impl FallbackReply {
    /// `error` wins over `response` when both are present.
    pub fn from_value(value: &Value) -> Self {
        if let Some(err) = value.get("error").filter(|v| is_truthy(v)) {
            return FallbackReply::Error(display_value(err));
        }
        if let Some(resp) = value.get("response").filter(|v| is_truthy(v)) {
            return FallbackReply::Response(display_value(resp));
        }
        FallbackReply::Unexpected
    }
}

fn display_value(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
