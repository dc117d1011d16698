//! Frame decoding.
//!
//! Single-stream connections deliver the event object directly, while
//! combined-stream connections wrap it as `{"stream": name, "data": event}`.
//! Both are normalized into [`StreamFrame`].

use crate::error::{WsError, WsResult};
use serde_json::Value;

/// One decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    /// Stream name for combined-stream frames.
    pub stream: Option<String>,
    /// Event payload.
    pub payload: Value,
}

impl StreamFrame {
    /// Value of the `e` (event type) field, if any.
    pub fn event_type(&self) -> Option<&str> {
        self.payload.get("e").and_then(Value::as_str)
    }
}

/// Decode a text frame.
pub fn parse_frame(text: &str) -> WsResult<StreamFrame> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(WsError::ParseError(format!(
            "expected JSON object, got {}",
            type_name(&value)
        )));
    }

    match (value.get("stream"), value.get("data")) {
        (Some(Value::String(stream)), Some(_)) => {
            let stream = stream.clone();
            let payload = match value {
                Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
                _ => Value::Null,
            };
            Ok(StreamFrame {
                stream: Some(stream),
                payload,
            })
        }
        _ => Ok(StreamFrame {
            stream: None,
            payload: value,
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
