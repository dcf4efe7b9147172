//! Request validation
//!
//! Turns a raw [`ClientMessage`] into a [`Request`] the broker can act on.
//! Validation happens once, here; nothing past this point sees untyped data.

use serde_json::{Map, Value};

use crate::broker::message::Priority;
use crate::transport::message::ClientMessage;
use crate::utils::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Publish {
        topic: String,
        content: String,
        priority: Priority,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    /// Terminate every connection and stop accepting new ones.
    Shutdown,
    /// Terminate only the requesting connection.
    CloseConnection,
}

/// Parses and validates one text frame.
pub fn decode_request(text: &str) -> Result<Request, ValidationError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.get("action").is_some_and(Value::is_string) {
        return Err(ValidationError::InvalidAction);
    }

    let raw: ClientMessage = serde_json::from_value(value)?;
    Request::try_from(raw)
}

impl TryFrom<ClientMessage> for Request {
    type Error = ValidationError;

    fn try_from(raw: ClientMessage) -> Result<Self, Self::Error> {
        match raw {
            ClientMessage::Publish { message } => {
                let Some(Value::Object(mut fields)) = message else {
                    return Err(ValidationError::MissingField("message"));
                };

                Ok(Request::Publish {
                    topic: non_empty(take(&mut fields, "topic"), "topic")?,
                    content: non_empty(take(&mut fields, "content"), "message content")?,
                    priority: priority_from(take(&mut fields, "priority"))?,
                })
            }
            ClientMessage::Subscribe { topic } => Ok(Request::Subscribe {
                topic: non_empty(topic, "topic")?,
            }),
            ClientMessage::Unsubscribe { topic } => Ok(Request::Unsubscribe {
                topic: non_empty(topic, "topic")?,
            }),
            ClientMessage::Shutdown => Ok(Request::Shutdown),
            ClientMessage::CloseConnection => Ok(Request::CloseConnection),
            ClientMessage::Unknown => Err(ValidationError::UnknownAction),
        }
    }
}

fn take(fields: &mut Map<String, Value>, key: &str) -> Option<Value> {
    fields.remove(key).filter(|value| !value.is_null())
}

/// Anything other than a non-empty string counts as missing.
fn non_empty(value: Option<Value>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(Value::String(text)) if !text.is_empty() => Ok(text),
        _ => Err(ValidationError::MissingField(field)),
    }
}

/// Accepts JSON integers and integral floats such as `3.0`.
fn priority_from(value: Option<Value>) -> Result<Priority, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField("priority"))?;
    let invalid = ValidationError::InvalidField {
        field: "priority",
        expected: "an integer",
    };

    if let Some(priority) = value.as_i64() {
        return Ok(priority);
    }
    match value.as_f64() {
        Some(float)
            if float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 =>
        {
            Ok(float as i64)
        }
        _ => Err(invalid),
    }
}
