//! Unwrapping of `{success, data, message}` response envelopes.
//!
//! Some endpoints wrap their payload twice (`{success, data: {success, data:
//! {...}}}`). Every call site reads through [`unwrap_envelope`], which accepts
//! the payload at the top level or under one or two `data` wrappers and treats
//! anything deeper as an error.

use serde_json::{Map, Value};
use thiserror::Error;

pub const MAX_UNWRAP_DEPTH: usize = 2;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("response envelope is not a JSON object")]
    NotAnObject,
    #[error("request rejected: {message}")]
    Rejected { message: String },
    #[error("response has no `{key}` field within two envelope levels")]
    MissingKey { key: String },
    #[error("response is wrapped deeper than two envelope levels")]
    TooDeep,
}

/// Returns the value stored under `expected_key`, peeling at most
/// [`MAX_UNWRAP_DEPTH`] `data` wrappers. A `success: false` at any level
/// visited is reported as [`EnvelopeError::Rejected`].
pub fn unwrap_envelope<'a>(response: &'a Value, expected_key: &str) -> Result<&'a Value, EnvelopeError> {
    let mut level = response;
    for depth in 0..=MAX_UNWRAP_DEPTH {
        let object = level.as_object().ok_or(EnvelopeError::NotAnObject)?;
        ensure_success(object)?;

        if let Some(value) = object.get(expected_key) {
            return Ok(value);
        }

        match object.get("data") {
            Some(inner) if inner.is_object() => {
                if depth == MAX_UNWRAP_DEPTH {
                    return Err(EnvelopeError::TooDeep);
                }
                level = inner;
            }
            _ => break,
        }
    }

    Err(EnvelopeError::MissingKey { key: expected_key.to_owned() })
}

/// Like [`unwrap_envelope`], but an absent or `null` field is `None`.
pub fn unwrap_optional<'a>(
    response: &'a Value,
    expected_key: &str,
) -> Result<Option<&'a Value>, EnvelopeError> {
    match unwrap_envelope(response, expected_key) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(EnvelopeError::MissingKey { .. }) => Ok(None),
        Err(error) => Err(error),
    }
}

/// The acknowledgment message of a write response, if any.
pub fn envelope_message(response: &Value) -> Result<Option<String>, EnvelopeError> {
    Ok(unwrap_optional(response, "message")?.and_then(Value::as_str).map(str::to_owned))
}

fn ensure_success(object: &Map<String, Value>) -> Result<(), EnvelopeError> {
    if object.get("success").and_then(Value::as_bool) != Some(false) {
        return Ok(());
    }

    let message = ["message", "error"]
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_str))
        .unwrap_or("server reported failure")
        .to_owned();
    Err(EnvelopeError::Rejected { message })
}
