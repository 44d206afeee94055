//! Error types for the newsletter API client.
//!
//! # Design
//! The remote API reports failures inside a `200`/`4xx` JSON body under an
//! `error` field, so `Remote` carries that value untouched. Everything the
//! client detects on its own side (network, undecodable bodies, missing
//! count fields) gets a dedicated variant, which keeps "the service said no"
//! apart from "we never got a usable answer".

use serde_json::Value;
use thiserror::Error;

/// Errors returned by `Connector` and `NewsletterClient` operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The decoded response carried an `error` field.
    #[error("{}", remote_message(.0))]
    Remote(Value),

    /// Network, timeout, or TLS failure before a response body was read.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response body was empty or not valid JSON.
    #[error("response could not be decoded: {0}")]
    Decode(String),

    /// Non-2xx status with a body that is not JSON.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request parameters could not be form-encoded.
    #[error("request encoding failed: {0}")]
    Encoding(String),

    /// Configuration could not be assembled.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A successful response lacked the field the operation reports.
    #[error("response is missing the `{0}` field")]
    MissingField(&'static str),

    /// The member to edit does not exist in the list.
    #[error("no member `{email}` in recipient list `{list}`")]
    MemberNotFound { list: String, email: String },

    /// More records than one request may carry.
    #[error("batch of {len} recipients exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },

    /// Adding the replacement record failed after the original was deleted.
    #[error("member edit failed ({source}); original record restored: {restored}")]
    EditFailed {
        source: Box<ApiError>,
        restored: bool,
    },
}

impl ApiError {
    /// True when the remote service itself rejected the call.
    pub fn is_remote(&self) -> bool {
        matches!(self, ApiError::Remote(_))
    }

    /// The error text as the service reported it, or this error's display
    /// text for locally detected failures.
    pub fn message(&self) -> String {
        match self {
            ApiError::Remote(value) => remote_message(value),
            other => other.to_string(),
        }
    }
}

/// Strings are reported verbatim; structured errors fall back to their
/// `message` field, then to compact JSON.
fn remote_message(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(text)) => text.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}
