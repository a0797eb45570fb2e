//! Error types for the fetch-and-decode layer.
//!
//! # Design
//! `FetchError` is the single terminal value a caller sees for a failed fetch.
//! Each variant carries what a user-facing message needs: the status and body
//! for non-2xx responses, the field path and position for decode failures.
//! `FetchErrorKind` is the fieldless tag used by `RetryPolicy` to decide which
//! failures are worth another attempt.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Errors returned by `Transport`, `Decoder` and `FetchCoordinator`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Connectivity failure: DNS, refused connection, TLS, broken body stream.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request did not complete within its descriptor's timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a status outside `200..300`.
    #[error("HTTP {code}: {}", String::from_utf8_lossy(.body))]
    Status { code: u16, body: Bytes },

    /// The payload was not valid JSON or did not match the expected schema.
    #[error("{}", decode_message(.field, .reason, .line, .column))]
    Decode {
        /// Dotted path of the offending field, e.g. `items[2].name`.
        field: Option<String>,
        reason: String,
        line: usize,
        column: usize,
        /// Byte offset into the payload, known for syntax errors.
        offset: Option<usize>,
    },

    /// The caller cancelled the fetch.
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Transport(_) => FetchErrorKind::Transport,
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::Status { .. } => FetchErrorKind::Status,
            FetchError::Decode { .. } => FetchErrorKind::Decode,
            FetchError::Cancelled => FetchErrorKind::Cancelled,
        }
    }

    /// Status code for `Status` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Field path for `Decode` errors, when the failure is tied to one field.
    pub fn field(&self) -> Option<&str> {
        match self {
            FetchError::Decode { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

fn decode_message(field: &Option<String>, reason: &str, line: &usize, column: &usize) -> String {
    let mut message = match field {
        Some(field) => format!("decode failed at `{field}`: {reason}"),
        None => format!("decode failed: {reason}"),
    };
    if *line > 0 {
        message.push_str(&format!(" (line {line}, column {column})"));
    }
    message
}

/// Tag of a `FetchError` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchErrorKind {
    Transport,
    Timeout,
    Status,
    Decode,
    Cancelled,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchErrorKind::Transport => "transport",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Status => "status",
            FetchErrorKind::Decode => "decode",
            FetchErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors raised while building a `RequestDescriptor`.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The request payload could not be serialized to JSON.
    #[error("request body serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}
