//! HTTP request and response values.
//!
//! # Design
//! These types describe an exchange as plain data. A `RequestDescriptor` is
//! built once by the caller and never mutated afterwards; the coordinator can
//! therefore resend the same descriptor on every retry. A `RawResponse` is
//! produced by a `Transport` and consumed by the decoder.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use url::Url;

use crate::error::RequestError;

/// Timeout applied when the caller does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// An immutable description of one HTTP request.
///
/// Construct with [`RequestDescriptor::get`] or [`RequestDescriptor::new`] and
/// chain the by-value builder methods; there are no setters once the value is
/// handed to a coordinator.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: HttpMethod,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    timeout: Duration,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: &str) -> Result<Self, RequestError> {
        let url = Url::parse(url).map_err(|source| RequestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self::from_url(method, url))
    }

    pub fn from_url(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn get(url: &str) -> Result<Self, RequestError> {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the request body and set `content-type`.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, RequestError> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .header("content-type", "application/json")
            .body(body))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}

/// An HTTP response as received by a `Transport`.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
