//! Raw HTTP exchange.
//!
//! # Design
//! `Transport` sends one `RequestDescriptor` and hands back whatever the
//! server answered, including 4xx and 5xx responses. It never retries and
//! never looks at the payload. `HttpTransport` owns a pooled
//! `reqwest::Client`; clones share the pool, so one transport can serve any
//! number of concurrent fetches.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::FetchError;
use crate::http::{HttpMethod, RawResponse, RequestDescriptor};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, FetchError>;
}

/// Connection pool settings for `HttpTransport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_ms: u64,
    pub tcp_keepalive_ms: Option<u64>,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 10,
            pool_idle_timeout_ms: 90_000,
            tcp_keepalive_ms: Some(60_000),
            connect_timeout_ms: 10_000,
            user_agent: concat!("intentions-core/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, FetchError> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_millis(config.pool_idle_timeout_ms))
            .tcp_keepalive(config.tcp_keepalive_ms.map(Duration::from_millis))
            .connect_timeout(connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }

    async fn exchange(&self, request: &RequestDescriptor) -> Result<RawResponse, FetchError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method()), request.url().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e, request))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(e, request))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn map_error(&self, err: reqwest::Error, request: &RequestDescriptor) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout(self.timeout_limit(err.is_connect(), request));
        }
        // reqwest's Display omits the underlying io/hyper cause.
        let mut reason = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            reason.push_str(": ");
            reason.push_str(&cause.to_string());
            source = cause.source();
        }
        FetchError::Transport(reason)
    }

    /// The limit that fired: the pool's connect timeout while connecting,
    /// otherwise the request's own timeout.
    fn timeout_limit(&self, connecting: bool, request: &RequestDescriptor) -> Duration {
        if connecting {
            self.connect_timeout
        } else {
            request.timeout_duration()
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(
        skip(self, request),
        fields(method = request.method().as_str(), url = %request.url())
    )]
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, FetchError> {
        let timeout = request.timeout_duration();
        match tokio::time::timeout(timeout, self.exchange(request)).await {
            Ok(Ok(response)) => {
                debug!(status = response.status, bytes = response.body.len(), "received response");
                Ok(response)
            }
            Ok(Err(err)) => {
                debug!(error = %err, "request failed");
                Err(err)
            }
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(FetchError::Timeout(timeout))
            }
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
    }
}
