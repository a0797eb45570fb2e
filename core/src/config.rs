//! Client configuration, persisted as a JSON preferences file.
//!
//! Every field has a default, so a partial or missing file still yields a
//! usable configuration. Environment variables override the file:
//!
//! | variable | field |
//! |----------|-------|
//! | `INTENTIONS_CLOUD_URL` | `cloud_url` |
//! | `INTENTIONS_LOCAL_PATH` | `local_path` |
//! | `INTENTIONS_TIMEOUT_MS` | `request_timeout_ms` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FetchErrorKind;
use crate::retry::{Backoff, RetryPolicy};
use crate::store::{LocalStore, StoreError};
use crate::transport::TransportConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Store(#[from] StoreError),

    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Blob URL holding the shared task list; `None` keeps data local only.
    pub cloud_url: Option<String>,
    pub local_path: PathBuf,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cloud_url: None,
            local_path: PathBuf::from("taskList.json"),
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from `path`, writing the defaults back when the file is missing.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let store = LocalStore::new(path.as_ref());
        match store.load::<ClientConfig>().await? {
            Some(config) => Ok(config),
            None => {
                let config = ClientConfig::default();
                store.save(&config).await?;
                Ok(config)
            }
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        LocalStore::new(path.as_ref()).save(self).await?;
        Ok(())
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = lookup("INTENTIONS_CLOUD_URL") {
            self.cloud_url = (!url.is_empty()).then_some(url);
        }
        if let Some(path) = lookup("INTENTIONS_LOCAL_PATH") {
            self.local_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("INTENTIONS_TIMEOUT_MS") {
            self.request_timeout_ms = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "INTENTIONS_TIMEOUT_MS",
                value,
            })?;
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Serializable form of `RetryPolicy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    /// Upper bound for exponential backoff; ignored for fixed.
    pub max_delay_ms: u64,
    pub retryable: Vec<FetchErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            retryable: vec![FetchErrorKind::Transport, FetchErrorKind::Timeout],
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.base_delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            },
        };
        RetryPolicy::new(self.max_attempts, backoff).with_retryable(self.retryable.iter().copied())
    }
}
