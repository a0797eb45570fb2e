//! Start-up and save flow for the task list.
//!
//! # Design
//! The local file is the working copy. On `bootstrap` the cloud copy, when
//! one is configured and reachable, wins over the local one and is written
//! back to disk. Cloud failures never prevent start-up: they are logged and
//! the local copy is used.

use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::coordinator::FetchCoordinator;
use crate::decode::{Decoder, JsonDecoder};
use crate::store::{CloudStore, LocalStore, StoreError};
use crate::task::Task;
use crate::transport::{HttpTransport, Transport};

#[derive(Debug, Clone)]
pub struct TaskSync<T = HttpTransport, D = JsonDecoder> {
    local: LocalStore,
    cloud: Option<CloudStore<T, D>>,
}

impl TaskSync<HttpTransport, JsonDecoder> {
    pub fn from_config(config: &ClientConfig) -> Result<Self, StoreError> {
        let local = LocalStore::new(&config.local_path);
        let cloud = match &config.cloud_url {
            Some(url) => {
                let coordinator = FetchCoordinator::http(&config.transport)?;
                Some(
                    CloudStore::new(url, coordinator)?
                        .with_policy(config.retry.policy())
                        .with_timeout(config.request_timeout()),
                )
            }
            None => None,
        };
        Ok(Self { local, cloud })
    }
}

impl<T: Transport, D: Decoder> TaskSync<T, D> {
    pub fn new(local: LocalStore, cloud: Option<CloudStore<T, D>>) -> Self {
        Self { local, cloud }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn cloud(&self) -> Option<&CloudStore<T, D>> {
        self.cloud.as_ref()
    }

    /// Load the task list, preferring the cloud copy, and save the result
    /// locally. Only a failure to write the local file is an error.
    pub async fn bootstrap(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks = match self.local.load::<Vec<Task>>().await {
            Ok(tasks) => tasks.unwrap_or_default(),
            Err(err @ StoreError::Corrupt { .. }) => {
                warn!(error = %err, "ignoring unreadable local task list");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        if let Some(cloud) = &self.cloud {
            match cloud.pull::<Vec<Task>>().await {
                Ok(Some(remote)) => {
                    info!(url = %cloud.url(), count = remote.len(), "using cloud task list");
                    tasks = remote;
                }
                Ok(None) => info!(url = %cloud.url(), "no cloud task list yet"),
                Err(err) => warn!(url = %cloud.url(), error = %err, "cloud task list unavailable"),
            }
        }

        self.local.save(&tasks).await?;
        Ok(tasks)
    }

    /// Save locally, then upload when a cloud location is configured.
    pub async fn persist(&self, tasks: &[Task]) -> Result<(), StoreError> {
        self.local.save(tasks).await?;
        if let Some(cloud) = &self.cloud {
            cloud.push(tasks).await?;
        }
        Ok(())
    }

    /// Upload without touching the local file.
    pub async fn push(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let cloud = self.cloud.as_ref().ok_or(StoreError::NotConfigured)?;
        cloud.push(tasks).await
    }
}
