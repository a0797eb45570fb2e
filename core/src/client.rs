//! Typed client for the item API.
//!
//! # Design
//! `ItemsClient` holds a `base_url` and a coordinator and nothing else. Each
//! operation is split into a `build_*` method that produces a
//! `RequestDescriptor` and an async method that runs it through the
//! coordinator, so the request shape can be tested without a network.

use std::time::Duration;

use crate::coordinator::FetchCoordinator;
use crate::decode::{Decoder, JsonDecoder};
use crate::error::{FetchError, RequestError};
use crate::http::{HttpMethod, RequestDescriptor, DEFAULT_TIMEOUT};
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, Transport};
use crate::types::{CreateItem, Item};

/// Errors from `ItemsClient` operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone)]
pub struct ItemsClient<T = HttpTransport, D = JsonDecoder> {
    base_url: String,
    coordinator: FetchCoordinator<T, D>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<T: Transport, D: Decoder> ItemsClient<T, D> {
    pub fn new(base_url: &str, coordinator: FetchCoordinator<T, D>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            coordinator,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build_list_items(&self) -> Result<RequestDescriptor, RequestError> {
        Ok(RequestDescriptor::get(&format!("{}/items", self.base_url))?.timeout(self.timeout))
    }

    pub fn build_get_item(&self, id: u64) -> Result<RequestDescriptor, RequestError> {
        Ok(RequestDescriptor::get(&format!("{}/items/{id}", self.base_url))?.timeout(self.timeout))
    }

    pub fn build_create_item(&self, input: &CreateItem) -> Result<RequestDescriptor, RequestError> {
        RequestDescriptor::new(HttpMethod::Post, &format!("{}/items", self.base_url))?
            .timeout(self.timeout)
            .json_body(input)
    }

    pub async fn list_items(&self) -> Result<Vec<Item>, ClientError> {
        let request = self.build_list_items()?;
        Ok(self.coordinator.fetch(&request, &self.policy).await?)
    }

    pub async fn get_item(&self, id: u64) -> Result<Item, ClientError> {
        let request = self.build_get_item(id)?;
        Ok(self.coordinator.fetch(&request, &self.policy).await?)
    }

    /// Attempted once regardless of the client's retry policy.
    pub async fn create_item(&self, input: &CreateItem) -> Result<Item, ClientError> {
        let request = self.build_create_item(input)?;
        Ok(self.coordinator.fetch(&request, &RetryPolicy::none()).await?)
    }
}
