//! Async fetch-and-decode data layer for the intentions task service.
//!
//! # Overview
//! A request is described by a `RequestDescriptor`, sent by a `Transport`,
//! classified by status, and decoded into a typed value by a `Decoder`.
//! `FetchCoordinator` runs that pipeline under a `RetryPolicy` and a
//! cancellation token, and reports every failure as one `FetchError`.
//!
//! # Design
//! - `Transport` and `Decoder` are traits, so tests swap in scripted fakes
//!   and count decode calls without a network.
//! - Only the coordinator retries. The transport makes exactly one attempt.
//! - Non-2xx responses fail with `FetchError::Status` before any decoding.
//! - `ItemsClient` and `CloudStore` build requests with `build_*` methods and
//!   hand them to the coordinator, keeping the request shape testable.
//! - Task persistence (`LocalStore`, `CloudStore`, `TaskSync`) sits on top of
//!   the same pipeline; DTOs are defined independently from the mock-server
//!   crate and integration tests catch schema drift.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod decode;
pub mod error;
pub mod http;
pub mod retry;
pub mod store;
pub mod sync;
pub mod task;
pub mod transport;
pub mod types;
pub mod undo;

pub use client::{ClientError, ItemsClient};
pub use config::{ClientConfig, ConfigError, RetryConfig};
pub use coordinator::{FetchCoordinator, FetchHandle, FetchState};
pub use decode::{decode, Decoder, JsonDecoder};
pub use error::{FetchError, FetchErrorKind, RequestError};
pub use http::{HttpMethod, RawResponse, RequestDescriptor};
pub use retry::{Backoff, RetryPolicy};
pub use store::{CloudStore, LocalStore, StoreError};
pub use sync::TaskSync;
pub use task::{Priority, Task};
pub use transport::{HttpTransport, Transport, TransportConfig};
pub use types::{CreateItem, Item};
pub use undo::UndoHistory;

pub use tokio_util::sync::CancellationToken;
