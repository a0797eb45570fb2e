//! Fetch orchestration: send, classify, decode, retry.
//!
//! # Design
//! All retry logic lives here; `Transport` and `Decoder` each do exactly one
//! attempt. Every call runs its own small state machine:
//!
//! ```text
//! Idle -> Sending -> Succeeded
//!                 -> Retrying -> Sending
//!                 -> Failed
//! ```
//!
//! The coordinator holds no per-call state, so one instance (or any clone of
//! it) can serve concurrent fetches. The only suspension points are the
//! transport call and the backoff sleep, and both race against the caller's
//! `CancellationToken`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::decode::{Decoder, JsonDecoder};
use crate::error::FetchError;
use crate::http::{RawResponse, RequestDescriptor};
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, Transport, TransportConfig};

/// Lifecycle of a single fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Sending { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Succeeded { .. } | FetchState::Failed { .. })
    }
}

type Observer = Arc<dyn Fn(&RequestDescriptor, FetchState) + Send + Sync>;

pub struct FetchCoordinator<T = HttpTransport, D = JsonDecoder> {
    transport: Arc<T>,
    decoder: D,
    observer: Option<Observer>,
}

impl<T, D: Clone> Clone for FetchCoordinator<T, D> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            decoder: self.decoder.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<T, D: fmt::Debug> fmt::Debug for FetchCoordinator<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("decoder", &self.decoder)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator<HttpTransport, JsonDecoder> {
    /// Coordinator over a fresh pooled HTTP transport.
    pub fn http(config: &TransportConfig) -> Result<Self, FetchError> {
        Ok(Self::new(HttpTransport::new(config)?))
    }
}

impl<T: Transport> FetchCoordinator<T, JsonDecoder> {
    pub fn new(transport: T) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    pub fn from_shared(transport: Arc<T>) -> Self {
        Self::with_decoder(transport, JsonDecoder)
    }
}

impl<T: Transport, D: Decoder> FetchCoordinator<T, D> {
    pub fn with_decoder(transport: Arc<T>, decoder: D) -> Self {
        Self {
            transport,
            decoder,
            observer: None,
        }
    }

    /// Report every state transition to `observer`, e.g. to show a
    /// "retrying" indicator.
    pub fn with_observer(
        mut self,
        observer: impl Fn(&RequestDescriptor, FetchState) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub async fn fetch<V: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
    ) -> Result<V, FetchError> {
        self.fetch_with_cancel(request, policy, &CancellationToken::new())
            .await
    }

    /// Fetch and decode, aborting with `FetchError::Cancelled` as soon as
    /// `cancel` fires.
    pub async fn fetch_with_cancel<V: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<V, FetchError> {
        self.run(request, policy, cancel, |response| {
            self.decoder.decode(&response.body)
        })
        .await
    }

    /// Send with retries and status classification, returning the 2xx
    /// response undecoded.
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
    ) -> Result<RawResponse, FetchError> {
        self.execute_with_cancel(request, policy, &CancellationToken::new())
            .await
    }

    pub async fn execute_with_cancel(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, FetchError> {
        self.run(request, policy, cancel, Ok).await
    }

    #[instrument(
        skip_all,
        fields(
            method = request.method().as_str(),
            url = %request.url(),
            max_attempts = policy.attempts()
        )
    )]
    async fn run<R>(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        finish: impl Fn(RawResponse) -> Result<R, FetchError>,
    ) -> Result<R, FetchError> {
        self.notify(request, FetchState::Idle);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return self.fail(request, attempt, FetchError::Cancelled);
            }

            attempt += 1;
            self.notify(request, FetchState::Sending { attempt });
            debug!(attempt, "sending request");

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = self.transport.send(request) => result,
            };

            let err = match sent.and_then(classify).and_then(&finish) {
                Ok(value) => {
                    debug!(attempt, "fetch succeeded");
                    self.notify(request, FetchState::Succeeded { attempts: attempt });
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !policy.should_retry(&err, attempt) {
                return self.fail(request, attempt, err);
            }

            let delay = policy.backoff.delay(attempt);
            warn!(
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "attempt failed; retrying"
            );
            self.notify(request, FetchState::Retrying { attempt, delay });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.fail(request, attempt, FetchError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn fail<R>(
        &self,
        request: &RequestDescriptor,
        attempts: u32,
        err: FetchError,
    ) -> Result<R, FetchError> {
        match &err {
            FetchError::Cancelled => debug!(attempts, "fetch cancelled"),
            _ => warn!(attempts, error = %err, "fetch failed"),
        }
        self.notify(request, FetchState::Failed { attempts });
        Err(err)
    }

    fn notify(&self, request: &RequestDescriptor, state: FetchState) {
        if let Some(observer) = &self.observer {
            observer(request, state);
        }
    }
}

impl<T, D> FetchCoordinator<T, D>
where
    T: Transport + 'static,
    D: Decoder + Clone + 'static,
{
    /// Run a fetch on the tokio runtime so the caller's thread never waits on
    /// the network. Must be called from within a runtime.
    pub fn spawn_fetch<V>(&self, request: RequestDescriptor, policy: RetryPolicy) -> FetchHandle<V>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let token = CancellationToken::new();
        let coordinator = self.clone();
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            coordinator
                .fetch_with_cancel(&request, &policy, &task_token)
                .await
        });
        FetchHandle { token, join }
    }
}

/// Map a non-2xx response to `FetchError::Status` without touching the body.
fn classify(response: RawResponse) -> Result<RawResponse, FetchError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Status {
            code: response.status,
            body: response.body,
        })
    }
}

/// A fetch running in the background.
#[derive(Debug)]
pub struct FetchHandle<V> {
    token: CancellationToken,
    join: JoinHandle<Result<V, FetchError>>,
}

impl<V> FetchHandle<V> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal result. Panics in the fetch task are resumed.
    pub async fn join(self) -> Result<V, FetchError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(FetchError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;

    use super::*;
    use crate::error::FetchErrorKind;
    use crate::retry::Backoff;
    use crate::types::Item;

    /// Transport that replays a fixed script of outcomes.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, FetchError>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &RequestDescriptor) -> Result<RawResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".into())))
        }
    }

    /// Decoder that counts how often it is invoked.
    #[derive(Clone, Default)]
    struct CountingDecoder {
        calls: Arc<AtomicUsize>,
    }

    impl Decoder for CountingDecoder {
        fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            JsonDecoder.decode(bytes)
        }
    }

    fn refused() -> Result<RawResponse, FetchError> {
        Err(FetchError::Transport("connection refused".into()))
    }

    fn ok(body: &'static str) -> Result<RawResponse, FetchError> {
        Ok(RawResponse::new(200, body))
    }

    fn items_request() -> RequestDescriptor {
        RequestDescriptor::get("https://api.example.test/items")
            .unwrap()
            .timeout(Duration::from_secs(2))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Backoff::Fixed(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn succeeds_after_two_transport_failures() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            refused(),
            refused(),
            ok(r#"{"id":1,"name":"widget"}"#),
        ]));
        let states = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&states);
        let coordinator = FetchCoordinator::from_shared(Arc::clone(&transport))
            .with_observer(move |_, state| recorded.lock().unwrap().push(state));
        let policy = RetryPolicy::new(
            3,
            Backoff::Exponential {
                base: Duration::from_millis(1),
                max: Duration::from_millis(10),
            },
        )
        .with_retryable([FetchErrorKind::Transport, FetchErrorKind::Timeout]);

        let item: Item = coordinator.fetch(&items_request(), &policy).await.unwrap();

        assert_eq!(
            item,
            Item {
                id: 1,
                name: "widget".to_string()
            }
        );
        assert_eq!(transport.calls(), 3);
        let states = states.lock().unwrap();
        assert_eq!(states.first(), Some(&FetchState::Idle));
        assert_eq!(states.last(), Some(&FetchState::Succeeded { attempts: 3 }));
        let retries = states
            .iter()
            .filter(|s| matches!(s, FetchState::Retrying { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn not_found_short_circuits_without_decoding() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::new(
            404,
            "no such item",
        ))]));
        let decoder = CountingDecoder::default();
        let coordinator = FetchCoordinator::with_decoder(Arc::clone(&transport), decoder.clone());

        let err = coordinator
            .fetch::<Item>(&items_request(), &fast_policy(3))
            .await
            .unwrap_err();

        match err {
            FetchError::Status { code, body } => {
                assert_eq!(code, 404);
                assert_eq!(&body[..], b"no such item");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(RawResponse::new(503, "busy")),
            ok(r#"{"id":1,"name":"widget"}"#),
        ]));
        let coordinator = FetchCoordinator::from_shared(Arc::clone(&transport));

        let err = coordinator
            .fetch::<Item>(&items_request(), &fast_policy(3))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn decode_failures_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(r#"{"id":1}"#),
            ok(r#"{"id":1,"name":"widget"}"#),
        ]));
        let coordinator = FetchCoordinator::from_shared(Arc::clone(&transport));

        let err = coordinator
            .fetch::<Item>(&items_request(), &fast_policy(3))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FetchErrorKind::Decode);
        assert_eq!(err.field(), Some("name"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            refused(),
            Err(FetchError::Timeout(Duration::from_secs(2))),
        ]));
        let coordinator = FetchCoordinator::from_shared(Arc::clone(&transport));

        let err = coordinator
            .fetch::<Item>(&items_request(), &fast_policy(2))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout(_)));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn kinds_outside_retryable_set_fail_immediately() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(FetchError::Timeout(Duration::from_secs(2))),
            ok(r#"{"id":1,"name":"widget"}"#),
        ]));
        let coordinator = FetchCoordinator::from_shared(Arc::clone(&transport));
        let policy = fast_policy(3).with_retryable([FetchErrorKind::Transport]);

        let err = coordinator
            .fetch::<Item>(&items_request(), &policy)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FetchErrorKind::Timeout);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cancel_during_backoff_returns_promptly() {
        let transport = Arc::new(ScriptedTransport::new(vec![refused(), refused(), refused()]));
        let coordinator = FetchCoordinator::from_shared(Arc::clone(&transport));
        let backoff = Duration::from_secs(2);
        let policy = RetryPolicy::new(3, Backoff::Fixed(backoff));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = coordinator
            .fetch_with_cancel::<Item>(&items_request(), &policy, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(started.elapsed() < backoff, "took {:?}", started.elapsed());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cancel_while_sending_aborts_attempt() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![ok(r#"{"id":1,"name":"widget"}"#)])
                .with_delay(Duration::from_secs(5)),
        );
        let coordinator = FetchCoordinator::from_shared(Arc::clone(&transport));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = coordinator
            .fetch_with_cancel::<Item>(&items_request(), &fast_policy(3), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancelled_before_start_never_sends() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(r#"{"id":1,"name":"w"}"#)]));
        let coordinator = FetchCoordinator::from_shared(Arc::clone(&transport));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = coordinator
            .fetch_with_cancel::<Item>(&items_request(), &fast_policy(3), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn execute_returns_raw_success_body() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse::new(201, "created"))]);
        let coordinator = FetchCoordinator::new(transport);

        let response = coordinator
            .execute(&items_request(), &RetryPolicy::none())
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(&response.body[..], b"created");
    }

    #[tokio::test]
    async fn spawned_fetch_can_be_cancelled() {
        let transport = ScriptedTransport::new(vec![refused(), refused()]);
        let coordinator = FetchCoordinator::new(transport);
        let policy = RetryPolicy::new(2, Backoff::Fixed(Duration::from_secs(10)));

        let handle = coordinator.spawn_fetch::<Item>(items_request(), policy);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        handle.cancel();
        assert!(handle.cancellation_token().is_cancelled());

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(coordinator.transport().calls(), 1);
    }

    #[tokio::test]
    async fn external_token_cancels_spawned_fetch() {
        let transport = ScriptedTransport::new(vec![ok(r#"{"id":1,"name":"a"}"#)])
            .with_delay(Duration::from_secs(10));
        let coordinator = FetchCoordinator::new(transport);

        let handle = coordinator.spawn_fetch::<Item>(items_request(), RetryPolicy::none());
        let token = handle.cancellation_token().clone();
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(handle.join().await, Err(FetchError::Cancelled)));
    }

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(FetchState::Succeeded { attempts: 1 }.is_terminal());
        assert!(FetchState::Failed { attempts: 3 }.is_terminal());
        assert!(!FetchState::Idle.is_terminal());
        assert!(!FetchState::Sending { attempt: 1 }.is_terminal());
        assert!(!FetchState::Retrying {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
        .is_terminal());
    }

    #[tokio::test]
    async fn spawned_fetch_delivers_value() {
        let transport = ScriptedTransport::new(vec![ok(r#"{"id":9,"name":"bolt"}"#)]);
        let coordinator = FetchCoordinator::new(transport);

        let handle = coordinator.spawn_fetch::<Item>(items_request(), RetryPolicy::none());
        let item = handle.join().await.unwrap();
        assert_eq!(item.id, 9);
    }
}
