//! Delivery of one payload to one backend.
//!
//! [`Transport`] performs a single exchange. [`Dispatcher`] wraps a transport
//! with the retry policy and a per-call timeout, and is what the fanout
//! workers, the read router and the mutation broadcaster call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{HeaderMap, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use strata_core::{Backend, RetryDecision, RetryPolicy};
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::payload::RequestPayload;

/// A complete backend answer. Any status code counts as a response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Status returned by the backend.
    pub status: StatusCode,
    /// Headers returned by the backend.
    pub headers: HeaderMap,
    /// Fully buffered body.
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Status ≤ 299.
    pub fn is_success(&self) -> bool {
        self.status.as_u16() <= 299
    }
}

/// One attempt to exchange a payload with a backend.
///
/// Implementations report unreachable backends, timeouts and malformed
/// responses as [`ProxyError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send `payload` to `backend` and buffer the answer.
    async fn send(
        &self,
        backend: &Backend,
        payload: &RequestPayload,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse>;
}

/// HTTP/1.1 transport backed by a pooled `hyper-util` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpTransport {
    /// Create a transport with its own connection pool.
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_error(backend: &Backend, message: impl ToString) -> ProxyError {
    ProxyError::Transport {
        backend: backend.url().to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        backend: &Backend,
        payload: &RequestPayload,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse> {
        let request = payload.to_backend_request(backend)?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| transport_error(backend, e))?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| transport_error(backend, format!("reading body: {e}")))?
                .to_bytes();
            Ok(UpstreamResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| transport_error(backend, format!("timed out after {limit:?}")))?,
            None => exchange.await,
        }
    }
}

/// A transport combined with retry policy and timeout.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher. `timeout = None` lets calls run unbounded.
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            policy,
            timeout,
        }
    }

    /// Same transport and policy with a different per-call timeout.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            policy: self.policy,
            timeout,
        }
    }

    /// The retry policy in force.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `payload` to one backend.
    ///
    /// With `enforce` set, transport failures are retried against the same
    /// backend after the fixed delay until the policy gives up. Without it the
    /// first failure is returned. A request that cannot be built is never
    /// retried.
    pub async fn send(
        &self,
        backend: &Backend,
        payload: &RequestPayload,
        enforce: bool,
    ) -> Result<UpstreamResponse> {
        let mut state = self.policy.start(enforce);
        loop {
            let attempt = state.attempt();
            match self.transport.send(backend, payload, self.timeout).await {
                Ok(response) => {
                    debug!(
                        backend = %backend,
                        status = response.status.as_u16(),
                        attempt,
                        "backend responded"
                    );
                    return Ok(response);
                }
                Err(err @ ProxyError::InvalidRequest(_)) => return Err(err),
                Err(err) => match state.on_failure() {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            backend = %backend,
                            attempt,
                            error = %err,
                            "request failed, retrying in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        debug!(backend = %backend, attempt, error = %err, "giving up");
                        return Err(err);
                    }
                },
            }
        }
    }
}
