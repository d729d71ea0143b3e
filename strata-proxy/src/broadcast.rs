//! Synchronous broadcast of mutating statements to every backend.

use hyper::StatusCode;
use strata_core::SharedRegistry;
use tracing::{error, info, warn};

use crate::error::{ProxyError, Result};
use crate::payload::RequestPayload;
use crate::upstream::{Dispatcher, UpstreamResponse};

/// What every backend said about one mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// Status per backend, in registry order.
    pub statuses: Vec<StatusCode>,
    /// Response of the first backend in registry order, if any backend exists.
    pub representative: Option<UpstreamResponse>,
}

impl MutationOutcome {
    /// True when every backend answered with status ≤ 299.
    pub fn all_good(&self) -> bool {
        self.statuses.iter().all(|s| s.as_u16() <= 299)
    }

    /// Collapse into the client-facing verdict.
    pub fn into_result(self) -> Result<Option<UpstreamResponse>> {
        if self.all_good() {
            return Ok(self.representative);
        }
        let failed = self.statuses.iter().filter(|s| s.as_u16() > 299).count();
        Err(ProxyError::PartialMutationFailure {
            failed,
            total: self.statuses.len(),
        })
    }
}

/// Applies a mutation to all backends, in registry order, one at a time.
///
/// Each backend is sent the statement with enforced retries. If one stays
/// unreachable the broadcast stops there and the remaining backends are not
/// contacted. Nothing already applied is rolled back.
#[derive(Debug, Clone)]
pub struct MutationBroadcaster {
    registry: SharedRegistry,
    dispatcher: Dispatcher,
}

impl MutationBroadcaster {
    /// Create a broadcaster over the given registry.
    pub fn new(registry: SharedRegistry, dispatcher: Dispatcher) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Send `payload` to every backend and gather the statuses.
    pub async fn broadcast(&self, payload: &RequestPayload) -> Result<MutationOutcome> {
        let mut statuses = Vec::with_capacity(self.registry.len());
        let mut representative = None;

        for backend in self.registry.iter() {
            let response = self
                .dispatcher
                .send(backend, payload, true)
                .await
                .map_err(|err| {
                    error!(backend = %backend, error = %err, "mutation aborted");
                    ProxyError::BroadcastAborted {
                        backend: backend.url().to_string(),
                        reason: err.to_string(),
                    }
                })?;

            if !response.is_success() {
                warn!(
                    backend = %backend,
                    status = response.status.as_u16(),
                    "backend rejected mutation"
                );
            }
            statuses.push(response.status);
            if representative.is_none() {
                representative = Some(response);
            }
        }

        let outcome = MutationOutcome {
            statuses,
            representative,
        };
        info!(
            backends = outcome.statuses.len(),
            all_good = outcome.all_good(),
            "mutation broadcast finished"
        );
        Ok(outcome)
    }

    /// Broadcast and reduce to a single verdict.
    pub async fn apply(&self, payload: &RequestPayload) -> Result<Option<UpstreamResponse>> {
        self.broadcast(payload).await?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{backends, payload, Behavior, ScriptedTransport};
    use std::sync::Arc;
    use std::time::Duration;
    use strata_core::{BackendRegistry, RetryPolicy};

    fn broadcaster(
        transport: Arc<ScriptedTransport>,
        registry: BackendRegistry,
        retries: u32,
    ) -> MutationBroadcaster {
        MutationBroadcaster::new(
            Arc::new(registry),
            Dispatcher::new(transport, RetryPolicy::new(retries, Duration::from_secs(1)), None),
        )
    }

    #[tokio::test]
    async fn all_good_keeps_first_backend_body() {
        let registry = backends(3);
        let transport = Arc::new(
            ScriptedTransport::new()
                .with(registry.get(0).unwrap(), Behavior::Status(200, "first"))
                .with(registry.get(1).unwrap(), Behavior::Status(204, ""))
                .with(registry.get(2).unwrap(), Behavior::Status(200, "third")),
        );
        let broadcaster = broadcaster(transport.clone(), registry, 0);

        let outcome = broadcaster.broadcast(&payload()).await.unwrap();
        assert!(outcome.all_good());
        assert_eq!(outcome.statuses.len(), 3);
        let body = outcome.into_result().unwrap().unwrap().body;
        assert_eq!(body.as_ref(), b"first");
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn one_error_status_fails_the_verdict() {
        let registry = backends(3);
        let transport = Arc::new(
            ScriptedTransport::new()
                .with(registry.get(0).unwrap(), Behavior::Status(200, "ok"))
                .with(registry.get(1).unwrap(), Behavior::Status(500, "boom"))
                .with(registry.get(2).unwrap(), Behavior::Status(200, "ok")),
        );
        let broadcaster = broadcaster(transport.clone(), registry, 0);

        let outcome = broadcaster.broadcast(&payload()).await.unwrap();
        assert!(!outcome.all_good());
        // Every backend was still contacted.
        assert_eq!(transport.calls().len(), 3);

        let err = broadcaster.apply(&payload()).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::PartialMutationFailure { failed: 1, total: 3 }
        ));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_backend_aborts_before_the_rest() {
        let registry = backends(3);
        let second = registry.get(1).unwrap().clone();
        let third = registry.get(2).unwrap().clone();
        let transport = Arc::new(
            ScriptedTransport::new()
                .with(registry.get(0).unwrap(), Behavior::Status(200, "ok"))
                .with(&second, Behavior::Down),
        );
        let broadcaster = broadcaster(transport.clone(), registry, 2);

        let err = broadcaster.broadcast(&payload()).await.unwrap_err();
        assert!(matches!(err, ProxyError::BroadcastAborted { .. }));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport.attempts(&second), 3);
        assert_eq!(transport.attempts(&third), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_broadcast_schedules_no_more_retries() {
        let registry = backends(3);
        let first = registry.get(0).unwrap().clone();
        let second = registry.get(1).unwrap().clone();
        let transport = Arc::new(ScriptedTransport::new().with(&first, Behavior::Down));
        let broadcaster = broadcaster(transport.clone(), registry, 5);

        let result =
            tokio::time::timeout(Duration::from_millis(500), broadcaster.broadcast(&payload()))
                .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts(&first), 1);
        assert_eq!(transport.attempts(&second), 0);
    }

    #[tokio::test]
    async fn empty_registry_is_vacuously_good() {
        let transport = Arc::new(ScriptedTransport::new());
        let broadcaster = broadcaster(transport, backends(0), 0);
        assert!(broadcaster.apply(&payload()).await.unwrap().is_none());
    }
}
