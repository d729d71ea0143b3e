//! Read routing with failover across backends.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_core::{CandidateSet, SharedRegistry};
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::payload::RequestPayload;
use crate::upstream::{Dispatcher, UpstreamResponse};

/// Serves a read from whichever backend answers first in a random walk.
///
/// Each attempt is best effort: a failed backend is never retried within the
/// same read, the walk moves on to another untried backend instead. Any HTTP
/// status ends the walk; only transport failures move it along.
#[derive(Debug, Clone)]
pub struct ReadRouter {
    registry: SharedRegistry,
    dispatcher: Dispatcher,
}

impl ReadRouter {
    /// Create a router over the given registry.
    pub fn new(registry: SharedRegistry, dispatcher: Dispatcher) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Route a read using an entropy-seeded generator.
    pub async fn route(&self, payload: &RequestPayload) -> Result<UpstreamResponse> {
        let mut rng = StdRng::from_entropy();
        self.route_with_rng(payload, &mut rng).await
    }

    /// Route a read, drawing backend choices from `rng`.
    pub async fn route_with_rng<R>(
        &self,
        payload: &RequestPayload,
        rng: &mut R,
    ) -> Result<UpstreamResponse>
    where
        R: Rng + Send + ?Sized,
    {
        let mut candidates = CandidateSet::new(self.registry.len());

        while let Some(index) = candidates.pick(rng) {
            let Some(backend) = self.registry.get(index) else {
                continue;
            };
            debug!(backend = %backend, path = payload.path(), "routing read");

            match self.dispatcher.send(backend, payload, false).await {
                Ok(response) => return Ok(response),
                Err(err) => warn!(
                    backend = %backend,
                    error = %err,
                    remaining = candidates.remaining(),
                    "read failed, trying another backend"
                ),
            }
        }

        Err(ProxyError::AllBackendsDown)
    }
}
