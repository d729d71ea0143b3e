//! Error kinds raised by the dispatch engine.

use hyper::StatusCode;
use strata_core::RegistryError;
use thiserror::Error;

/// Everything that can go wrong between accepting a request and answering it.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A backend could not be reached, or the exchange did not complete.
    #[error("transport error talking to {backend}: {message}")]
    Transport {
        /// Backend base URL.
        backend: String,
        /// Underlying failure.
        message: String,
    },

    /// Every backend was tried for a read and none answered.
    #[error("all backends are down")]
    AllBackendsDown,

    /// All backends answered a mutation but at least one with status > 299.
    #[error("{failed} of {total} backends failed to execute the mutation")]
    PartialMutationFailure {
        /// Backends that answered with an error status.
        failed: usize,
        /// Backends contacted.
        total: usize,
    },

    /// A backend stayed unreachable after retries, so the broadcast stopped early.
    #[error("mutation aborted at {backend}: {reason}")]
    BroadcastAborted {
        /// Backend that could not be reached.
        backend: String,
        /// Last transport failure.
        reason: String,
    },

    /// The inbound request body could not be read.
    #[error("failed to read request payload: {0}")]
    PayloadRead(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A dispatch queue no longer accepts payloads.
    #[error("backend {0} is not accepting writes")]
    BackendUnavailable(String),

    /// The outbound request could not be built; retrying cannot help.
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backend registry could not be built.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS material was rejected.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Result alias used across the proxy.
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Status the client sees when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Transport { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the `error` field of the JSON error body.
    ///
    /// Never names an individual backend.
    pub fn client_message(&self) -> &'static str {
        match self {
            ProxyError::AllBackendsDown => "all instances are down",
            ProxyError::PartialMutationFailure { .. } => {
                "Some instances failed to execute the query"
            }
            ProxyError::BroadcastAborted { .. } => "An instance was unreachable, mutation aborted",
            ProxyError::PayloadRead(_) => "failed to read request body",
            ProxyError::BackendUnavailable(_) => "proxy is not accepting writes",
            ProxyError::Transport { .. } => "upstream request failed",
            _ => "internal proxy error",
        }
    }
}
