//! Errors raised while building the backend registry.

use thiserror::Error;

/// Reasons a set of backend descriptors cannot form a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The backend address is not a valid absolute URL.
    #[error("invalid backend url {url:?}: {source}")]
    InvalidUrl {
        /// The offending address as configured.
        url: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },

    /// Only plain `http` backends are supported.
    #[error("unsupported scheme {scheme:?} for backend {url:?}")]
    UnsupportedScheme {
        /// The offending address as configured.
        url: String,
        /// The scheme that was found.
        scheme: String,
    },

    /// Two descriptors share the same address.
    #[error("backend {0:?} is configured more than once")]
    Duplicate(String),
}
