//! Backend server models.

use std::fmt;
use std::sync::Arc;

/// A unique identifier for a backend server, equal to its position in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub u32);

/// A backend as it appears in configuration, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Base URL of the backend, e.g. `http://10.0.0.7:8086`.
    pub url: String,
    /// Optional credential attached to every outbound request for this backend.
    pub token: Option<String>,
}

impl BackendDescriptor {
    /// Create a descriptor without a credential.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    /// Attach a credential to the descriptor.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Represents a single upstream time-series database.
///
/// Backends are created once when the registry is built and never change
/// afterwards. Identity is the normalized base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// The unique ID of the backend
    pub id: BackendId,
    url: String,
    token: Option<String>,
}

impl Backend {
    pub(crate) fn new(id: BackendId, url: String, token: Option<String>) -> Self {
        Self { id, url, token }
    }

    /// Base URL without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The configured credential, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Join an inbound path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.url, path)
        } else {
            format!("{}/{}", self.url, path)
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// A thread-safe reference to a Backend.
pub type SharedBackend = Arc<Backend>;
