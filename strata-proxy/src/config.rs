//! Proxy configuration, read once from YAML at startup.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use strata_core::{BackendDescriptor, BackendRegistry, RetryPolicy};
use tracing::debug;

use crate::error::{ProxyError, Result};

/// Top-level configuration for the proxy.
///
/// Built once and handed to each component at construction; nothing reads
/// it through global state.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Backends in registry order.
    #[serde(alias = "urls", default)]
    pub backends: Vec<BackendEntry>,
    /// Interface to listen on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fixed wait between retries of the same backend.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,
    /// Retries after the first attempt for enforced sends.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Per-call timeout for reads and mutations.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_query_timeout")]
    pub query_timeout: Duration,
    /// Per-call timeout for forwarded writes; falls back to `query_timeout`.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub write_timeout: Option<Duration>,
    /// Capacity of each backend's dispatch queue.
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    /// How long shutdown waits for dispatch queues to drain.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,
    /// Optional TLS termination for the listener.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// One configured backend: a bare URL or a URL with a token.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BackendEntry {
    /// `- http://host:8086`
    Url(String),
    /// `- { url: http://host:8086, token: ... }`
    Detailed {
        /// Base URL.
        url: String,
        /// Credential sent as `Authorization: Token <token>`.
        #[serde(default)]
        token: Option<String>,
    },
}

impl From<&BackendEntry> for BackendDescriptor {
    fn from(entry: &BackendEntry) -> Self {
        match entry {
            BackendEntry::Url(url) => BackendDescriptor::new(url.clone()),
            BackendEntry::Detailed { url, token } => BackendDescriptor {
                url: url.clone(),
                token: token.clone(),
            },
        }
    }
}

/// Certificate and key for TLS termination.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM PKCS#8 private key.
    pub key_path: PathBuf,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_count() -> u32 {
    3
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Legacy per-backend queue capacity.
fn default_channel_size() -> usize {
    100
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            bind_address: default_bind_address(),
            port: default_port(),
            retry_delay: default_retry_delay(),
            retry_count: default_retry_count(),
            query_timeout: default_query_timeout(),
            write_timeout: None,
            channel_size: default_channel_size(),
            shutdown_timeout: default_shutdown_timeout(),
            tls: None,
        }
    }
}

impl ProxyConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.channel_size == 0 {
            return Err(ProxyError::Config("channel_size must be at least 1".into()));
        }
        self.listen_address()?;
        self.registry()?;
        Ok(())
    }

    /// Build the backend registry in configuration order.
    pub fn registry(&self) -> Result<BackendRegistry> {
        Ok(BackendRegistry::new(
            self.backends.iter().map(BackendDescriptor::from),
        )?)
    }

    /// Retry settings shared by all delivery paths.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, self.retry_delay)
    }

    /// Timeout applied by write-forwarding workers.
    pub fn effective_write_timeout(&self) -> Duration {
        self.write_timeout.unwrap_or(self.query_timeout)
    }

    /// Per-attempt limit for reads and mutations. A zero timeout means none.
    pub fn query_limit(&self) -> Option<Duration> {
        non_zero(self.query_timeout)
    }

    /// Per-attempt limit for write forwarding. A zero timeout means none.
    pub fn write_limit(&self) -> Option<Duration> {
        non_zero(self.effective_write_timeout())
    }

    /// Socket address built from `bind_address` and `port`.
    pub fn listen_address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_address.parse().map_err(|e| {
            ProxyError::Config(format!("invalid bind_address {:?}: {e}", self.bind_address))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn non_zero(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// load our config file from a path
pub fn load<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> anyhow::Result<T> {
    let path = path.as_ref();
    debug!("Reading config from {:?}", path);
    let file = std::fs::File::open(path).with_context(|| format!("cannot open {:?}", path))?;
    serde_yaml::from_reader(file).with_context(|| format!("cannot parse {:?}", path))
}
