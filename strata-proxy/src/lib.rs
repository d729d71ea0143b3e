//! Strata Proxy Engine
//!
//! A protocol-aware reverse proxy that presents a cluster of independent
//! time-series databases as one endpoint. Writes are fanned out to every
//! backend through bounded per-backend queues, reads are served by one
//! randomly chosen backend with failover, and mutating statements are
//! broadcast to every backend with an all-or-nothing verdict.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod payload;
pub mod router;
pub mod server;
pub mod tls;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::{MutationBroadcaster, MutationOutcome};
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use fanout::WriteFanout;
pub use handlers::{Proxy, Route, SharedProxy};
pub use payload::RequestPayload;
pub use router::ReadRouter;
pub use upstream::{Dispatcher, HttpTransport, Transport, UpstreamResponse};
