//! The inbound request as the dispatch engine sees it.

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::request::Parts;
use hyper::{Method, Request};
use strata_core::query::params::mask_path_and_query;
use strata_core::{Backend, QueryParams};

use crate::error::{ProxyError, Result};

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// True for headers that belong to one connection only.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Immutable snapshot of one inbound request.
///
/// A single payload is shared between every write-forwarding worker, so it is
/// never mutated. Per-destination changes (credentials, host) are applied to
/// the copy produced by [`RequestPayload::to_backend_request`].
#[derive(Debug, Clone)]
pub struct RequestPayload {
    method: Method,
    path: String,
    query: QueryParams,
    headers: HeaderMap,
    body: Bytes,
}

/// A payload shared between dispatch queues.
pub type SharedPayload = Arc<RequestPayload>;

impl RequestPayload {
    /// Assemble a payload from its parts.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: QueryParams,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            query,
            headers,
            body,
        }
    }

    /// Capture an inbound request once its body has been read.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        Self::new(
            parts.method.clone(),
            parts.uri.path(),
            parts.uri.query().map(QueryParams::parse).unwrap_or_default(),
            parts.headers.clone(),
            body,
        )
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters in their original order.
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Inbound headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Build the request sent to `backend`.
    ///
    /// Hop-by-hop headers and `host` are dropped. When the backend has a
    /// token it replaces any inbound `authorization` header.
    pub fn to_backend_request(&self, backend: &Backend) -> Result<Request<Full<Bytes>>> {
        let mut uri = backend.endpoint(&self.path);
        if !self.query.is_empty() {
            uri.push('?');
            uri.push_str(&self.query.encode());
        }

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(&uri)
            .body(Full::new(self.body.clone()))
            .map_err(|e| {
                let shown = mask_path_and_query(&self.path, Some(&self.query.encode()));
                ProxyError::InvalidRequest(format!("{backend}{shown}: {e}"))
            })?;

        let headers = request.headers_mut();
        for (name, value) in self.headers.iter() {
            if name == header::HOST || is_hop_by_hop(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        if let Some(token) = backend.token() {
            let mut value = HeaderValue::from_str(&format!("Token {token}")).map_err(|_| {
                ProxyError::InvalidRequest(format!("credential for {backend} is not a valid header"))
            })?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        Ok(request)
    }
}
