//! HTTP surface: route classification and response shaping.

use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use strata_core::{QueryParams, SharedRegistry, StatementKind};
use tracing::{debug, error};

use crate::broadcast::MutationBroadcaster;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::fanout::WriteFanout;
use crate::payload::{is_hop_by_hop, RequestPayload};
use crate::router::ReadRouter;
use crate::upstream::{Dispatcher, Transport, UpstreamResponse};

/// Response type produced by the proxy.
pub type ProxyResponse = Response<Full<Bytes>>;

/// Which engine component serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `GET /`: local status document.
    Status,
    /// Line-protocol write, fanned out to every backend.
    Write,
    /// Query endpoint; the statement text decides read or mutation.
    Query,
    /// Served by one backend via the read router.
    Read,
    /// Broadcast to every backend.
    Mutation,
    /// Answered locally with 501.
    Unsupported,
}

impl Route {
    /// Map method and path to a route.
    pub fn classify(method: &Method, path: &str) -> Self {
        let bucket_or_task =
            path.starts_with("/api/v2/bucket") || path.starts_with("/api/v2/tasks");

        match (method, path) {
            (&Method::GET, "/") => Route::Status,
            (&Method::POST, "/write" | "/api/v2/write") => Route::Write,
            (&Method::GET | &Method::POST, "/query" | "/api/v2/query") => Route::Query,
            _ if path.starts_with("/api/v2/authorizations") => Route::Unsupported,
            (&Method::DELETE, _) if path.starts_with("/api/v2/orgs") => Route::Unsupported,
            (&Method::POST, "/api/v2/delete") => Route::Mutation,
            (&Method::GET | &Method::HEAD, _) if bucket_or_task => Route::Read,
            (&Method::POST | &Method::PUT | &Method::PATCH | &Method::DELETE, _)
                if bucket_or_task =>
            {
                Route::Mutation
            }
            (&Method::GET | &Method::HEAD, _) => Route::Read,
            _ => Route::Unsupported,
        }
    }
}

/// The dispatch engine behind the HTTP listener.
#[derive(Debug)]
pub struct Proxy {
    registry: SharedRegistry,
    fanout: WriteFanout,
    reads: ReadRouter,
    mutations: MutationBroadcaster,
}

/// A shared reference to the proxy.
pub type SharedProxy = Arc<Proxy>;

impl Proxy {
    /// Validate `config`, build the registry and start the write workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &ProxyConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let registry: SharedRegistry = Arc::new(config.registry()?);

        let queries = Dispatcher::new(transport, config.retry_policy(), config.query_limit());
        let writes = queries.with_timeout(config.write_limit());

        Ok(Self {
            fanout: WriteFanout::spawn(&registry, writes, config.channel_size),
            reads: ReadRouter::new(Arc::clone(&registry), queries.clone()),
            mutations: MutationBroadcaster::new(Arc::clone(&registry), queries),
            registry,
        })
    }

    /// The configured backends.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// The write fanout pipeline.
    pub fn fanout(&self) -> &WriteFanout {
        &self.fanout
    }

    /// Close the dispatch queues and wait for them to drain.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.fanout.shutdown(timeout).await
    }

    /// Serve one inbound request.
    pub async fn handle<B>(&self, request: Request<B>) -> ProxyResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let route = Route::classify(request.method(), request.uri().path());
        let result = match read_payload(request).await {
            Ok(payload) => self.dispatch(route, payload).await,
            Err(err) => Err(err),
        };

        result.unwrap_or_else(|err| {
            error!(?route, error = %err, "request failed");
            error_response(&err)
        })
    }

    async fn dispatch(&self, route: Route, payload: RequestPayload) -> Result<ProxyResponse> {
        match route {
            Route::Status => Ok(self.status()),
            Route::Unsupported => Ok(not_supported()),
            Route::Write => {
                self.fanout.submit(payload).await?;
                Ok(empty(StatusCode::NO_CONTENT))
            }
            Route::Read => self.reads.route(&payload).await.map(forwarded),
            Route::Mutation => self.mutate(&payload).await,
            Route::Query => {
                let statement = statement_text(&payload).unwrap_or_default();
                match StatementKind::of(&statement) {
                    StatementKind::Mutation => {
                        debug!("query classified as mutation");
                        self.mutate(&payload).await
                    }
                    StatementKind::Read => self.reads.route(&payload).await.map(forwarded),
                }
            }
        }
    }

    async fn mutate(&self, payload: &RequestPayload) -> Result<ProxyResponse> {
        let mut response = match self.mutations.apply(payload).await? {
            Some(representative) => {
                with_backend_headers(StatusCode::OK, &representative.headers, representative.body)
            }
            None => empty(StatusCode::OK),
        };
        response
            .headers_mut()
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        Ok(response)
    }

    fn status(&self) -> ProxyResponse {
        let backends: Vec<Value> = self
            .fanout
            .snapshot()
            .iter()
            .map(|queue| {
                json!({
                    "url": queue.backend.url(),
                    "queued": queue.queued,
                    "capacity": queue.capacity,
                    "delivered": queue.stats.delivered(),
                    "rejected": queue.stats.rejected(),
                    "dropped": queue.stats.dropped(),
                })
            })
            .collect();

        json_response(
            StatusCode::OK,
            &json!({
                "status": "ok",
                "message": "InfluxDB proxy is running",
                "active_instances": self.registry.len(),
                "backends": backends,
            }),
        )
    }
}

async fn read_payload<B>(request: Request<B>) -> Result<RequestPayload>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = request.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| ProxyError::PayloadRead(e.into()))?
        .to_bytes();
    Ok(RequestPayload::from_parts(&parts, body))
}

/// Find the statement text of a query request.
///
/// Looks at the `q` parameter, then a form-encoded body's `q` field, then for
/// the v2 endpoint a JSON body's `query` field or the raw body.
pub fn statement_text(payload: &RequestPayload) -> Option<String> {
    if let Some(q) = payload.query().get("q") {
        return Some(q.to_string());
    }

    let content_type = payload
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let body = std::str::from_utf8(payload.body()).ok()?;

    if content_type.starts_with("application/x-www-form-urlencoded") {
        if let Some(q) = QueryParams::parse(body).get("q") {
            return Some(q.to_string());
        }
    }

    if payload.path() != "/api/v2/query" {
        return None;
    }
    if content_type.starts_with("application/json") {
        let value: Value = serde_json::from_str(body).ok()?;
        return value.get("query").and_then(Value::as_str).map(str::to_string);
    }
    Some(body.to_string())
}

fn empty(status: StatusCode) -> ProxyResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn with_backend_headers(status: StatusCode, headers: &HeaderMap, body: Bytes) -> ProxyResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let target = response.headers_mut();
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        target.append(name.clone(), value.clone());
    }
    response
}

fn forwarded(upstream: UpstreamResponse) -> ProxyResponse {
    with_backend_headers(upstream.status, &upstream.headers, upstream.body)
}

fn json_response(status: StatusCode, value: &Value) -> ProxyResponse {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(err: &ProxyError) -> ProxyResponse {
    json_response(err.status_code(), &json!({ "error": err.client_message() }))
}

fn not_supported() -> ProxyResponse {
    json_response(
        StatusCode::NOT_IMPLEMENTED,
        &json!({
            "code": "not implemented",
            "message": "feature not supported by the proxy",
        }),
    )
}
