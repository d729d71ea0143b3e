//! In-memory transport used by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use strata_core::{Backend, BackendDescriptor, BackendRegistry, QueryParams};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::error::{ProxyError, Result};
use crate::payload::RequestPayload;
use crate::upstream::{Transport, UpstreamResponse};

/// How a scripted backend answers.
#[derive(Clone)]
pub(crate) enum Behavior {
    Status(u16, &'static str),
    Down,
    FailTimes(u32, u16),
    Slow(Duration, u16),
    Gated(Arc<Semaphore>),
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub backend: String,
    pub at: Instant,
    pub body: Bytes,
    pub authorization: Option<String>,
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: HashMap<String, Behavior>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: &Backend, behavior: Behavior) -> Self {
        self.script.insert(backend.url().to_string(), behavior);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts(&self, backend: &Backend) -> usize {
        self.attempt_times(backend).len()
    }

    pub fn attempt_times(&self, backend: &Backend) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|c| c.backend == backend.url())
            .map(|c| c.at)
            .collect()
    }

    pub fn contacted(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.backend).collect()
    }

    async fn answer(&self, backend: &Backend, attempt: usize) -> Result<UpstreamResponse> {
        let behavior = self
            .script
            .get(backend.url())
            .cloned()
            .unwrap_or(Behavior::Status(200, ""));
        match behavior {
            Behavior::Status(code, body) => Ok(response(backend, code, body)),
            Behavior::Down => Err(ProxyError::Transport {
                backend: backend.url().to_string(),
                message: "connection refused".into(),
            }),
            Behavior::FailTimes(failures, _) if attempt <= failures as usize => {
                Err(ProxyError::Transport {
                    backend: backend.url().to_string(),
                    message: "connection reset".into(),
                })
            }
            Behavior::FailTimes(_, code) => Ok(response(backend, code, "")),
            Behavior::Slow(delay, code) => {
                tokio::time::sleep(delay).await;
                Ok(response(backend, code, ""))
            }
            Behavior::Gated(gate) => {
                gate.acquire().await.map(|permit| permit.forget()).ok();
                Ok(response(backend, 204, ""))
            }
        }
    }
}

fn response(backend: &Backend, code: u16, body: &'static str) -> UpstreamResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        "x-backend",
        HeaderValue::from_str(backend.url()).unwrap(),
    );
    UpstreamResponse {
        status: StatusCode::from_u16(code).unwrap(),
        headers,
        body: Bytes::from_static(body.as_bytes()),
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        backend: &Backend,
        payload: &RequestPayload,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse> {
        let request = payload.to_backend_request(backend)?;
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                backend: backend.url().to_string(),
                at: Instant::now(),
                body: payload.body().clone(),
                authorization: request
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            });
            calls.iter().filter(|c| c.backend == backend.url()).count()
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.answer(backend, attempt))
                .await
                .map_err(|_| ProxyError::Transport {
                    backend: backend.url().to_string(),
                    message: "timed out".into(),
                })?,
            None => self.answer(backend, attempt).await,
        }
    }
}

/// Registry of `n` backends at `http://backend-{i}:8086`.
pub(crate) fn backends(n: usize) -> BackendRegistry {
    BackendRegistry::new((0..n).map(|i| BackendDescriptor::new(format!("http://backend-{i}:8086"))))
        .unwrap()
}

pub(crate) fn payload() -> RequestPayload {
    payload_with_body("cpu,host=a value=1")
}

pub(crate) fn payload_with_body(body: &'static str) -> RequestPayload {
    RequestPayload::new(
        Method::POST,
        "/write",
        QueryParams::parse("db=mydb"),
        HeaderMap::new(),
        Bytes::from_static(body.as_bytes()),
    )
}
