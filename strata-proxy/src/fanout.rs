//! Asynchronous write fanout: one bounded queue and one worker per backend.
//!
//! `submit` places the same shared payload on every backend's queue and
//! returns as soon as all queues accepted it. Each worker drains its queue in
//! FIFO order and delivers with enforced retries. A write that still fails
//! after the last retry is logged and dropped; the client was already told it
//! was accepted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use strata_core::{BackendRegistry, SharedBackend};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ProxyError, Result};
use crate::payload::{RequestPayload, SharedPayload};
use crate::upstream::Dispatcher;

/// Delivery counters for one backend's worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    delivered: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

impl WorkerStats {
    /// Writes answered with status ≤ 299.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Writes answered with an error status.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Writes abandoned after retries ran out.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct DispatchQueue {
    backend: SharedBackend,
    sender: mpsc::Sender<SharedPayload>,
    stats: Arc<WorkerStats>,
}

/// Point-in-time view of one dispatch queue.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    /// Backend served by the queue.
    pub backend: SharedBackend,
    /// Payloads waiting in the queue.
    pub queued: usize,
    /// Maximum number of waiting payloads.
    pub capacity: usize,
    /// Delivery counters.
    pub stats: Arc<WorkerStats>,
}

/// The per-backend queues and their forwarding workers.
pub struct WriteFanout {
    /// `None` once the queues have been closed.
    queues: ArcSwapOption<Vec<DispatchQueue>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Verdict of the call that closed the queues.
    drained: AtomicBool,
    capacity: usize,
}

impl std::fmt::Debug for WriteFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteFanout")
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl WriteFanout {
    /// Create one queue of `capacity` payloads per backend and spawn its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(registry: &BackendRegistry, dispatcher: Dispatcher, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut queues = Vec::with_capacity(registry.len());
        let mut workers = Vec::with_capacity(registry.len());

        for backend in registry.iter() {
            let (sender, receiver) = mpsc::channel(capacity);
            let stats = Arc::new(WorkerStats::default());
            let worker = ForwardingWorker {
                backend: Arc::clone(backend),
                dispatcher: dispatcher.clone(),
                receiver,
                stats: Arc::clone(&stats),
            };
            workers.push(tokio::spawn(worker.run()));
            queues.push(DispatchQueue {
                backend: Arc::clone(backend),
                sender,
                stats,
            });
        }

        info!(backends = queues.len(), capacity, "write fanout started");
        Self {
            queues: ArcSwapOption::from_pointee(queues),
            workers: Mutex::new(workers),
            drained: AtomicBool::new(true),
            capacity,
        }
    }

    /// Enqueue `payload` for every backend.
    ///
    /// Waits while a queue is full. Dropping the returned future while it
    /// waits leaves the payload on the queues that already accepted it.
    pub async fn submit(&self, payload: RequestPayload) -> Result<()> {
        self.submit_shared(Arc::new(payload)).await
    }

    /// Enqueue an already shared payload for every backend.
    pub async fn submit_shared(&self, payload: SharedPayload) -> Result<()> {
        let Some(queues) = self.queues.load_full() else {
            return Err(ProxyError::BackendUnavailable("dispatch queues are closed".into()));
        };

        for queue in queues.iter() {
            queue
                .sender
                .send(Arc::clone(&payload))
                .await
                .map_err(|_| ProxyError::BackendUnavailable(queue.backend.url().to_string()))?;
            debug!(backend = %queue.backend, "write queued");
        }
        Ok(())
    }

    /// Like [`WriteFanout::submit`], giving up with
    /// [`ProxyError::BackendUnavailable`] if `cancel` fires while waiting for
    /// queue space.
    pub async fn submit_cancellable(
        &self,
        payload: RequestPayload,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            result = self.submit(payload) => result,
            _ = cancel.cancelled() => {
                Err(ProxyError::BackendUnavailable("submit canceled while waiting for queue space".into()))
            }
        }
    }

    /// Queue depths and counters, in registry order. Empty once closed.
    pub fn snapshot(&self) -> Vec<QueueSnapshot> {
        let Some(queues) = self.queues.load_full() else {
            return Vec::new();
        };
        queues
            .iter()
            .map(|queue| QueueSnapshot {
                backend: Arc::clone(&queue.backend),
                queued: self.capacity - queue.sender.capacity(),
                capacity: self.capacity,
                stats: Arc::clone(&queue.stats),
            })
            .collect()
    }

    /// True after [`WriteFanout::shutdown`].
    pub fn is_closed(&self) -> bool {
        self.queues.load().is_none()
    }

    /// Close every queue and wait up to `timeout` for the workers to drain.
    ///
    /// Only the first call closes anything. Returns `false` if some worker had
    /// to be aborted, in which case its undelivered payloads are lost. Later
    /// calls wait for the first one to finish and report the same verdict.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let mut workers = self.workers.lock().await;
        let Some(queues) = self.queues.swap(None) else {
            return self.drained.load(Ordering::Acquire);
        };
        drop(queues);

        let deadline = Instant::now() + timeout;
        let mut drained = true;
        for mut worker in workers.drain(..) {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                worker.abort();
                drained = false;
            }
        }

        if drained {
            info!("dispatch queues drained");
        } else {
            warn!(?timeout, "dispatch queues did not drain in time, pending writes discarded");
        }
        self.drained.store(drained, Ordering::Release);
        drained
    }
}

struct ForwardingWorker {
    backend: SharedBackend,
    dispatcher: Dispatcher,
    receiver: mpsc::Receiver<SharedPayload>,
    stats: Arc<WorkerStats>,
}

impl ForwardingWorker {
    async fn run(mut self) {
        while let Some(payload) = self.receiver.recv().await {
            match self.dispatcher.send(&self.backend, &payload, true).await {
                Ok(response) if response.is_success() => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        backend = %self.backend,
                        status = response.status.as_u16(),
                        "write delivered"
                    );
                }
                Ok(response) => {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        backend = %self.backend,
                        status = response.status.as_u16(),
                        body = %String::from_utf8_lossy(&response.body),
                        "backend rejected write"
                    );
                }
                Err(err) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    error!(
                        backend = %self.backend,
                        error = %err,
                        "max retries exceeded, dropping write"
                    );
                }
            }
        }
        debug!(backend = %self.backend, "dispatch queue closed, worker exiting");
    }
}
