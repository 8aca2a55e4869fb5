//! Request coalescing
//!
//! [`RequestBatcher`] collects requests into an open batch and sends the
//! whole batch downstream in one call, either when it reaches
//! `batch_size` distinct keys or when `debounce_interval` has passed since it
//! was opened. Every batch-state transition (open, append, take for flush,
//! cancel) happens under one lock; the downstream call and the fan-out of
//! results happen outside it, so the next batch can fill while the previous
//! one is in flight.
//!
//! A request for a key that is already in the open batch joins that key's
//! waiters instead of adding a second payload.

use crate::batch::config::BatchConfig;
use crate::batch::handler::BatchHandler;
use crate::cache::types::CacheKey;
use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Counters describing coalescer activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Calls to `request`
    pub requests: u64,

    /// Requests that joined a key already waiting in the open batch
    pub coalesced: u64,

    /// Waiters removed by dropping their handle before the flush
    pub cancelled: u64,

    /// Downstream calls issued
    pub batches: u64,

    /// Payloads sent downstream
    pub payloads: u64,

    /// Flushes triggered by reaching `batch_size`
    pub size_flushes: u64,

    /// Flushes triggered by the debounce timer
    pub timer_flushes: u64,

    /// Flushes forced through `flush()`
    pub manual_flushes: u64,

    /// Batches whose waiters all received a failure
    pub failed_batches: u64,
}

/// Why a batch was flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Timer,
    Manual,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushTrigger::Size => write!(f, "size"),
            FlushTrigger::Timer => write!(f, "timer"),
            FlushTrigger::Manual => write!(f, "manual"),
        }
    }
}

type Outcome<R> = Result<R, BatchError>;

struct Waiter<R> {
    id: u64,
    tx: oneshot::Sender<Outcome<R>>,
}

struct PendingBatch<P, R> {
    id: Uuid,
    keys: Vec<CacheKey>,
    payloads: Vec<P>,
    waiters: HashMap<CacheKey, Vec<Waiter<R>>>,
    opened_at: Instant,
    timer: Option<JoinHandle<()>>,
}

impl<P, R> PendingBatch<P, R> {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            keys: Vec::new(),
            payloads: Vec::new(),
            waiters: HashMap::new(),
            opened_at: Instant::now(),
            timer: None,
        }
    }
}

struct BatchState<P, R> {
    open: Option<PendingBatch<P, R>>,
    stats: BatchStats,
}

struct Inner<P, R> {
    config: BatchConfig,
    handler: Arc<dyn BatchHandler<P, R>>,
    state: parking_lot::Mutex<BatchState<P, R>>,
    next_waiter_id: AtomicU64,
}

/// Lets a dropped [`PendingResult`] take itself out of its batch
trait WaiterRegistry: Send + Sync {
    fn cancel_waiter(&self, batch_id: Uuid, key: &CacheKey, waiter_id: u64);
}

/// Coalesces concurrent requests into batched downstream calls
pub struct RequestBatcher<P, R> {
    inner: Arc<Inner<P, R>>,
}

impl<P, R> Clone for RequestBatcher<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P, R> RequestBatcher<P, R>
where
    P: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Create a batcher in front of `handler`
    pub fn new<H>(config: BatchConfig, handler: H) -> Self
    where
        H: BatchHandler<P, R> + 'static,
    {
        Self::from_arc(config, Arc::new(handler))
    }

    /// Create a batcher sharing an existing handler
    pub fn from_arc(config: BatchConfig, handler: Arc<dyn BatchHandler<P, R>>) -> Self {
        debug!(
            "Creating request batcher (batch_size: {}, debounce: {:?})",
            config.batch_size, config.debounce_interval
        );

        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state: parking_lot::Mutex::new(BatchState {
                    open: None,
                    stats: BatchStats::default(),
                }),
                next_waiter_id: AtomicU64::new(0),
            }),
        }
    }

    /// Batch configuration
    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Queue a request; the returned handle resolves when its batch does
    ///
    /// Must be called from within a Tokio runtime. Dropping the handle
    /// before it resolves withdraws this caller only; the payload still goes
    /// downstream with its batch.
    pub fn request(&self, key: CacheKey, payload: P) -> PendingResult<R> {
        let (tx, rx) = oneshot::channel();
        let waiter_id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let batch_size = self.inner.config.batch_size.max(1);

        let (batch_id, ready) = {
            let mut state = self.inner.state.lock();
            let BatchState { open, stats } = &mut *state;
            stats.requests += 1;

            let batch = open.get_or_insert_with(PendingBatch::new);
            let batch_id = batch.id;
            let waiter = Waiter { id: waiter_id, tx };

            let full = if let Some(waiters) = batch.waiters.get_mut(&key) {
                waiters.push(waiter);
                stats.coalesced += 1;
                debug!("Coalesced request {} into batch {}", key.short(), batch_id);
                false
            } else {
                batch.keys.push(key);
                batch.payloads.push(payload);
                batch.waiters.insert(key, vec![waiter]);
                batch.keys.len() >= batch_size
            };

            let ready = if full {
                open.take()
            } else {
                if batch.timer.is_none() {
                    batch.timer = Some(Inner::spawn_timer(self.inner.clone(), batch_id));
                }
                None
            };

            (batch_id, ready)
        };

        if let Some(mut batch) = ready {
            if let Some(timer) = batch.timer.take() {
                timer.abort();
            }
            tokio::spawn(Inner::flush(self.inner.clone(), batch, FlushTrigger::Size));
        }

        let inner: Arc<dyn WaiterRegistry> = self.inner.clone();
        let registry = Arc::downgrade(&inner);
        PendingResult {
            rx,
            registration: Some(Registration {
                registry,
                batch_id,
                key,
                waiter_id,
            }),
        }
    }

    /// Flush the open batch now, returning how many payloads were sent
    pub async fn flush(&self) -> usize {
        let batch = self.inner.state.lock().open.take();

        match batch {
            Some(mut batch) => {
                if let Some(timer) = batch.timer.take() {
                    timer.abort();
                }
                let count = batch.payloads.len();
                Inner::flush(self.inner.clone(), batch, FlushTrigger::Manual).await;
                count
            }
            None => 0,
        }
    }

    /// Number of distinct keys waiting in the open batch
    pub fn pending_len(&self) -> usize {
        self.inner
            .state
            .lock()
            .open
            .as_ref()
            .map(|batch| batch.keys.len())
            .unwrap_or(0)
    }

    /// Get coalescer statistics
    pub fn stats(&self) -> BatchStats {
        self.inner.state.lock().stats.clone()
    }
}

impl<P, R> Inner<P, R>
where
    P: Send + 'static,
    R: Clone + Send + 'static,
{
    fn spawn_timer(inner: Arc<Self>, batch_id: Uuid) -> JoinHandle<()> {
        let delay = inner.config.debounce_interval;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let batch = {
                let mut state = inner.state.lock();
                if state.open.as_ref().map(|open| open.id) == Some(batch_id) {
                    state.open.take()
                } else {
                    None
                }
            };

            if let Some(batch) = batch {
                Inner::flush(inner, batch, FlushTrigger::Timer).await;
            }
        })
    }

    async fn flush(inner: Arc<Self>, batch: PendingBatch<P, R>, trigger: FlushTrigger) {
        let PendingBatch {
            id,
            keys,
            payloads,
            mut waiters,
            opened_at,
            ..
        } = batch;
        let expected = payloads.len();

        debug!(
            "Flushing batch {} ({} payloads, trigger: {}, age: {:?})",
            id,
            expected,
            trigger,
            opened_at.elapsed()
        );

        {
            let mut state = inner.state.lock();
            state.stats.batches += 1;
            state.stats.payloads += expected as u64;
            match trigger {
                FlushTrigger::Size => state.stats.size_flushes += 1,
                FlushTrigger::Timer => state.stats.timer_flushes += 1,
                FlushTrigger::Manual => state.stats.manual_flushes += 1,
            }
        }

        let outcome = match inner.handler.call_batch(payloads).await {
            Ok(results) if results.len() == expected => Ok(results),
            Ok(results) => Err(BatchError::ResultCountMismatch {
                expected,
                actual: results.len(),
            }),
            Err(e) => Err(BatchError::Downstream {
                batch_id: id,
                cause: Arc::new(e),
            }),
        };

        match outcome {
            Ok(results) => {
                for (key, result) in keys.into_iter().zip(results) {
                    for waiter in waiters.remove(&key).unwrap_or_default() {
                        let _ = waiter.tx.send(Ok(result.clone()));
                    }
                }
            }
            Err(error) => {
                warn!("Batch {} failed: {}", id, error);
                inner.state.lock().stats.failed_batches += 1;
                for waiter in waiters.into_values().flatten() {
                    let _ = waiter.tx.send(Err(error.clone()));
                }
            }
        }
    }
}

impl<P, R> WaiterRegistry for Inner<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    fn cancel_waiter(&self, batch_id: Uuid, key: &CacheKey, waiter_id: u64) {
        let mut state = self.state.lock();
        let BatchState { open, stats } = &mut *state;

        let Some(batch) = open.as_mut().filter(|batch| batch.id == batch_id) else {
            return;
        };

        if let Some(waiters) = batch.waiters.get_mut(key) {
            let before = waiters.len();
            waiters.retain(|waiter| waiter.id != waiter_id);
            if waiters.len() < before {
                stats.cancelled += 1;
                debug!("Cancelled waiter for {} in batch {}", key.short(), batch_id);
            }
        }
    }
}

struct Registration {
    registry: Weak<dyn WaiterRegistry>,
    batch_id: Uuid,
    key: CacheKey,
    waiter_id: u64,
}

/// Handle to a queued request
///
/// Resolves to the result for its key, or to the failure shared by its
/// whole batch.
#[must_use = "a dropped PendingResult withdraws the caller from its batch"]
pub struct PendingResult<R> {
    rx: oneshot::Receiver<Outcome<R>>,
    registration: Option<Registration>,
}

impl<R> PendingResult<R> {
    /// Identifier of the batch this request joined
    pub fn batch_id(&self) -> Option<Uuid> {
        self.registration.as_ref().map(|r| r.batch_id)
    }
}

impl<R> Future for PendingResult<R> {
    type Output = Outcome<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(received) => {
                self.registration = None;
                Poll::Ready(received.unwrap_or(Err(BatchError::Aborted)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<R> Drop for PendingResult<R> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            if let Some(registry) = registration.registry.upgrade() {
                registry.cancel_waiter(
                    registration.batch_id,
                    &registration.key,
                    registration.waiter_id,
                );
            }
        }
    }
}
