//! 请求队列：FIFO 准入、背压拒绝，并通过并发限制器与重试策略执行工作项。
//!
//! # Request Queue
//!
//! Accepts asynchronous work items, admits them in arrival order and runs each
//! one through the [`ConcurrencyLimiter`] with a [`RetryPolicy`] around it.
//!
//! - **Admission** is synchronous. When nothing is waiting and a limiter token
//!   is free the item starts at once; otherwise it joins the FIFO list, or is
//!   rejected with [`Error::QueueFull`] when the list already holds
//!   `max_queue_depth` items.
//! - **Draining** is done by one task, spawned when the list becomes non-empty
//!   and exiting when it empties. It takes a token, pops the head and spawns
//!   that item's execution with the token.
//! - **Attempts** each run under `attempt_timeout`. The token is dropped
//!   before a backoff sleep and re-acquired for the next attempt.
//!
//! Completion order is not admission order once more than one item runs.

use crate::events::{DispatchEvent, EventBus};
use crate::resilience::{
    CircuitBreaker, ConcurrencyLimiter, LimiterToken, RateLimiter, RetryPolicy,
};
use crate::{Error, ErrorContext, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// A re-runnable unit of work. Each call builds a fresh attempt.
pub type Work<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Wrap a closure as [`Work`].
pub fn work_fn<T, F, Fut>(f: F) -> Work<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_queue_depth: usize,
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 100,
            attempt_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Optional collaborators consulted around every attempt.
#[derive(Default, Clone)]
pub struct QueueHooks {
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub events: EventBus,
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub cancel: Option<CancellationToken>,
    pub retry: Option<RetryPolicy>,
}

impl SubmitOptions {
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

struct QueueItem<T> {
    id: Uuid,
    work: Work<T>,
    enqueued_at: Instant,
    cancel: Option<CancellationToken>,
    retry: Option<RetryPolicy>,
    tx: oneshot::Sender<Result<T>>,
}

/// Handle to a submitted item; resolves with the item's outcome.
pub struct QueueTicket<T> {
    id: Uuid,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> QueueTicket<T> {
    pub(crate) fn new(id: Uuid, rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<T> Future for QueueTicket<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(Error::runtime_with_context(
                    "Queue item dropped before completion",
                    ErrorContext::new().with_source("request_queue"),
                ))
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub peak_pending: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub avg_wait: Duration,
}

struct Pending<T> {
    items: VecDeque<QueueItem<T>>,
    draining: bool,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    admitted: AtomicU64,
    wait_micros: AtomicU64,
    in_flight: AtomicUsize,
    peak_pending: AtomicUsize,
}

struct QueueInner<T> {
    config: QueueConfig,
    limiter: ConcurrencyLimiter,
    hooks: QueueHooks,
    pending: Mutex<Pending<T>>,
    counters: Counters,
}

/// FIFO request queue in front of a [`ConcurrencyLimiter`].
///
/// Must be used from within a tokio runtime: submission spawns tasks.
pub struct RequestQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> RequestQueue<T> {
    pub fn new(config: QueueConfig, limiter: ConcurrencyLimiter) -> Self {
        Self::with_hooks(config, limiter, QueueHooks::default())
    }

    pub fn with_hooks(config: QueueConfig, limiter: ConcurrencyLimiter, hooks: QueueHooks) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                limiter,
                hooks,
                pending: Mutex::new(Pending {
                    items: VecDeque::new(),
                    draining: false,
                }),
                counters: Counters::default(),
            }),
        }
    }

    /// Submit a closure; see [`submit_work`](Self::submit_work).
    pub fn submit<F, Fut>(&self, f: F) -> Result<QueueTicket<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.submit_work(work_fn(f), SubmitOptions::default())
    }

    /// Admit `work` or reject it with [`Error::QueueFull`].
    ///
    /// Rejection happens before anything is spawned, so a rejected item never
    /// touches the limiter or the upstream.
    pub fn submit_work(&self, work: Work<T>, opts: SubmitOptions) -> Result<QueueTicket<T>> {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        self.enqueue(id, work, opts, tx)?;
        Ok(QueueTicket::new(id, rx))
    }

    /// Admit with a caller-provided completion channel. A rejection is both
    /// returned and sent on `tx`.
    pub(crate) fn enqueue(
        &self,
        id: Uuid,
        work: Work<T>,
        opts: SubmitOptions,
        tx: oneshot::Sender<Result<T>>,
    ) -> Result<()> {
        let item = QueueItem {
            id,
            work,
            enqueued_at: Instant::now(),
            cancel: opts.cancel,
            retry: opts.retry,
            tx,
        };

        let inner = &self.inner;
        let mut pending = inner.lock_pending();
        if pending.items.is_empty() {
            if let Some(token) = inner.limiter.try_acquire() {
                drop(pending);
                inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(%id, "admitted immediately");
                tokio::spawn(QueueInner::execute(inner.clone(), item, token));
                return Ok(());
            }
        }

        let depth = inner.config.max_queue_depth;
        if pending.items.len() >= depth {
            let len = pending.items.len();
            drop(pending);
            inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(pending = len, max_queue_depth = depth, "queue full, rejecting");
            inner.hooks.events.emit(DispatchEvent::Rejected { pending: len });
            let err = Error::QueueFull { depth };
            let _ = item.tx.send(Err(err.clone()));
            return Err(err);
        }

        pending.items.push_back(item);
        inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        inner
            .counters
            .peak_pending
            .fetch_max(pending.items.len(), Ordering::Relaxed);
        debug!(%id, pending = pending.items.len(), "queued");
        if !pending.draining {
            pending.draining = true;
            tokio::spawn(QueueInner::drain(inner.clone()));
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.inner.lock_pending().items.len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.counters.in_flight.load(Ordering::Relaxed)
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.inner.limiter
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        let admitted = c.admitted.load(Ordering::Relaxed);
        let avg_wait = if admitted == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(c.wait_micros.load(Ordering::Relaxed) / admitted)
        };
        QueueStats {
            pending: self.pending(),
            in_flight: c.in_flight.load(Ordering::Relaxed),
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            peak_pending: c.peak_pending.load(Ordering::Relaxed),
            avg_wait,
        }
    }
}

impl<T: Send + 'static> QueueInner<T> {
    fn lock_pending(&self) -> MutexGuard<'_, Pending<T>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let token = match self.limiter.acquire().await {
                Ok(token) => token,
                Err(err) => {
                    self.fail_all_pending(err);
                    return;
                }
            };
            let item = {
                let mut pending = self.lock_pending();
                loop {
                    match pending.items.pop_front() {
                        // caller went away while waiting
                        Some(item) if item.tx.is_closed() => continue,
                        Some(item) => break Some(item),
                        None => {
                            pending.draining = false;
                            break None;
                        }
                    }
                }
            };
            match item {
                Some(item) => {
                    tokio::spawn(Self::execute(self.clone(), item, token));
                }
                None => return,
            }
        }
    }

    fn fail_all_pending(&self, err: Error) {
        let mut pending = self.lock_pending();
        pending.draining = false;
        for item in pending.items.drain(..) {
            let _ = item.tx.send(Err(err.clone()));
        }
    }

    async fn execute(self: Arc<Self>, item: QueueItem<T>, token: LimiterToken) {
        let QueueItem {
            id,
            work,
            enqueued_at,
            cancel,
            retry,
            tx,
        } = item;

        let waited = enqueued_at.elapsed();
        let c = &self.counters;
        c.admitted.fetch_add(1, Ordering::Relaxed);
        c.wait_micros
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        c.in_flight.fetch_add(1, Ordering::Relaxed);
        self.hooks.events.emit(DispatchEvent::Admitted {
            id: id.to_string(),
            waited,
        });

        let policy = retry.unwrap_or_else(|| self.config.retry.clone());
        let outcome = match cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    result = self.run_attempts(id, work, &policy, token) => result,
                }
            }
            None => self.run_attempts(id, work, &policy, token).await,
        };

        c.in_flight.fetch_sub(1, Ordering::Relaxed);
        match &outcome {
            Ok(_) => c.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => c.failed.fetch_add(1, Ordering::Relaxed),
        };
        if tx.send(outcome).is_err() {
            debug!(%id, "caller dropped ticket before completion");
        }
    }

    async fn run_attempts(
        &self,
        id: Uuid,
        work: Work<T>,
        policy: &RetryPolicy,
        token: LimiterToken,
    ) -> Result<T> {
        let this: &Self = self;
        let mut admission_token = Some(token);
        let id_str = id.to_string();
        policy
            .run_observed(
                move |_attempt| {
                    let held = admission_token.take();
                    this.attempt(held, work.clone())
                },
                move |retry| {
                    this.counters.retries.fetch_add(1, Ordering::Relaxed);
                    this.hooks.events.emit(DispatchEvent::Retrying {
                        id: id_str.clone(),
                        attempt: retry.attempt,
                        delay: retry.delay,
                        error: retry.error.to_string(),
                    });
                },
            )
            .await
    }

    /// One attempt: breaker, rate limit, token, then the work under timeout.
    async fn attempt(&self, held: Option<LimiterToken>, work: Work<T>) -> Result<T> {
        let mut held = held;
        if let Some(breaker) = &self.hooks.circuit_breaker {
            breaker.allow()?;
        }
        if let Some(rate) = &self.hooks.rate_limiter {
            if !rate.try_acquire().await {
                // never wait for rate while holding capacity
                drop(held.take());
                rate.acquire().await?;
            }
        }
        let _token = match held {
            Some(token) => token,
            None => self.limiter.acquire().await?,
        };

        let timeout = self.config.attempt_timeout;
        let result = match tokio::time::timeout(timeout, work()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        if let Some(breaker) = &self.hooks.circuit_breaker {
            match &result {
                Ok(_) => breaker.on_success(),
                Err(err) if err.is_retryable() => breaker.on_failure(),
                Err(_) => {}
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn queue(max_concurrency: usize, depth: usize) -> RequestQueue<u32> {
        RequestQueue::new(
            QueueConfig {
                max_queue_depth: depth,
                attempt_timeout: Duration::from_secs(5),
                retry: RetryPolicy::new(3, Duration::from_millis(100)),
            },
            ConcurrencyLimiter::new(max_concurrency),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn admits_in_fifo_order() {
        let q = queue(1, 10);
        let order = Arc::new(Mutex::new(Vec::new()));
        let tickets: Vec<_> = (0..5u32)
            .map(|i| {
                let order = order.clone();
                q.submit(move || {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(i);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(i)
                    }
                })
                .unwrap()
            })
            .collect();
        for (i, ticket) in tickets.into_iter().enumerate() {
            assert_eq!(ticket.await.unwrap(), i as u32);
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        let stats = q.stats();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.peak_pending, 4);
        assert!(stats.avg_wait > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_beyond_concurrency_plus_depth() {
        let q = queue(2, 3);
        let calls = Arc::new(AtomicU32::new(0));
        let mut tickets = Vec::new();
        let mut rejected = 0;
        for _ in 0..8 {
            let calls = calls.clone();
            match q.submit(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(1)
                }
            }) {
                Ok(ticket) => tickets.push(ticket),
                Err(err) => {
                    assert!(err.is_queue_full());
                    rejected += 1;
                }
            }
        }
        assert_eq!(tickets.len(), 5);
        assert_eq!(rejected, 3);
        for ticket in tickets {
            ticket.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(q.stats().rejected, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_token() {
        let q = RequestQueue::new(
            QueueConfig {
                max_queue_depth: 10,
                attempt_timeout: Duration::from_millis(20),
                retry: RetryPolicy::single_attempt(),
            },
            ConcurrencyLimiter::new(1),
        );
        let slow = q
            .submit(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(0u32)
            })
            .unwrap();
        let fast = q.submit(|| async { Ok(7u32) }).unwrap();

        let start = Instant::now();
        let err = slow.await.unwrap_err();
        assert!(matches!(err.root(), Error::Timeout { timeout_ms: 20 }));
        assert_eq!(fast.await.unwrap(), 7);
        assert!(start.elapsed() < Duration::from_millis(25));
        assert_eq!(q.limiter().available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_does_not_hold_token() {
        let q = queue(1, 10);
        let log = Arc::new(Mutex::new(Vec::new()));

        let attempts = Arc::new(AtomicU32::new(0));
        let flaky = {
            let log = log.clone();
            let attempts = attempts.clone();
            q.submit(move || {
                let log = log.clone();
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    log.lock().unwrap().push(format!("flaky-{n}"));
                    if n == 0 {
                        Err(Error::from_status(503, "busy"))
                    } else {
                        Ok(1)
                    }
                }
            })
            .unwrap()
        };
        // let the first attempt fail and enter backoff
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let other = {
            let log = log.clone();
            q.submit(move || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push("other".to_string());
                    Ok(2)
                }
            })
            .unwrap()
        };

        assert_eq!(other.await.unwrap(), 2);
        assert_eq!(flaky.await.unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["flaky-0", "other", "flaky-1"]);
        assert_eq!(q.stats().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resolves_cancelled_and_frees_token() {
        let q = queue(1, 10);
        let cancel = CancellationToken::new();
        let ticket = q
            .submit_work(
                work_fn(|| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(0u32)
                }),
                SubmitOptions::default().with_cancel(cancel.clone()),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();
        assert!(matches!(ticket.await, Err(Error::Cancelled)));
        assert_eq!(q.limiter().available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_ticket_is_skipped() {
        let q = queue(1, 10);
        let ran = Arc::new(AtomicU32::new(0));
        let blocker = q
            .submit(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(0)
            })
            .unwrap();
        {
            let ran = ran.clone();
            let abandoned = q
                .submit(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    async { Ok(1) }
                })
                .unwrap();
            drop(abandoned);
        }
        let last = q.submit(|| async { Ok(2) }).unwrap();
        blocker.await.unwrap();
        assert_eq!(last.await.unwrap(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
