//! Batch aggregator: buffers calls and hands them to the queue in groups.

use super::collector::{BatchAddResult, BatchCollector, BatchConfig, BatchItem};
use crate::events::{DispatchEvent, EventBus, FlushReason};
use crate::queue::{QueueTicket, RequestQueue, SubmitOptions, Work};
use crate::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

struct PendingCall<T> {
    id: Uuid,
    work: Work<T>,
    opts: SubmitOptions,
    tx: oneshot::Sender<Result<T>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub flushes: u64,
    pub flushed_items: u64,
    pub buffered: usize,
}

struct AggregatorInner<T> {
    collector: BatchCollector<PendingCall<T>>,
    queue: RequestQueue<T>,
    events: EventBus,
    flushes: AtomicU64,
    flushed_items: AtomicU64,
}

/// Accumulates calls until `max_batch_size` is reached or `max_wait_time`
/// has passed since the first one, then submits each buffered call to the
/// [`RequestQueue`] on its own.
///
/// Every call gets its own ticket. A batch-mate failing, or being rejected
/// with `QueueFull`, has no effect on the others.
pub struct BatchAggregator<T> {
    inner: Arc<AggregatorInner<T>>,
}

impl<T> Clone for BatchAggregator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> BatchAggregator<T> {
    pub fn new(config: BatchConfig, queue: RequestQueue<T>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                collector: BatchCollector::new(config),
                queue,
                events,
                flushes: AtomicU64::new(0),
                flushed_items: AtomicU64::new(0),
            }),
        }
    }

    /// Buffer one call. The timer for a fresh buffer is armed here, so a
    /// lone call is still flushed after `max_wait_time`.
    pub fn add(&self, work: Work<T>, opts: SubmitOptions) -> QueueTicket<T> {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let call = PendingCall { id, work, opts, tx };
        let item = BatchItem::new(call).with_request_id(id.to_string());

        match self.inner.collector.add(item) {
            BatchAddResult::Added {
                opened: true,
                generation,
                count,
            } => {
                debug!(generation, count, "batch opened");
                let inner = self.inner.clone();
                let window = inner.collector.config().max_wait_time;
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    if let Some(batch) = inner.collector.drain_generation(generation) {
                        inner.dispatch(batch, FlushReason::Timer);
                    }
                });
            }
            BatchAddResult::Added { .. } => {}
            BatchAddResult::ShouldFlush { batch } => {
                self.inner.dispatch(batch, FlushReason::Size);
            }
        }
        QueueTicket::new(id, rx)
    }

    /// Flush whatever is buffered now. Returns the number of calls submitted.
    pub fn flush(&self) -> usize {
        let batch = self.inner.collector.drain();
        let size = batch.len();
        if size > 0 {
            self.inner.dispatch(batch, FlushReason::Manual);
        }
        size
    }

    pub fn buffered(&self) -> usize {
        self.inner.collector.len()
    }

    pub fn config(&self) -> &BatchConfig {
        self.inner.collector.config()
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            flushed_items: self.inner.flushed_items.load(Ordering::Relaxed),
            buffered: self.buffered(),
        }
    }
}

impl<T: Send + 'static> AggregatorInner<T> {
    fn dispatch(&self, batch: Vec<BatchItem<PendingCall<T>>>, reason: FlushReason) {
        let size = batch.len();
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.flushed_items.fetch_add(size as u64, Ordering::Relaxed);
        debug!(size, ?reason, "flushing batch");
        self.events.emit(DispatchEvent::BatchFlushed { size, reason });

        for item in batch {
            let PendingCall { id, work, opts, tx } = item.data;
            // rejection is delivered on tx; siblings carry on
            if let Err(err) = self.queue.enqueue(id, work, opts, tx) {
                debug!(%id, error = %err, "batched call rejected");
            }
        }
    }
}
