//! 调度事件：通过类型化的广播通道通知缓存命中、重试、拒绝与批次刷新。
//!
//! Typed dispatch events.
//!
//! Subscribers receive events through a `tokio::sync::broadcast` channel.
//! Events are advisory: a lagging subscriber silently loses the oldest ones
//! and nothing in the dispatch path waits on delivery.

use std::time::Duration;
use tokio::sync::broadcast;

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The buffer reached `batch_size`.
    Size,
    /// The flush window elapsed.
    Timer,
    /// An explicit `flush()` call.
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    CacheHit { key: String },
    CacheMiss { key: String },
    /// A call joined an identical request that was already in flight.
    Coalesced { key: String },
    /// A queued item started executing after waiting `waited`.
    Admitted { id: String, waited: Duration },
    Retrying {
        id: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Rejected { pending: usize },
    Completed { key: String, latency: Duration },
    Failed { key: String, error: String },
    BatchFlushed { size: usize, reason: FlushReason },
}

/// Cloneable sender half shared by the client, queue and batch aggregator.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: DispatchEvent) {
        // no subscribers is the common case
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
