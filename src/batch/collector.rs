//! Batch collector.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_wait_time: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 5,
            max_wait_time: Duration::from_secs(2),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_size(mut self, s: usize) -> Self {
        self.max_batch_size = s.max(1);
        self
    }

    pub fn with_max_wait_time(mut self, t: Duration) -> Self {
        self.max_wait_time = t;
        self
    }
}

#[derive(Debug)]
pub struct BatchItem<T> {
    pub data: T,
    pub added_at: Instant,
    pub request_id: Option<String>,
}

impl<T> BatchItem<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            added_at: Instant::now(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Outcome of [`BatchCollector::add`].
#[derive(Debug)]
pub enum BatchAddResult<T> {
    /// Buffered. `opened` is true when this item started a new buffer, whose
    /// `generation` a flush timer should be armed for.
    Added {
        count: usize,
        generation: u64,
        opened: bool,
    },
    /// The buffer reached `max_batch_size` and was taken whole.
    ShouldFlush { batch: Vec<BatchItem<T>> },
}

impl<T> BatchAddResult<T> {
    pub fn should_flush(&self) -> bool {
        matches!(self, BatchAddResult::ShouldFlush { .. })
    }

    pub fn count(&self) -> usize {
        match self {
            BatchAddResult::Added { count, .. } => *count,
            BatchAddResult::ShouldFlush { batch } => batch.len(),
        }
    }
}

#[derive(Debug)]
struct Buffer<T> {
    items: Vec<BatchItem<T>>,
    opened_at: Option<Instant>,
    generation: u64,
}

/// Size-bounded buffer of pending items.
///
/// Each time an item lands in an empty buffer a new generation starts. A
/// timer armed for a generation can only flush that same buffer, so a late
/// timer never cuts a younger batch short.
#[derive(Debug)]
pub struct BatchCollector<T> {
    config: BatchConfig,
    buffer: Mutex<Buffer<T>>,
}

impl<T> BatchCollector<T> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            buffer: Mutex::new(Buffer {
                items: Vec::new(),
                opened_at: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer<T>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn add(&self, item: BatchItem<T>) -> BatchAddResult<T> {
        let mut buf = self.lock();
        let opened = buf.items.is_empty();
        if opened {
            buf.generation += 1;
            buf.opened_at = Some(Instant::now());
        }
        buf.items.push(item);
        let count = buf.items.len();
        if count >= self.config.max_batch_size.max(1) {
            buf.opened_at = None;
            BatchAddResult::ShouldFlush {
                batch: std::mem::take(&mut buf.items),
            }
        } else {
            BatchAddResult::Added {
                count,
                generation: buf.generation,
                opened,
            }
        }
    }

    pub fn add_data(&self, data: T) -> BatchAddResult<T> {
        self.add(BatchItem::new(data))
    }

    /// True when the buffer is full or its oldest item waited `max_wait_time`.
    pub fn should_flush(&self) -> bool {
        let buf = self.lock();
        if buf.items.is_empty() {
            return false;
        }
        if buf.items.len() >= self.config.max_batch_size {
            return true;
        }
        buf.opened_at
            .map(|s| s.elapsed() >= self.config.max_wait_time)
            .unwrap_or(false)
    }

    pub fn drain(&self) -> Vec<BatchItem<T>> {
        let mut buf = self.lock();
        buf.opened_at = None;
        std::mem::take(&mut buf.items)
    }

    /// Drain only if the open buffer still belongs to `generation`.
    pub fn drain_generation(&self, generation: u64) -> Option<Vec<BatchItem<T>>> {
        let mut buf = self.lock();
        if buf.generation != generation || buf.items.is_empty() {
            return None;
        }
        buf.opened_at = None;
        Some(std::mem::take(&mut buf.items))
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }
}
