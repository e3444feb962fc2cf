//! 请求批处理模块：按大小或时间窗口聚合调用，再逐个提交到请求队列。
//!
//! # Request Batching Module
//!
//! Calls routed through the aggregator wait in a buffer until it either holds
//! `max_batch_size` calls or its first call has waited `max_wait_time`. The
//! buffer is then swapped for a fresh one and every call in it is submitted
//! to the [`RequestQueue`](crate::queue::RequestQueue) independently.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchCollector`] | Generation-tagged buffer that hands itself over when full |
//! | [`BatchConfig`] | Size and time thresholds |
//! | [`BatchAggregator`] | Arms flush timers and submits flushed calls to the queue |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_dispatch::batch::{BatchAddResult, BatchCollector, BatchConfig};
//!
//! let collector = BatchCollector::new(BatchConfig::new().with_max_batch_size(2));
//! collector.add_data("request_1");
//! match collector.add_data("request_2") {
//!     BatchAddResult::ShouldFlush { batch } => assert_eq!(batch.len(), 2),
//!     BatchAddResult::Added { .. } => unreachable!(),
//! }
//! ```

mod aggregator;
mod collector;

pub use aggregator::{BatchAggregator, BatchStats};
pub use collector::{BatchAddResult, BatchCollector, BatchConfig, BatchItem};
