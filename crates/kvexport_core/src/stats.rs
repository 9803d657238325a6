//! Read counters, progress reporting and cooperative cancellation.

use crate::client::PageResult;
use crate::split::Segment;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Cumulative counters of one worker's reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadStats {
    /// Pages fetched.
    pub pages: u64,
    /// Items returned.
    pub items: u64,
    /// Capacity units charged by the store.
    pub consumed_capacity: f64,
    /// Retries spent across all pages.
    pub retries: u64,
    /// Segments read to exhaustion.
    pub segments_completed: u64,
    /// Times the rate controller blocked.
    pub throttle_waits: u64,
    /// Total time spent blocked by the rate controller.
    pub throttled_for: Duration,
}

impl ReadStats {
    /// Adds one fetched page.
    pub fn record_page(&mut self, page: &PageResult) {
        self.pages += 1;
        self.items += page.items.len() as u64;
        self.consumed_capacity += page.consumed_capacity;
        self.retries += u64::from(page.retries);
    }

    /// Adds another worker's counters to these.
    pub fn merge(&mut self, other: &ReadStats) {
        self.pages += other.pages;
        self.items += other.items;
        self.consumed_capacity += other.consumed_capacity;
        self.retries += other.retries;
        self.segments_completed += other.segments_completed;
        self.throttle_waits += other.throttle_waits;
        self.throttled_for += other.throttled_for;
    }
}

/// Receives progress from a read manager.
///
/// Calls happen on the reading thread between pages, so implementations
/// should return quickly.
pub trait ProgressReporter: Send + Sync {
    /// Called after every page.
    fn page_read(&self, segment: Segment, page: &PageResult, stats: &ReadStats);

    /// Called when a segment is exhausted.
    fn segment_completed(&self, segment: Segment, stats: &ReadStats) {
        let _ = (segment, stats);
    }
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn page_read(&self, _segment: Segment, _page: &PageResult, _stats: &ReadStats) {}
}

/// Publishes progress through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LogReporter {
    worker: String,
}

impl LogReporter {
    /// Creates a reporter tagging events with `worker`.
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
        }
    }
}

impl ProgressReporter for LogReporter {
    fn page_read(&self, segment: Segment, page: &PageResult, stats: &ReadStats) {
        debug!(
            worker = %self.worker,
            segment = segment.id(),
            items = page.items.len(),
            consumed = page.consumed_capacity,
            retries = page.retries,
            more = page.next_cursor.is_some(),
            total_items = stats.items,
            "page read"
        );
    }

    fn segment_completed(&self, segment: Segment, stats: &ReadStats) {
        info!(
            worker = %self.worker,
            segment = segment.id(),
            total_segments = segment.total(),
            items = stats.items,
            consumed = stats.consumed_capacity,
            retries = stats.retries,
            "segment complete"
        );
    }
}

/// A shared flag requesting that reads stop at the next page boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
