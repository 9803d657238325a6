//! # kvexport core
//!
//! Parallel, rate-controlled export of a partitioned key-value table.
//!
//! This crate provides:
//! - Split planning (full physical segments, or a sampled sort-key range
//!   off a secondary index)
//! - Per-worker admission control over consumed read capacity
//! - Bounded retries with Fibonacci backoff
//! - A per-split pagination state machine with checkpoint and resume
//! - A remote store abstraction and an in-memory store
//!
//! ## Architecture
//!
//! Planning runs once: [`plan_job`] describes the table and produces one
//! [`Split`] per worker. Each worker then drives a [`ReadManager`], which
//! asks its [`RateController`] how much it may fetch, fetches one page
//! through a [`FibonacciRetryer`]-wrapped [`RemoteStore`], and repeats until
//! the store reports no further pages.
//!
//! ## Key Invariants
//!
//! - Splits partition the segments exactly once, sizes differing by at most one
//! - Pages within a segment strictly follow the cursor chain
//! - Split filters are never mutated; each request works on its own copy
//! - Malformed or missing settings fail before any remote call
//! - Workers share the throughput budget by static division only

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod clock;
mod config;
mod error;
mod filter;
mod memory;
mod plan;
mod rate;
pub mod read;
mod retry;
mod split;
mod stats;
mod value;

pub use client::{
    Cursor, ExportClient, PageResult, RawPage, ReadCall, RemoteStore, TableDescription,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    keys, JobConf, RateConfig, RetryConfig, DEFAULT_THROUGHPUT_PERCENT, MAX_THROUGHPUT_PERCENT,
};
pub use error::{ExportError, ExportResult, RemoteError};
pub use filter::{Arity, ColumnType, Condition, FilterOperator, IndexInfo, NAryFilter, QueryFilter};
pub use memory::{read_cost, CallKind, CallRecord, MemoryStore, TableDump, READ_UNIT_BYTES};
pub use plan::{full_segment_count, plan_job, JobPlan, ReadMode, BYTES_PER_SEGMENT, MAX_SEGMENTS};
pub use rate::{RateController, RequestLimit};
pub use read::{
    Checkpoint, KeyedQueryFetcher, PageFetcher, ReadManager, ReadRequest, ReadState, ScanFetcher,
    Step,
};
pub use retry::{FibonacciRetryer, RetryResult};
pub use split::{
    balance_segments, FullSegmentSplitGenerator, SampledKeyRangeSplitGenerator, SamplingPolicy,
    Segment, Split, SplitGenerator, DEFAULT_KEY_SPACE, DEFAULT_SAMPLE_FRACTION,
};
pub use stats::{CancelToken, LogReporter, NoopReporter, ProgressReporter, ReadStats};
pub use value::{item_size, to_standard_json, AttributeValue, Item};
