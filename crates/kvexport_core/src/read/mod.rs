//! Paginated reads.
//!
//! A [`ReadRequest`] is one page boundary of one segment. Executing it
//! yields a [`Step`]: either the page plus the request for the following
//! page, the final page, or a failure. [`ReadManager`] drives that loop over
//! every segment of a split, checking for cancellation between pages and
//! keeping a [`Checkpoint`] of the last good boundary.

mod manager;
mod request;

pub use manager::{Checkpoint, ReadManager, ReadState};
pub use request::{KeyedQueryFetcher, PageFetcher, ReadRequest, ScanFetcher, Step};
