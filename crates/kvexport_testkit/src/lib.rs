//! # kvexport Testkit
//!
//! Test utilities for kvexport.
//!
//! This crate provides:
//! - Fixtures: bucketed tables in a [`MemoryStore`](kvexport_core::MemoryStore),
//!   matching job settings, clients on a manual clock, JSON dumps on disk
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvexport_testkit::prelude::*;
//!
//! #[test]
//! fn exports_every_bucket() {
//!     let table = TestTable::bucketed(10, 5);
//!     let plan = table.plan(&table.sampled_conf(0, 100), 2);
//!     // ... read the splits
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
