//! Remote store boundary.
//!
//! [`RemoteStore`] is a single, un-retried call against the store. The
//! export only depends on this signature, not on how calls are transported.
//! [`ExportClient`] binds a store to a [`FibonacciRetryer`] and is what the
//! readers use.

use crate::error::{ExportResult, RemoteError};
use crate::filter::{IndexInfo, QueryFilter};
use crate::rate::RequestLimit;
use crate::retry::{FibonacciRetryer, RetryResult};
use crate::split::Segment;
use crate::value::Item;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque continuation token: the key of the last item a page returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Item);

impl Cursor {
    /// Wraps a last-evaluated key.
    pub fn new(key: Item) -> Self {
        Self(key)
    }

    /// The wrapped key.
    pub fn key(&self) -> &Item {
        &self.0
    }
}

/// Arguments of one page read.
#[derive(Debug, Clone, Copy)]
pub struct ReadCall<'a> {
    /// Table to read.
    pub table: &'a str,
    /// Conditions and index selector.
    pub filter: &'a QueryFilter,
    /// Where to resume, `None` for the first page.
    pub cursor: Option<&'a Cursor>,
    /// Page ceiling.
    pub limit: RequestLimit,
    /// Attribute projection, `None` for all attributes.
    pub attributes: Option<&'a [String]>,
    /// Physical segment for scans.
    pub segment: Option<Segment>,
}

/// One page as returned by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    /// Items on this page.
    pub items: Vec<Item>,
    /// Resume point, `None` when there is nothing more to read.
    pub next_cursor: Option<Cursor>,
    /// Capacity units the store charged for the call.
    pub consumed_capacity: f64,
}

/// One page with its cost and the retries spent fetching it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    /// Items on this page.
    pub items: Vec<Item>,
    /// Resume point, `None` when the segment is exhausted.
    pub next_cursor: Option<Cursor>,
    /// Capacity units the store charged.
    pub consumed_capacity: f64,
    /// Retries spent on this page.
    pub retries: u32,
}

impl From<RetryResult<RawPage>> for PageResult {
    fn from(result: RetryResult<RawPage>) -> Self {
        let RetryResult { value, retries } = result;
        Self {
            items: value.items,
            next_cursor: value.next_cursor,
            consumed_capacity: value.consumed_capacity,
            retries,
        }
    }
}

/// Table metadata used for planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    /// Table name.
    pub name: String,
    /// Approximate number of items.
    pub item_count: u64,
    /// Approximate table size in bytes.
    pub size_bytes: u64,
    /// Provisioned read capacity units per second.
    pub read_capacity_units: f64,
    /// Partition key attribute.
    pub hash_key: String,
    /// Sort key attribute, if any.
    #[serde(default)]
    pub range_key: Option<String>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
}

impl TableDescription {
    /// Looks up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

/// A remote store offering paginated scans and queries.
///
/// Implementations perform exactly one call per method invocation and
/// report failures as [`RemoteError`]; retrying is the caller's business.
pub trait RemoteStore: Send + Sync {
    /// Describes a table.
    fn describe_table(&self, table: &str) -> Result<TableDescription, RemoteError>;

    /// Reads one page of a segment scan.
    fn scan(&self, call: &ReadCall<'_>) -> Result<RawPage, RemoteError>;

    /// Reads one page of a key-condition query.
    fn query(&self, call: &ReadCall<'_>) -> Result<RawPage, RemoteError>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    fn describe_table(&self, table: &str) -> Result<TableDescription, RemoteError> {
        (**self).describe_table(table)
    }

    fn scan(&self, call: &ReadCall<'_>) -> Result<RawPage, RemoteError> {
        (**self).scan(call)
    }

    fn query(&self, call: &ReadCall<'_>) -> Result<RawPage, RemoteError> {
        (**self).query(call)
    }
}

/// A store with retries applied to every call.
#[derive(Debug, Clone)]
pub struct ExportClient<S> {
    store: S,
    retryer: FibonacciRetryer,
}

impl<S: RemoteStore> ExportClient<S> {
    /// Creates a client.
    pub fn new(store: S, retryer: FibonacciRetryer) -> Self {
        Self { store, retryer }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The retry engine.
    pub fn retryer(&self) -> &FibonacciRetryer {
        &self.retryer
    }

    /// Describes a table, retrying transient failures.
    pub fn describe_table(&self, table: &str) -> ExportResult<RetryResult<TableDescription>> {
        self.retryer.execute(|| self.store.describe_table(table))
    }

    /// Scans one page of `segment`.
    pub fn scan_table(
        &self,
        table: &str,
        filter: &QueryFilter,
        segment: Segment,
        cursor: Option<&Cursor>,
        limit: RequestLimit,
        attributes: Option<&[String]>,
    ) -> ExportResult<RetryResult<PageResult>> {
        let call = ReadCall {
            table,
            filter,
            cursor,
            limit,
            attributes,
            segment: Some(segment),
        };
        let result = self.retryer.execute(|| self.store.scan(&call))?;
        let retries = result.retries;
        Ok(RetryResult::new(result.into(), retries))
    }

    /// Queries one page.
    pub fn query_table(
        &self,
        table: &str,
        filter: &QueryFilter,
        cursor: Option<&Cursor>,
        limit: RequestLimit,
        attributes: Option<&[String]>,
    ) -> ExportResult<RetryResult<PageResult>> {
        let call = ReadCall {
            table,
            filter,
            cursor,
            limit,
            attributes,
            segment: None,
        };
        let result = self.retryer.execute(|| self.store.query(&call))?;
        let retries = result.retries;
        Ok(RetryResult::new(result.into(), retries))
    }
}
