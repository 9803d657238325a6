//! In-memory remote store.
//!
//! [`MemoryStore`] behaves like the paginated store the export reads from,
//! closely enough to drive every code path locally. It handles segment
//! scans, key-condition queries over the table or a secondary index,
//! projections, page limits, cursors and capacity costing. Failures can be
//! scripted, and every call is logged for assertions.

use crate::client::{Cursor, RawPage, ReadCall, RemoteStore, TableDescription};
use crate::error::RemoteError;
use crate::filter::{FilterOperator, IndexInfo, QueryFilter};
use crate::rate::RequestLimit;
use crate::split::Segment;
use crate::value::{item_size, AttributeValue, Item};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

/// Bytes covered by one read-cost increment.
pub const READ_UNIT_BYTES: usize = 4096;

/// Capacity units charged per started [`READ_UNIT_BYTES`] block.
pub const UNITS_PER_READ_BLOCK: f64 = 0.5;

/// A table and its items, as stored in a JSON dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDump {
    /// Table metadata. `item_count` and `size_bytes` are recomputed on load.
    pub description: TableDescription,
    /// Items in the store's typed JSON form.
    #[serde(default)]
    pub items: Vec<Item>,
}

/// Which store operation a logged call was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `describe_table`.
    Describe,
    /// `scan`.
    Scan,
    /// `query`.
    Query,
}

/// One logged store call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Operation.
    pub kind: CallKind,
    /// Target table.
    pub table: String,
    /// Filter sent with a read.
    pub filter: Option<QueryFilter>,
    /// Cursor sent with a read.
    pub cursor: Option<Cursor>,
    /// Limit sent with a read.
    pub limit: Option<RequestLimit>,
    /// Segment of a scan.
    pub segment: Option<Segment>,
}

impl CallRecord {
    fn read(kind: CallKind, call: &ReadCall<'_>) -> Self {
        Self {
            kind,
            table: call.table.to_string(),
            filter: Some(call.filter.clone()),
            cursor: call.cursor.cloned(),
            limit: Some(call.limit),
            segment: call.segment,
        }
    }
}

#[derive(Debug)]
struct MemoryTable {
    description: TableDescription,
    items: BTreeMap<String, Item>,
}

impl MemoryTable {
    fn describe(&self) -> TableDescription {
        let stored: usize = self.items.values().map(item_size).sum();
        let mut description = self.description.clone();
        description.item_count = self.items.len() as u64;
        description.size_bytes = description.size_bytes.max(stored as u64);
        description
    }

    fn primary_key(&self, item: &Item) -> Result<String, RemoteError> {
        let desc = &self.description;
        let mut parts = vec![key_part(item, &desc.hash_key)?];
        if let Some(range) = &desc.range_key {
            parts.push(key_part(item, range)?);
        }
        serde_json::to_string(&parts).map_err(|e| RemoteError::Validation(e.to_string()))
    }

    /// Attributes that make up a cursor: the table key plus the index key.
    fn cursor_for(&self, item: &Item, index: Option<&IndexInfo>) -> Cursor {
        let desc = &self.description;
        let mut names = vec![desc.hash_key.as_str()];
        names.extend(desc.range_key.as_deref());
        if let Some(index) = index {
            names.push(index.hash_key.as_str());
            names.extend(index.range_key.as_deref());
        }
        let key = names
            .into_iter()
            .filter_map(|name| item.get(name).map(|v| (name.to_string(), v.clone())))
            .collect();
        Cursor::new(key)
    }

    fn resolve_index<'a>(
        &'a self,
        filter: &'a QueryFilter,
    ) -> Result<Option<&'a IndexInfo>, RemoteError> {
        match filter.index() {
            None => Ok(None),
            Some(selected) => self
                .description
                .index(&selected.name)
                .map(Some)
                .ok_or_else(|| {
                    RemoteError::Validation(format!(
                        "table `{}` has no index `{}`",
                        self.description.name, selected.name
                    ))
                }),
        }
    }

    /// Checks that the key conditions address the queried key schema with an
    /// equality on its partition key.
    fn check_query_keys(
        &self,
        filter: &QueryFilter,
        index: Option<&IndexInfo>,
    ) -> Result<(), RemoteError> {
        let (hash_key, range_key) = match index {
            Some(index) => (index.hash_key.as_str(), index.range_key.as_deref()),
            None => (
                self.description.hash_key.as_str(),
                self.description.range_key.as_deref(),
            ),
        };
        match filter.key_conditions().get(hash_key) {
            Some(condition) if condition.operator == FilterOperator::Eq => {}
            _ => {
                return Err(RemoteError::Validation(format!(
                    "query requires an equality condition on `{hash_key}`"
                )))
            }
        }
        if let Some(column) = filter
            .key_conditions()
            .keys()
            .find(|column| column.as_str() != hash_key && Some(column.as_str()) != range_key)
        {
            return Err(RemoteError::Validation(format!(
                "`{column}` is not a key attribute of the queried schema"
            )));
        }
        Ok(())
    }
}

fn key_part<'a>(item: &'a Item, name: &str) -> Result<&'a AttributeValue, RemoteError> {
    item.get(name)
        .ok_or_else(|| RemoteError::Validation(format!("item is missing key attribute `{name}`")))
}

/// 64-bit FNV-1a, stable across runs and platforms.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, &byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

fn segment_of(hash_value: &AttributeValue, total: u32) -> u32 {
    let encoded = serde_json::to_vec(hash_value).unwrap_or_default();
    (fnv1a(&encoded) % u64::from(total.max(1))) as u32
}

fn project(item: &Item, attributes: Option<&[String]>) -> Item {
    match attributes {
        None => item.clone(),
        Some(names) => names
            .iter()
            .filter_map(|name| item.get(name).map(|v| (name.clone(), v.clone())))
            .collect(),
    }
}

/// Capacity charged for reading `bytes`.
pub fn read_cost(bytes: usize) -> f64 {
    let blocks = bytes.div_ceil(READ_UNIT_BYTES).max(1);
    blocks as f64 * UNITS_PER_READ_BLOCK
}

/// An in-memory [`RemoteStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, MemoryTable>>,
    failures: Mutex<VecDeque<RemoteError>>,
    calls: Mutex<Vec<CallRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads tables from a JSON array of [`TableDump`]s.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let dumps: Vec<TableDump> = serde_json::from_str(json)?;
        let store = Self::new();
        for dump in dumps {
            let name = dump.description.name.clone();
            store.create_table(dump.description);
            for item in dump.items {
                store
                    .put_item(&name, item)
                    .map_err(<serde_json::Error as serde::de::Error>::custom)?;
            }
        }
        Ok(store)
    }

    /// Creates or replaces a table.
    pub fn create_table(&self, description: TableDescription) {
        let table = MemoryTable {
            description: description.clone(),
            items: BTreeMap::new(),
        };
        self.tables.write().insert(description.name, table);
    }

    /// Stores an item, replacing any item with the same primary key.
    pub fn put_item(&self, table: &str, item: Item) -> Result<(), RemoteError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(table)
            .ok_or_else(|| RemoteError::ResourceNotFound(format!("table `{table}`")))?;
        let key = table.primary_key(&item)?;
        table.items.insert(key, item);
        Ok(())
    }

    /// Number of items stored in `table`.
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.items.len())
    }

    /// Fails the next `count` reads with `error`.
    pub fn push_failures(&self, error: RemoteError, count: usize) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(error).take(count));
    }

    /// Fails the next read with `error`.
    pub fn push_failure(&self, error: RemoteError) {
        self.push_failures(error, 1);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls of `kind` made so far.
    pub fn calls_of(&self, kind: CallKind) -> usize {
        self.calls.lock().iter().filter(|c| c.kind == kind).count()
    }

    /// Forgets logged calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn next_failure(&self) -> Option<RemoteError> {
        self.failures.lock().pop_front()
    }

    fn read(&self, kind: CallKind, call: &ReadCall<'_>) -> Result<RawPage, RemoteError> {
        self.calls.lock().push(CallRecord::read(kind, call));
        if let Some(failure) = self.next_failure() {
            return Err(failure);
        }
        if call.limit.max_items == 0 {
            return Err(RemoteError::Validation("limit must be at least 1".into()));
        }

        let tables = self.tables.read();
        let table = tables
            .get(call.table)
            .ok_or_else(|| RemoteError::ResourceNotFound(format!("table `{}`", call.table)))?;
        let index = table.resolve_index(call.filter)?;
        if kind == CallKind::Query {
            table.check_query_keys(call.filter, index)?;
        }

        let start = match call.cursor {
            Some(cursor) => Bound::Excluded(table.primary_key(cursor.key())?),
            None => Bound::Unbounded,
        };
        let hash_key = &table.description.hash_key;
        let in_scope = |item: &&Item| {
            if let Some(index) = index {
                // Sparse index: items without the index keys are not in it.
                let indexed = item.contains_key(&index.hash_key)
                    && index.range_key.as_ref().is_none_or(|r| item.contains_key(r));
                if !indexed {
                    return false;
                }
            }
            match (kind, call.segment) {
                (CallKind::Scan, Some(segment)) => item
                    .get(hash_key)
                    .is_some_and(|v| segment_of(v, segment.total()) == segment.id()),
                (CallKind::Query, _) => call
                    .filter
                    .key_conditions()
                    .iter()
                    .all(|(column, condition)| condition.matches(item.get(column))),
                _ => true,
            }
        };
        let mut candidates = table
            .items
            .range((start, Bound::Unbounded))
            .map(|(_, item)| item)
            .filter(in_scope)
            .peekable();

        let mut page = RawPage::default();
        let mut evaluated = 0u64;
        let mut bytes = 0usize;
        let mut last = None;
        for item in candidates.by_ref() {
            evaluated += 1;
            bytes += item_size(item);
            if call.filter.matches(item) {
                page.items.push(project(item, call.attributes));
            }
            last = Some(item);
            let full = evaluated >= call.limit.max_items || bytes as u64 >= call.limit.max_bytes;
            if full {
                break;
            }
        }
        if candidates.peek().is_some() {
            page.next_cursor = last.map(|item| table.cursor_for(item, index));
        }
        page.consumed_capacity = read_cost(bytes);
        Ok(page)
    }
}

impl RemoteStore for MemoryStore {
    fn describe_table(&self, table: &str) -> Result<TableDescription, RemoteError> {
        self.calls.lock().push(CallRecord {
            kind: CallKind::Describe,
            table: table.to_string(),
            filter: None,
            cursor: None,
            limit: None,
            segment: None,
        });
        self.tables
            .read()
            .get(table)
            .map(MemoryTable::describe)
            .ok_or_else(|| RemoteError::ResourceNotFound(format!("table `{table}`")))
    }

    fn scan(&self, call: &ReadCall<'_>) -> Result<RawPage, RemoteError> {
        self.read(CallKind::Scan, call)
    }

    fn query(&self, call: &ReadCall<'_>) -> Result<RawPage, RemoteError> {
        self.read(CallKind::Query, call)
    }
}
