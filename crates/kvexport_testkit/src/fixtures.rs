//! Test fixtures and store helpers.
//!
//! Provides a bucketed events table in a [`MemoryStore`], the job settings
//! that export it, and clients whose retries sleep on a [`ManualClock`].

use kvexport_core::{
    keys, plan_job, AttributeValue, Clock, ExportClient, ExportError, FibonacciRetryer, IndexInfo,
    Item, JobConf, JobPlan, ManualClock, MemoryStore, PageFetcher, ReadManager, ReadStats,
    RetryConfig, TableDescription, TableDump,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Name of the fixture table.
pub const TABLE_NAME: &str = "events";

/// Name of the fixture table's bucket index.
pub const INDEX_NAME: &str = "by_bucket";

/// The fixture table's schema, with no items.
pub fn events_description(read_capacity_units: f64) -> TableDescription {
    TableDescription {
        name: TABLE_NAME.into(),
        item_count: 0,
        size_bytes: 0,
        read_capacity_units,
        hash_key: "id".into(),
        range_key: None,
        indexes: vec![IndexInfo::new(INDEX_NAME, "bucket", Some("ts".into()))],
    }
}

/// Item number `i` of a table with `buckets` buckets.
///
/// Bucket is `i % buckets + 1` and `ts` is `i`.
pub fn event(i: u32, buckets: u32) -> Item {
    Item::from([
        ("id".to_string(), AttributeValue::string(format!("e{i:06}"))),
        ("bucket".to_string(), AttributeValue::number(i % buckets.max(1) + 1)),
        ("ts".to_string(), AttributeValue::number(i)),
        ("kind".to_string(), AttributeValue::string(["click", "view", "buy"][i as usize % 3])),
    ])
}

/// A populated store plus the clock its clients sleep on.
pub struct TestTable {
    /// The store.
    pub store: Arc<MemoryStore>,
    /// The clock for retries and rate control.
    pub clock: Arc<ManualClock>,
    /// Number of buckets.
    pub buckets: u32,
    /// Items per bucket.
    pub per_bucket: u32,
}

impl TestTable {
    /// Creates a table of `buckets * per_bucket` events.
    pub fn bucketed(buckets: u32, per_bucket: u32) -> Self {
        Self::with_capacity(buckets, per_bucket, 100.0)
    }

    /// Like [`TestTable::bucketed`] with the given provisioned capacity.
    pub fn with_capacity(buckets: u32, per_bucket: u32, read_capacity_units: f64) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.create_table(events_description(read_capacity_units));
        for i in 0..buckets * per_bucket {
            store
                .put_item(TABLE_NAME, event(i, buckets))
                .expect("Failed to insert fixture item");
        }
        Self {
            store,
            clock: Arc::new(ManualClock::new()),
            buckets,
            per_bucket,
        }
    }

    /// Total items in the table.
    pub fn len(&self) -> usize {
        (self.buckets * self.per_bucket) as usize
    }

    /// Returns true if the table holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The clock as a trait object.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// A client allowing `attempts` attempts per call.
    pub fn client(&self, attempts: u32) -> ExportClient<Arc<MemoryStore>> {
        let retryer = FibonacciRetryer::new(RetryConfig::new(attempts), self.clock());
        ExportClient::new(self.store.clone(), retryer)
    }

    /// Settings for a full-scan export over `segments` segments.
    pub fn scan_conf(&self, segments: u32) -> JobConf {
        JobConf::new()
            .with(keys::TABLE_NAME, TABLE_NAME)
            .with(keys::NUM_SEGMENTS, segments)
    }

    /// Settings for a sampled export reading every bucket, `ts` in `[min, max]`.
    pub fn sampled_conf(&self, min: i64, max: i64) -> JobConf {
        JobConf::new()
            .with(keys::TABLE_NAME, TABLE_NAME)
            .with(keys::INDEX_NAME, INDEX_NAME)
            .with(keys::ROW_KEY_NAME, "bucket")
            .with(keys::SORT_KEY_NAME, "ts")
            .with(keys::SORT_KEY_MIN_VALUE, min)
            .with(keys::SORT_KEY_MAX_VALUE, max)
            .with(keys::KEY_SPACE, self.buckets)
            .with(keys::ROW_SAMPLE_PERCENT, 1.0)
    }

    /// Plans a job with a three-attempt client.
    pub fn plan(&self, conf: &JobConf, workers: u32) -> JobPlan {
        plan_job(&self.client(3), conf, workers).expect("Failed to plan fixture job")
    }

    /// Reads every split of `plan` in turn and returns all items.
    pub fn export_all(&self, plan: &JobPlan, conf: &JobConf) -> (Vec<Item>, ReadStats) {
        let mut items = Vec::new();
        let mut stats = ReadStats::default();
        for index in 0..plan.splits.len() {
            let mut reader = plan
                .reader(self.client(3), conf, index, self.clock())
                .expect("Failed to build reader");
            stats.merge(&drain(&mut reader, &mut items).expect("Export failed"));
        }
        (items, stats)
    }

    /// The table as a JSON dump.
    pub fn dump(&self) -> TableDump {
        TableDump {
            description: events_description(100.0),
            items: (0..self.buckets * self.per_bucket)
                .map(|i| event(i, self.buckets))
                .collect(),
        }
    }
}

/// Reads `reader` to the end, appending its items to `items`.
pub fn drain<F: PageFetcher>(
    reader: &mut ReadManager<F>,
    items: &mut Vec<Item>,
) -> Result<ReadStats, ExportError> {
    reader.run(|item| {
        items.push(item);
        Ok::<_, ExportError>(())
    })
}

/// A JSON dump written to a temporary directory.
pub struct DumpFile {
    /// Path of the dump.
    pub path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl DumpFile {
    /// Writes `dumps` to a fresh temporary file.
    pub fn write(dumps: &[TableDump]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("dump.json");
        let json = serde_json::to_string_pretty(dumps).expect("Failed to encode dump");
        std::fs::write(&path, json).expect("Failed to write dump");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }
}
