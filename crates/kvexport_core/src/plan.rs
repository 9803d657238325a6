//! Job planning: describe the table, pick a split policy, divide the budget.

use crate::client::{ExportClient, RemoteStore, TableDescription};
use crate::clock::Clock;
use crate::config::{keys, JobConf, RateConfig};
use crate::error::{ExportError, ExportResult};
use crate::filter::QueryFilter;
use crate::rate::RateController;
use crate::read::{KeyedQueryFetcher, PageFetcher, ReadManager, ScanFetcher};
use crate::split::{FullSegmentSplitGenerator, SampledKeyRangeSplitGenerator, Split, SplitGenerator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Table bytes covered by one full-scan segment.
pub const BYTES_PER_SEGMENT: u64 = 1 << 30;

/// Upper bound on full-scan segments.
pub const MAX_SEGMENTS: u32 = 1_000_000;

/// How the workers of a plan read their segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadMode {
    /// Parallel scans of physical segments.
    Scan,
    /// Queries of one synthetic row-key bucket per segment.
    KeyedQuery,
}

/// The splits of a job and what each worker may consume.
#[derive(Debug, Clone)]
pub struct JobPlan {
    /// The table as described at planning time.
    pub table: TableDescription,
    /// How segments are read.
    pub mode: ReadMode,
    /// One split per worker.
    pub splits: Vec<Split>,
    /// Rate policy for each worker.
    pub rate: RateConfig,
}

/// Full-scan segment count for a table of `size_bytes` read by `num_workers`.
pub fn full_segment_count(size_bytes: u64, num_workers: u32) -> u32 {
    let by_size = size_bytes.div_ceil(BYTES_PER_SEGMENT);
    let segments = by_size.max(u64::from(num_workers.max(1)));
    segments.min(u64::from(MAX_SEGMENTS)) as u32
}

/// Plans a job over at most `num_workers` workers.
///
/// Settings are validated before the table is described, so a bad
/// configuration never reaches the store. The sampled key-range policy is
/// used when an index name is configured; otherwise physical segments are
/// scanned.
pub fn plan_job<S: RemoteStore>(
    client: &ExportClient<S>,
    conf: &JobConf,
    num_workers: u32,
) -> ExportResult<JobPlan> {
    let table_name = conf.get_required(keys::TABLE_NAME)?;
    let sampled = match conf.get(keys::INDEX_NAME) {
        Some(name) if !name.trim().is_empty() => {
            Some(SampledKeyRangeSplitGenerator::from_conf(conf)?)
        }
        _ => None,
    };
    let segment_override = match conf.get_u32(keys::NUM_SEGMENTS)? {
        Some(0) => {
            return Err(ExportError::configuration(
                keys::NUM_SEGMENTS,
                "at least one segment is required",
            ))
        }
        segments => segments,
    };
    conf.validate_rate_settings()?;

    let table = client.describe_table(table_name)?.value;
    let (mode, splits) = match sampled {
        Some(generator) => {
            let index_name = conf.get_required(keys::INDEX_NAME)?;
            if table.index(index_name).is_none() {
                return Err(ExportError::configuration(
                    keys::INDEX_NAME,
                    format!("table `{table_name}` has no index `{index_name}`"),
                ));
            }
            let splits = generator.generate_splits(0, num_workers)?;
            (ReadMode::KeyedQuery, splits)
        }
        None => {
            let segments = segment_override
                .unwrap_or_else(|| full_segment_count(table.size_bytes, num_workers));
            let splits = FullSegmentSplitGenerator::new(QueryFilter::new())
                .generate_splits(segments, num_workers)?;
            (ReadMode::Scan, splits)
        }
    };

    let rate = conf.rate_config(table.read_capacity_units, splits.len() as u32)?;
    info!(
        table = %table.name,
        mode = ?mode,
        splits = splits.len(),
        total_segments = splits.first().map_or(0, Split::total_segments),
        units_per_worker = rate.units_per_second,
        "planned export"
    );
    Ok(JobPlan {
        table,
        mode,
        splits,
        rate,
    })
}

impl JobPlan {
    /// Builds the read manager for split `index`.
    pub fn reader<S>(
        &self,
        client: ExportClient<S>,
        conf: &JobConf,
        index: usize,
        clock: Arc<dyn Clock>,
    ) -> ExportResult<ReadManager<Box<dyn PageFetcher>>>
    where
        S: RemoteStore + 'static,
    {
        let split = self.splits.get(index).cloned().ok_or_else(|| {
            ExportError::configuration(
                "split",
                format!("split {index} is outside a plan of {}", self.splits.len()),
            )
        })?;
        let fetcher: Box<dyn PageFetcher> = match self.mode {
            ReadMode::Scan => Box::new(ScanFetcher::from_conf(
                client,
                conf,
                split.filter().clone(),
            )?),
            ReadMode::KeyedQuery => Box::new(KeyedQueryFetcher::from_conf(
                client,
                conf,
                split.filter().clone(),
            )?),
        };
        let rate = RateController::new(self.rate.clone(), clock)?;
        Ok(ReadManager::new(fetcher, rate, split))
    }
}
