//! CLI command implementations.

pub mod export;
pub mod plan;

use crate::error::{CliError, CliResult};
use chrono::NaiveDateTime;
use clap::Args;
use kvexport_core::{keys, Clock, ExportClient, FibonacciRetryer, JobConf, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Format of `--min-sort-key` and `--max-sort-key`, read as UTC.
pub const SORT_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Options describing one export job.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// JSON table dump to read from
    #[arg(long)]
    pub source: PathBuf,

    /// Table to export
    #[arg(short = 't', long)]
    pub table_name: String,

    /// Secondary index keyed by row-key bucket; enables the sampled export
    #[arg(short = 'i', long)]
    pub index_name: Option<String>,

    /// Row-key (bucket) attribute of the index
    #[arg(short = 'r', long)]
    pub row_key: Option<String>,

    /// Sort-key attribute of the index
    #[arg(short = 's', long)]
    pub sort_key: Option<String>,

    /// Lowest sort key, as YYYY-MM-DDTHH:MM:SS (UTC) or epoch seconds
    #[arg(short = 'n', long)]
    pub min_sort_key: Option<String>,

    /// Highest sort key, as YYYY-MM-DDTHH:MM:SS (UTC) or epoch seconds
    #[arg(short = 'x', long)]
    pub max_sort_key: Option<String>,

    /// Fraction of row-key buckets to read
    #[arg(short = 'p', long)]
    pub sample_percent: Option<f64>,

    /// Comma-separated attributes to export (default: all)
    #[arg(short = 'a', long)]
    pub attributes: Option<String>,

    /// Fraction of provisioned read capacity the job may use
    #[arg(short = 'R', long, default_value = "0.5")]
    pub read_ratio: f64,

    /// Number of full-scan segments (default: derived from table size)
    #[arg(long)]
    pub segments: Option<u32>,
}

/// Parses a sort-key bound into epoch seconds.
pub fn parse_sort_key(arg: &'static str, value: &str) -> CliResult<i64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    NaiveDateTime::parse_from_str(value, SORT_KEY_FORMAT)
        .map(|time| time.and_utc().timestamp())
        .map_err(|e| CliError::InvalidArgument {
            arg,
            reason: format!("`{value}` is not {SORT_KEY_FORMAT} ({e})"),
        })
}

impl JobArgs {
    /// Builds the job settings. Unset options are left out.
    pub fn to_conf(&self) -> CliResult<JobConf> {
        let mut conf = JobConf::new()
            .with(keys::TABLE_NAME, &self.table_name)
            .with(keys::THROUGHPUT_READ_PERCENT, self.read_ratio);
        let optional = [
            (keys::INDEX_NAME, &self.index_name),
            (keys::ROW_KEY_NAME, &self.row_key),
            (keys::SORT_KEY_NAME, &self.sort_key),
            (keys::ATTRIBUTES_TO_GET, &self.attributes),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                conf.set(key, value);
            }
        }
        if let Some(min) = &self.min_sort_key {
            conf.set(keys::SORT_KEY_MIN_VALUE, parse_sort_key("min-sort-key", min)?);
        }
        if let Some(max) = &self.max_sort_key {
            conf.set(keys::SORT_KEY_MAX_VALUE, parse_sort_key("max-sort-key", max)?);
        }
        if let Some(percent) = self.sample_percent {
            conf.set(keys::ROW_SAMPLE_PERCENT, percent);
        }
        if let Some(segments) = self.segments {
            conf.set(keys::NUM_SEGMENTS, segments);
        }
        Ok(conf)
    }

    /// Loads the source dump.
    pub fn load_store(&self) -> CliResult<Arc<MemoryStore>> {
        let json = std::fs::read_to_string(&self.source)?;
        Ok(Arc::new(MemoryStore::from_json(&json)?))
    }
}

/// Creates a retrying client over `store`.
pub fn client(
    store: Arc<MemoryStore>,
    conf: &JobConf,
    clock: Arc<dyn Clock>,
) -> CliResult<ExportClient<Arc<MemoryStore>>> {
    let retryer = FibonacciRetryer::new(conf.retry_config()?, clock);
    Ok(ExportClient::new(store, retryer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> JobArgs {
        JobArgs {
            source: PathBuf::from("dump.json"),
            table_name: "events".into(),
            index_name: Some("by_bucket".into()),
            row_key: Some("bucket".into()),
            sort_key: Some("ts".into()),
            min_sort_key: Some("2015-01-01T00:00:00".into()),
            max_sort_key: Some("1420156800".into()),
            sample_percent: Some(0.1),
            attributes: None,
            read_ratio: 0.5,
            segments: None,
        }
    }

    #[test]
    fn sort_keys_become_epoch_seconds() {
        assert_eq!(parse_sort_key("min", "2015-01-01T00:00:00").unwrap(), 1_420_070_400);
        assert_eq!(parse_sort_key("min", " 42 ").unwrap(), 42);
        assert!(matches!(
            parse_sort_key("min", "2015-01-01"),
            Err(CliError::InvalidArgument { arg: "min", .. })
        ));
    }

    #[test]
    fn args_map_onto_settings() {
        let conf = args().to_conf().unwrap();
        assert_eq!(conf.get(keys::TABLE_NAME), Some("events"));
        assert_eq!(conf.get(keys::SORT_KEY_MIN_VALUE), Some("1420070400"));
        assert_eq!(conf.get(keys::SORT_KEY_MAX_VALUE), Some("1420156800"));
        assert_eq!(conf.get_f64(keys::ROW_SAMPLE_PERCENT).unwrap(), Some(0.1));
        assert_eq!(conf.get(keys::ATTRIBUTES_TO_GET), None);
        assert_eq!(conf.throughput_percent().unwrap(), 0.5);
    }
}
