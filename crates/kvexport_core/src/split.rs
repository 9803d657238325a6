//! Segment and split planning.
//!
//! A table's key space is divided into `total_segments` segments, and the
//! segments are dealt out to workers. Two policies exist:
//!
//! - [`FullSegmentSplitGenerator`] uses the store's physical segments for
//!   parallel scans.
//! - [`SampledKeyRangeSplitGenerator`] exports a sort-key range off a
//!   secondary index whose partition key is a synthetic bucket number. Only
//!   a sampled subset of the buckets is read, and each segment stands in for
//!   one bucket.
//!
//! Both deal segments round-robin, so every split holds
//! `total / workers` segments and the first `total % workers` splits hold
//! one more. Split sizes therefore differ by at most one.

use crate::config::{keys, JobConf};
use crate::error::{ExportError, ExportResult};
use crate::filter::{ColumnType, FilterOperator, IndexInfo, NAryFilter, QueryFilter};
use serde::{Deserialize, Serialize};

/// Default size of the synthetic row-key space.
pub const DEFAULT_KEY_SPACE: u32 = 10_000;

/// Default fraction of the row-key space that is sampled.
pub const DEFAULT_SAMPLE_FRACTION: f64 = 0.001;

/// One addressable slice of the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    id: u32,
    total: u32,
}

impl Segment {
    /// Creates a segment, checking `id < total`.
    pub fn new(id: u32, total: u32) -> ExportResult<Self> {
        if id >= total {
            return Err(ExportError::configuration(
                "segment",
                format!("segment {id} is outside [0, {total})"),
            ));
        }
        Ok(Self { id, total })
    }

    /// Segment id in `[0, total)`.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Total number of segments.
    pub fn total(&self) -> u32 {
        self.total
    }
}

/// The segments assigned to one worker, plus the push-down filter they share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    segments: Vec<u32>,
    total_segments: u32,
    key_offset: u32,
    filter: QueryFilter,
}

impl Split {
    /// Creates a split.
    ///
    /// `key_offset` is added to a segment id to form the row-key value used
    /// by keyed reads.
    pub fn new(
        segments: Vec<u32>,
        total_segments: u32,
        key_offset: u32,
        filter: QueryFilter,
    ) -> ExportResult<Self> {
        if let Some(bad) = segments.iter().find(|&&id| id >= total_segments) {
            return Err(ExportError::configuration(
                "segment",
                format!("segment {bad} is outside [0, {total_segments})"),
            ));
        }
        Ok(Self {
            segments,
            total_segments,
            key_offset,
            filter,
        })
    }

    /// Segment ids, in read order.
    pub fn segment_ids(&self) -> &[u32] {
        &self.segments
    }

    /// The segments, in read order.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        let total = self.total_segments;
        self.segments.iter().map(move |&id| Segment { id, total })
    }

    /// Total segment count across all splits.
    pub fn total_segments(&self) -> u32 {
        self.total_segments
    }

    /// Number of segments in this split.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the split holds no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The shared template filter. Readers clone it before adding
    /// segment-specific conditions.
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// Row-key value a keyed read uses for `segment_id`.
    pub fn row_key(&self, segment_id: u32) -> u64 {
        u64::from(segment_id) + u64::from(self.key_offset)
    }

    /// Row-key values of every segment in this split.
    pub fn row_keys(&self) -> Vec<u64> {
        self.segments.iter().map(|&id| self.row_key(id)).collect()
    }
}

/// Deals `total` segments round-robin over `workers` groups.
///
/// `workers` is clamped to `[1, total]`. Returns no groups when `total == 0`.
pub fn balance_segments(total: u32, workers: u32) -> Vec<Vec<u32>> {
    if total == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, total);
    let per_split = (total / workers) as usize + 1;
    let mut groups: Vec<Vec<u32>> = (0..workers).map(|_| Vec::with_capacity(per_split)).collect();
    for segment in 0..total {
        groups[(segment % workers) as usize].push(segment);
    }
    groups
}

/// Produces the splits for a job.
pub trait SplitGenerator {
    /// Divides the key space into at most `num_workers` balanced splits.
    ///
    /// `total_available_segments` is the store-reported segment count;
    /// generators that derive their own count ignore it.
    fn generate_splits(
        &self,
        total_available_segments: u32,
        num_workers: u32,
    ) -> ExportResult<Vec<Split>>;
}

/// Splits over the store's physical segments, for parallel scans.
#[derive(Debug, Clone, Default)]
pub struct FullSegmentSplitGenerator {
    filter: QueryFilter,
}

impl FullSegmentSplitGenerator {
    /// Creates a generator whose splits share `filter`.
    pub fn new(filter: QueryFilter) -> Self {
        Self { filter }
    }
}

impl SplitGenerator for FullSegmentSplitGenerator {
    fn generate_splits(
        &self,
        total_available_segments: u32,
        num_workers: u32,
    ) -> ExportResult<Vec<Split>> {
        if total_available_segments == 0 {
            return Err(ExportError::configuration(
                keys::NUM_SEGMENTS,
                "at least one segment is required",
            ));
        }
        balance_segments(total_available_segments, num_workers)
            .into_iter()
            .map(|segments| Split::new(segments, total_available_segments, 0, self.filter.clone()))
            .collect()
    }
}

/// How much of the synthetic row-key space to read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicy {
    key_space: u32,
    fraction: f64,
}

impl SamplingPolicy {
    /// Creates a policy. `fraction` must be in `(0, 1]`.
    pub fn new(key_space: u32, fraction: f64) -> ExportResult<Self> {
        if key_space == 0 {
            return Err(ExportError::configuration(
                keys::KEY_SPACE,
                "key space must hold at least one row key",
            ));
        }
        let in_range = fraction > 0.0 && fraction <= 1.0;
        if !in_range {
            return Err(ExportError::configuration(
                keys::ROW_SAMPLE_PERCENT,
                format!("sampling fraction {fraction} would select no segments"),
            ));
        }
        Ok(Self {
            key_space,
            fraction,
        })
    }

    /// Reads the policy from the job settings, applying the defaults.
    pub fn from_conf(conf: &JobConf) -> ExportResult<Self> {
        let key_space = conf.get_u32(keys::KEY_SPACE)?.unwrap_or(DEFAULT_KEY_SPACE);
        let fraction = conf
            .get_f64(keys::ROW_SAMPLE_PERCENT)?
            .unwrap_or(DEFAULT_SAMPLE_FRACTION);
        Self::new(key_space, fraction)
    }

    /// Size of the row-key space.
    pub fn key_space(&self) -> u32 {
        self.key_space
    }

    /// Sampled fraction.
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// `round(key_space * fraction)`, never less than one.
    pub fn effective_segments(&self) -> u32 {
        let segments = (f64::from(self.key_space) * self.fraction).round() as u32;
        segments.clamp(1, self.key_space)
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            key_space: DEFAULT_KEY_SPACE,
            fraction: DEFAULT_SAMPLE_FRACTION,
        }
    }
}

/// Splits a sampled sort-key range export over an index keyed by a
/// synthetic bucket number.
///
/// Segment `i` reads bucket `i + 1`; buckets are 1-indexed in the emitted
/// filter.
#[derive(Debug, Clone)]
pub struct SampledKeyRangeSplitGenerator {
    index_name: String,
    row_key_name: String,
    sort_key_name: String,
    sort_key_min: i64,
    sort_key_max: i64,
    sampling: SamplingPolicy,
}

impl SampledKeyRangeSplitGenerator {
    /// Reads and validates the export settings.
    ///
    /// Fails on the first missing setting, naming it.
    pub fn from_conf(conf: &JobConf) -> ExportResult<Self> {
        let index_name = conf.get_required(keys::INDEX_NAME)?.to_string();
        let row_key_name = conf.get_required(keys::ROW_KEY_NAME)?.to_string();
        let sort_key_name = conf.get_required(keys::SORT_KEY_NAME)?.to_string();
        let sort_key_min = conf.require_i64(keys::SORT_KEY_MIN_VALUE)?;
        let sort_key_max = conf.require_i64(keys::SORT_KEY_MAX_VALUE)?;
        if sort_key_min > sort_key_max {
            return Err(ExportError::configuration(
                keys::SORT_KEY_MIN_VALUE,
                format!("lower bound {sort_key_min} exceeds upper bound {sort_key_max}"),
            ));
        }
        Ok(Self {
            index_name,
            row_key_name,
            sort_key_name,
            sort_key_min,
            sort_key_max,
            sampling: SamplingPolicy::from_conf(conf)?,
        })
    }

    /// The sampling policy in force.
    pub fn sampling(&self) -> SamplingPolicy {
        self.sampling
    }

    /// The template filter: the export index plus the sort-key range.
    pub fn template_filter(&self) -> ExportResult<QueryFilter> {
        let mut filter = QueryFilter::new();
        filter.set_index(IndexInfo::new(
            &self.index_name,
            &self.row_key_name,
            Some(self.sort_key_name.clone()),
        ));
        let range = NAryFilter::new(
            &self.sort_key_name,
            FilterOperator::Between,
            ColumnType::Number,
            [self.sort_key_min.to_string(), self.sort_key_max.to_string()],
        )?;
        filter.add_key_condition(&range)?;
        Ok(filter)
    }
}

impl SplitGenerator for SampledKeyRangeSplitGenerator {
    fn generate_splits(
        &self,
        _total_available_segments: u32,
        num_workers: u32,
    ) -> ExportResult<Vec<Split>> {
        let total = self.sampling.effective_segments();
        let filter = self.template_filter()?;
        balance_segments(total, num_workers)
            .into_iter()
            .map(|segments| Split::new(segments, total, 1, filter.clone()))
            .collect()
    }
}
