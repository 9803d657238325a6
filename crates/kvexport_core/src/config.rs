//! Job configuration and policy settings.

use crate::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Names of the job settings understood by the planner and the readers.
pub mod keys {
    /// Table to read. Required.
    pub const TABLE_NAME: &str = "kvexport.input.table_name";
    /// Comma-separated attribute projection. Default is all attributes.
    pub const ATTRIBUTES_TO_GET: &str = "kvexport.input.attributes";
    /// Override of the computed full-scan segment count.
    pub const NUM_SEGMENTS: &str = "kvexport.input.num_segments";
    /// Synthetic row-key attribute of the export index.
    pub const ROW_KEY_NAME: &str = "kvexport.export.row_key_name";
    /// Secondary index used for sampled key-range exports.
    pub const INDEX_NAME: &str = "kvexport.export.index_name";
    /// Sort-key attribute of the export index.
    pub const SORT_KEY_NAME: &str = "kvexport.export.sort_key_name";
    /// Inclusive lower bound of the exported sort-key range.
    pub const SORT_KEY_MIN_VALUE: &str = "kvexport.export.sort_key_min";
    /// Inclusive upper bound of the exported sort-key range.
    pub const SORT_KEY_MAX_VALUE: &str = "kvexport.export.sort_key_max";
    /// Fraction of the row-key space to sample.
    pub const ROW_SAMPLE_PERCENT: &str = "kvexport.export.row_sample_percent";
    /// Size of the synthetic row-key space.
    pub const KEY_SPACE: &str = "kvexport.export.key_space";
    /// Fraction of provisioned read capacity the whole job may use.
    pub const THROUGHPUT_READ_PERCENT: &str = "kvexport.throughput.read_percent";
    /// Override of the table's provisioned read capacity units.
    pub const READ_CAPACITY_UNITS: &str = "kvexport.throughput.read_capacity_units";
    /// Maximum attempts per remote call.
    pub const RETRY_MAX_ATTEMPTS: &str = "kvexport.retry.max_attempts";
    /// Base delay unit of the Fibonacci backoff, in milliseconds.
    pub const RETRY_BASE_DELAY_MS: &str = "kvexport.retry.base_delay_ms";
    /// Ceiling for a single backoff delay, in milliseconds.
    pub const RETRY_MAX_DELAY_MS: &str = "kvexport.retry.max_delay_ms";
    /// Length of the rate controller's accounting window, in milliseconds.
    pub const RATE_WINDOW_MS: &str = "kvexport.rate.window_ms";
}

/// Default fraction of provisioned capacity a job may consume.
pub const DEFAULT_THROUGHPUT_PERCENT: f64 = 0.5;

/// Highest accepted throughput fraction.
pub const MAX_THROUGHPUT_PERCENT: f64 = 1.5;

/// String settings for one job, as handed over by the host framework.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobConf {
    settings: BTreeMap<String, String>,
}

impl JobConf {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value and returns the configuration.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a value.
    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.settings.insert(key.to_string(), value.to_string());
    }

    /// Removes a value.
    pub fn unset(&mut self, key: &str) {
        self.settings.remove(key);
    }

    /// Returns the raw value, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Returns the value, failing when it is absent or empty.
    pub fn get_required(&self, key: &str) -> ExportResult<&str> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ExportError::missing_setting(key)),
        }
    }

    fn parse<T: FromStr>(&self, key: &str) -> ExportResult<Option<T>> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => text.parse().map(Some).map_err(|_| {
                ExportError::configuration(key, format!("cannot parse `{text}`"))
            }),
        }
    }

    /// Returns the value as `f64`, if set.
    pub fn get_f64(&self, key: &str) -> ExportResult<Option<f64>> {
        self.parse(key)
    }

    /// Returns the value as `i64`, if set.
    pub fn get_i64(&self, key: &str) -> ExportResult<Option<i64>> {
        self.parse(key)
    }

    /// Returns the value as `u32`, if set.
    pub fn get_u32(&self, key: &str) -> ExportResult<Option<u32>> {
        self.parse(key)
    }

    /// Returns the value as `u64`, if set.
    pub fn get_u64(&self, key: &str) -> ExportResult<Option<u64>> {
        self.parse(key)
    }

    /// Returns the value as `i64`, failing when it is absent.
    pub fn require_i64(&self, key: &str) -> ExportResult<i64> {
        self.get_i64(key)?
            .ok_or_else(|| ExportError::missing_setting(key))
    }

    /// The attribute projection, `None` meaning all attributes.
    pub fn attributes(&self) -> Option<Vec<String>> {
        let csv = self.get(keys::ATTRIBUTES_TO_GET)?.trim();
        let attributes: Vec<String> = csv
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        if attributes.is_empty() {
            None
        } else {
            Some(attributes)
        }
    }

    /// The job-wide throughput fraction, validated.
    pub fn throughput_percent(&self) -> ExportResult<f64> {
        let percent = self
            .get_f64(keys::THROUGHPUT_READ_PERCENT)?
            .unwrap_or(DEFAULT_THROUGHPUT_PERCENT);
        let in_range = percent > 0.0 && percent <= MAX_THROUGHPUT_PERCENT;
        if !in_range {
            return Err(ExportError::configuration(
                keys::THROUGHPUT_READ_PERCENT,
                format!("{percent} is outside (0, {MAX_THROUGHPUT_PERCENT}]"),
            ));
        }
        Ok(percent)
    }

    /// Retry policy, starting from the defaults.
    pub fn retry_config(&self) -> ExportResult<RetryConfig> {
        let mut config = RetryConfig::default();
        if let Some(attempts) = self.get_u32(keys::RETRY_MAX_ATTEMPTS)? {
            if attempts == 0 {
                return Err(ExportError::configuration(
                    keys::RETRY_MAX_ATTEMPTS,
                    "at least one attempt is required",
                ));
            }
            config.max_attempts = attempts;
        }
        if let Some(ms) = self.get_u64(keys::RETRY_BASE_DELAY_MS)? {
            config.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.get_u64(keys::RETRY_MAX_DELAY_MS)? {
            config.max_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Checks every rate setting that does not depend on the table.
    ///
    /// Planning calls this before describing the table, so a bad value
    /// fails without a remote call.
    pub fn validate_rate_settings(&self) -> ExportResult<()> {
        self.throughput_percent()?;
        self.provisioned_override()?;
        self.rate_window()?;
        Ok(())
    }

    fn provisioned_override(&self) -> ExportResult<Option<f64>> {
        let Some(units) = self.get_f64(keys::READ_CAPACITY_UNITS)? else {
            return Ok(None);
        };
        check_provisioned(units)?;
        Ok(Some(units))
    }

    fn rate_window(&self) -> ExportResult<Option<Duration>> {
        match self.get_u64(keys::RATE_WINDOW_MS)? {
            Some(0) => Err(ExportError::configuration(
                keys::RATE_WINDOW_MS,
                "window must be non-zero",
            )),
            ms => Ok(ms.map(Duration::from_millis)),
        }
    }

    /// Rate policy for one of `workers` workers sharing `provisioned_units`.
    ///
    /// The job's budget is `provisioned_units * throughput_percent`, divided
    /// evenly across workers. Workers never coordinate at runtime, so this
    /// static division is the only sharing.
    pub fn rate_config(&self, provisioned_units: f64, workers: u32) -> ExportResult<RateConfig> {
        let provisioned = match self.provisioned_override()? {
            Some(units) => units,
            None => check_provisioned(provisioned_units)?,
        };
        let job_units = provisioned * self.throughput_percent()?;
        let mut config = RateConfig::new(job_units / f64::from(workers.max(1)));
        if let Some(window) = self.rate_window()? {
            config.window = window;
        }
        Ok(config)
    }
}

fn check_provisioned(units: f64) -> ExportResult<f64> {
    if units.is_nan() || units <= 0.0 {
        return Err(ExportError::configuration(
            keys::READ_CAPACITY_UNITS,
            format!("provisioned read capacity must be positive, got {units}"),
        ));
    }
    Ok(units)
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobConf {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            settings: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Configuration for retry behavior.
///
/// Delays between attempts grow along the Fibonacci sequence (1, 1, 2, 3,
/// 5, ... times `base_delay`), each capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// One unit of the Fibonacci backoff.
    pub base_delay: Duration,
    /// Maximum delay before a single retry.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a configuration allowing `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `retry` (1-indexed). Zero for `retry == 0`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let units = fibonacci(retry);
        let delay = self
            .base_delay
            .checked_mul(units)
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

/// The `n`th Fibonacci number with `fibonacci(1) == fibonacci(2) == 1`,
/// saturating at `u32::MAX`.
fn fibonacci(n: u32) -> u32 {
    let (mut previous, mut current) = (0u32, 1u32);
    for _ in 1..n {
        let next = previous.saturating_add(current);
        previous = current;
        current = next;
    }
    current
}

/// Configuration for per-worker rate control.
#[derive(Debug, Clone, PartialEq)]
pub struct RateConfig {
    /// Capacity units this worker may consume per second.
    pub units_per_second: f64,
    /// Accounting window.
    pub window: Duration,
    /// Bytes one capacity unit pays for.
    pub bytes_per_unit: u64,
    /// Ceiling on items per page.
    pub max_page_items: u64,
    /// Ceiling on bytes per page.
    pub max_page_bytes: u64,
    /// Lowest fraction of the budget the controller backs off to.
    pub min_pressure: f64,
}

impl RateConfig {
    /// Creates a configuration for `units_per_second`.
    pub fn new(units_per_second: f64) -> Self {
        Self {
            units_per_second,
            window: Duration::from_secs(1),
            bytes_per_unit: 4 * 1024,
            max_page_items: 1_000,
            max_page_bytes: 1024 * 1024,
            min_pressure: 0.1,
        }
    }

    /// Sets the accounting window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the per-page item ceiling.
    #[must_use]
    pub fn with_max_page_items(mut self, items: u64) -> Self {
        self.max_page_items = items;
        self
    }

    /// Sets the per-page byte ceiling.
    #[must_use]
    pub fn with_max_page_bytes(mut self, bytes: u64) -> Self {
        self.max_page_bytes = bytes;
        self
    }

    /// Capacity units available in one full window.
    pub fn window_budget(&self) -> f64 {
        self.units_per_second * self.window.as_secs_f64()
    }
}
