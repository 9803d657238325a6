//! Per-worker admission control over consumed read capacity.
//!
//! Each worker owns one [`RateController`] configured with its static share
//! of the job's throughput budget. Workers run in separate processes with no
//! shared runtime state, so there is no cross-worker feedback: the budget is
//! divided once at planning time and each controller adapts only to what its
//! own worker observes.

use crate::clock::Clock;
use crate::config::RateConfig;
use crate::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Initial estimate of capacity units consumed per item.
const INITIAL_UNITS_PER_ITEM: f64 = 0.5;

/// Weight of the newest sample in the cost-per-item average.
const COST_SMOOTHING: f64 = 0.5;

/// Pressure regained after each page that needed no retries.
const PRESSURE_RECOVERY_STEP: f64 = 0.1;

/// Ceiling for a single page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLimit {
    /// Maximum items to request.
    pub max_items: u64,
    /// Maximum bytes to request.
    pub max_bytes: u64,
}

impl RequestLimit {
    /// Creates a limit.
    pub fn new(max_items: u64, max_bytes: u64) -> Self {
        Self {
            max_items,
            max_bytes,
        }
    }
}

/// Computes request limits from the remaining budget and blocks the caller
/// while the current window's budget is spent.
///
/// The controller is the only component that introduces wait time for
/// throughput reasons. It never drops a request: [`RateController::next_limit`]
/// always returns a limit of at least one item, after waiting if needed.
pub struct RateController {
    config: RateConfig,
    clock: Arc<dyn Clock>,
    window_start: Duration,
    consumed: f64,
    units_per_item: f64,
    pressure: f64,
    throttle_waits: u64,
    throttled_for: Duration,
}

impl std::fmt::Debug for RateController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateController")
            .field("config", &self.config)
            .field("consumed", &self.consumed)
            .field("units_per_item", &self.units_per_item)
            .field("pressure", &self.pressure)
            .finish_non_exhaustive()
    }
}

impl RateController {
    /// Creates a controller, validating the policy.
    pub fn new(config: RateConfig, clock: Arc<dyn Clock>) -> ExportResult<Self> {
        if !config.units_per_second.is_finite() || config.units_per_second <= 0.0 {
            return Err(ExportError::configuration(
                "rate.units_per_second",
                format!("must be positive, got {}", config.units_per_second),
            ));
        }
        if config.window.is_zero() {
            return Err(ExportError::configuration("rate.window", "must be non-zero"));
        }
        let pressure_in_range = config.min_pressure > 0.0 && config.min_pressure <= 1.0;
        if !pressure_in_range {
            return Err(ExportError::configuration(
                "rate.min_pressure",
                format!("must be in (0, 1], got {}", config.min_pressure),
            ));
        }
        let window_start = clock.now();
        Ok(Self {
            config,
            clock,
            window_start,
            consumed: 0.0,
            units_per_item: INITIAL_UNITS_PER_ITEM,
            pressure: 1.0,
            throttle_waits: 0,
            throttled_for: Duration::ZERO,
        })
    }

    /// The policy in force.
    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    /// Current fraction of the window budget in use, in `[min_pressure, 1]`.
    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    /// Smoothed capacity units per item.
    pub fn units_per_item(&self) -> f64 {
        self.units_per_item
    }

    /// Capacity charged to the current window, debt included.
    pub fn consumed_in_window(&self) -> f64 {
        self.consumed
    }

    /// How often the controller blocked, and for how long in total.
    pub fn throttling(&self) -> (u64, Duration) {
        (self.throttle_waits, self.throttled_for)
    }

    fn budget(&self) -> f64 {
        self.config.window_budget() * self.pressure
    }

    /// Closes every window that has fully elapsed, repaying one window's
    /// budget per closed window. Capacity beyond that stays as debt.
    fn roll_window(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.window_start);
        if elapsed < self.config.window {
            return;
        }
        let windows = (elapsed.as_nanos() / self.config.window.as_nanos()) as u32;
        self.consumed = (self.consumed - self.budget() * f64::from(windows)).max(0.0);
        self.window_start += self.config.window * windows;
    }

    /// Returns the ceiling for the next page, blocking until the budget allows it.
    pub fn next_limit(&mut self) -> RequestLimit {
        loop {
            let now = self.clock.now();
            self.roll_window(now);

            let remaining = self.budget() - self.consumed;
            if remaining > 0.0 {
                return self.limit_for(remaining);
            }

            let wait = (self.window_start + self.config.window).saturating_sub(now);
            info!(
                wait_ms = wait.as_millis() as u64,
                consumed = self.consumed,
                budget = self.budget(),
                "read budget exhausted, waiting for next window"
            );
            self.throttle_waits += 1;
            self.throttled_for += wait;
            self.clock.sleep(wait);
        }
    }

    fn limit_for(&self, remaining: f64) -> RequestLimit {
        let max_items = self.config.max_page_items.max(1);
        let max_bytes = self.config.max_page_bytes.max(1);
        let items = ((remaining / self.units_per_item).floor() as u64).clamp(1, max_items);
        let bytes = ((remaining * self.config.bytes_per_unit as f64) as u64).clamp(1, max_bytes);
        RequestLimit::new(items, bytes)
    }

    /// Feeds back what a page cost.
    ///
    /// Retries signal that the store is near its limit and halve the budget
    /// share in use; a clean page restores part of it.
    pub fn record(&mut self, consumed_units: f64, items: usize, retries: u32) {
        let consumed_units = if consumed_units.is_finite() {
            consumed_units.max(0.0)
        } else {
            0.0
        };
        self.consumed += consumed_units;

        if items > 0 && consumed_units > 0.0 {
            let sample = consumed_units / items as f64;
            self.units_per_item =
                COST_SMOOTHING * sample + (1.0 - COST_SMOOTHING) * self.units_per_item;
        }

        if retries > 0 {
            self.pressure = (self.pressure * 0.5).max(self.config.min_pressure);
        } else {
            self.pressure = (self.pressure + PRESSURE_RECOVERY_STEP).min(1.0);
        }
        debug!(
            consumed_units,
            items,
            retries,
            pressure = self.pressure,
            units_per_item = self.units_per_item,
            "recorded page cost"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn controller(units_per_second: f64) -> (RateController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = RateConfig::new(units_per_second).with_max_page_items(100);
        let controller = RateController::new(config, clock.clone()).unwrap();
        (controller, clock)
    }

    #[test]
    fn rejects_invalid_policy() {
        let clock = Arc::new(ManualClock::new());
        assert!(RateController::new(RateConfig::new(0.0), clock.clone()).is_err());
        assert!(RateController::new(RateConfig::new(f64::NAN), clock.clone()).is_err());
        let zero_window = RateConfig::new(10.0).with_window(Duration::ZERO);
        assert!(RateController::new(zero_window, clock).is_err());
    }

    #[test]
    fn limit_follows_remaining_budget() {
        let (mut rate, clock) = controller(10.0);
        // 10 units at 0.5 units per item.
        assert_eq!(rate.next_limit(), RequestLimit::new(20, 40 * 1024));

        rate.record(6.0, 12, 0);
        // 4 units left, cost moved to 0.5 * 0.5 + 0.5 * 0.5 = 0.5.
        assert_eq!(rate.next_limit().max_items, 8);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn limit_is_capped_by_page_ceilings() {
        let (mut rate, _clock) = controller(10_000.0);
        let limit = rate.next_limit();
        assert_eq!(limit.max_items, 100);
        assert_eq!(limit.max_bytes, 1024 * 1024);
    }

    #[test]
    fn blocks_until_next_window_when_budget_is_spent() {
        let (mut rate, clock) = controller(10.0);
        rate.next_limit();
        clock.advance(Duration::from_millis(300));
        rate.record(10.0, 20, 0);

        let limit = rate.next_limit();
        assert!(limit.max_items >= 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(700)]);
        assert_eq!(rate.throttling(), (1, Duration::from_millis(700)));
        assert_eq!(rate.consumed_in_window(), 0.0);
    }

    #[test]
    fn overshoot_is_carried_as_debt() {
        let (mut rate, clock) = controller(10.0);
        rate.next_limit();
        rate.record(25.0, 50, 0);

        rate.next_limit();
        // 15 units of debt survive the close at 1s, 5 survive the one at 2s.
        assert_eq!(clock.total_slept(), Duration::from_secs(2));
        assert_eq!(rate.consumed_in_window(), 5.0);
    }

    #[test]
    fn retries_lower_pressure_and_clean_pages_restore_it() {
        let (mut rate, _clock) = controller(10.0);
        rate.record(0.0, 0, 2);
        assert_eq!(rate.pressure(), 0.5);
        rate.record(0.0, 0, 1);
        assert_eq!(rate.pressure(), 0.25);
        for _ in 0..10 {
            rate.record(0.0, 0, 1);
        }
        assert_eq!(rate.pressure(), 0.1);

        rate.record(0.0, 0, 0);
        assert!((rate.pressure() - 0.2).abs() < 1e-9);
        for _ in 0..20 {
            rate.record(0.0, 0, 0);
        }
        assert_eq!(rate.pressure(), 1.0);
    }

    #[test]
    fn expensive_items_shrink_the_item_limit() {
        let (mut rate, clock) = controller(10.0);
        rate.record(4.0, 2, 0);
        // cost per item: 0.5 * 2.0 + 0.5 * 0.5 = 1.25, 6 units left.
        assert!((rate.units_per_item() - 1.25).abs() < 1e-9);
        assert_eq!(rate.next_limit().max_items, 4);
        assert!(clock.sleeps().is_empty());
    }
}
