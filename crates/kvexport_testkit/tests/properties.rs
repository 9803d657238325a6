//! Property tests over splitting, sampling, filters, paging and retries.

use kvexport_core::{
    balance_segments, keys, FibonacciRetryer, FullSegmentSplitGenerator, ManualClock,
    QueryFilter, RemoteError, RetryConfig, SamplingPolicy, SplitGenerator,
};
use kvexport_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Backoff of the default retry policy: 100ms times 1, 1, 2, 3, 5, ...
fn fibonacci_delays(retries: u32) -> Vec<Duration> {
    let (mut a, mut b) = (1u32, 1u32);
    let mut delays = Vec::new();
    for _ in 0..retries {
        delays.push((Duration::from_millis(100) * a).min(Duration::from_secs(10)));
        (a, b) = (b, a + b);
    }
    delays
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn balanced_segments_cover_every_id_once((total, workers) in segments_and_workers_strategy()) {
        let groups = balance_segments(total, workers);
        prop_assert_eq!(groups.len() as u32, workers.clamp(1, total));

        let mut seen = BTreeSet::new();
        for group in &groups {
            for id in group {
                prop_assert!(seen.insert(*id), "segment {} assigned twice", id);
            }
        }
        prop_assert_eq!(seen.len() as u32, total);

        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
        prop_assert!(max - min <= 1);
    }

    #[test]
    fn full_segment_splits_share_the_filter((total, workers) in segments_and_workers_strategy()) {
        let splits = FullSegmentSplitGenerator::new(QueryFilter::new())
            .generate_splits(total, workers)
            .unwrap();
        prop_assert!(splits.iter().all(|split| !split.is_empty()));
        prop_assert!(splits.iter().all(|split| split.total_segments() == total));
        prop_assert_eq!(splits.iter().map(|split| split.len()).sum::<usize>(), total as usize);
    }

    #[test]
    fn sampling_never_exceeds_the_key_space(
        key_space in 1u32..20_000,
        fraction in sample_fraction_strategy(),
    ) {
        let policy = SamplingPolicy::new(key_space, fraction).unwrap();
        let segments = policy.effective_segments();
        prop_assert!((1..=key_space).contains(&segments));
        let full = SamplingPolicy::new(key_space, 1.0).unwrap();
        prop_assert_eq!(full.effective_segments(), key_space);
    }

    #[test]
    fn sampling_grows_with_the_fraction(
        key_space in 1u32..20_000,
        a in sample_fraction_strategy(),
        b in sample_fraction_strategy(),
    ) {
        let (low, high) = (a.min(b), a.max(b));
        let low = SamplingPolicy::new(key_space, low).unwrap().effective_segments();
        let high = SamplingPolicy::new(key_space, high).unwrap().effective_segments();
        prop_assert!(low <= high);
    }

    #[test]
    fn adding_a_condition_leaves_the_template_alone(
        template_condition in key_filter_strategy(),
        extra in key_filter_strategy(),
    ) {
        let mut template = QueryFilter::new();
        template.add_key_condition(&template_condition).unwrap();
        let before = template.clone();

        let mut derived = template.clone();
        derived.add_key_condition(&extra).unwrap();

        prop_assert_eq!(&template, &before);
        prop_assert!(derived.key_conditions().contains_key(extra.column_name()));
    }

    #[test]
    fn transient_retries_are_counted_and_backed_off(failures in 0u32..9) {
        let clock = Arc::new(ManualClock::new());
        let retryer = FibonacciRetryer::new(RetryConfig::new(10), clock.clone());

        let mut left = failures;
        let result = retryer
            .execute(|| {
                if left > 0 {
                    left -= 1;
                    Err(RemoteError::Throttled("slow down".into()))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        prop_assert_eq!(result.retries, failures);
        prop_assert_eq!(clock.sleeps(), fibonacci_delays(failures));
    }
}

proptest! {
    #![proptest_config(PropTestConfig { cases: 8, ..PropTestConfig::quick() }.to_proptest_config())]

    #[test]
    fn each_page_resumes_from_the_previous_cursor(
        per_bucket in 1u32..40,
        failures in failure_counts_strategy(),
    ) {
        let table = TestTable::with_capacity(1, per_bucket, 1.0);
        let conf = table
            .sampled_conf(0, i64::from(per_bucket))
            .with(keys::READ_CAPACITY_UNITS, 1);
        let plan = table.plan(&conf, 1);
        table.store.clear_calls();
        let transient: u32 = failures.iter().sum();
        table
            .store
            .push_failures(RemoteError::Throttled("slow down".into()), transient as usize);

        // Exactly enough attempts for the first page to get through.
        let mut reader = plan
            .reader(table.client(transient + 1), &conf, 0, table.clock())
            .unwrap();
        let mut pages = Vec::new();
        while let Some(page) = reader.next_page().unwrap() {
            pages.push(page);
        }
        prop_assert_eq!(
            pages.iter().map(|page| page.items.len()).sum::<usize>(),
            per_bucket as usize
        );
        prop_assert_eq!(reader.stats().retries, u64::from(transient));

        // Failed attempts are logged too; only the successful ones carry pages.
        let calls = table.store.calls();
        let reads = &calls[transient as usize..];
        prop_assert_eq!(reads.len(), pages.len());
        prop_assert!(reads[0].cursor.is_none());
        for (read, previous) in reads[1..].iter().zip(&pages) {
            prop_assert_eq!(&read.cursor, &previous.next_cursor);
        }
        prop_assert!(pages.last().unwrap().next_cursor.is_none());
    }
}
