//! Property-based tests for the monitoring core
//!
//! Percentile math, bounded sample history, health aggregation and the
//! alert cooldown rule, checked over generated inputs.

use approx::assert_relative_eq;
use chrono::{Duration, TimeZone, Utc};
use lightningtalk_telemetry::config::AlertThresholds;
use lightningtalk_telemetry::monitoring::{
    percentile, AlertEngine, AlertKind, HealthReport, MetricsStore, ThresholdInputs,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;

prop_compose! {
    fn arb_sorted_samples()(
        mut samples in prop::collection::vec(0.0f64..10_000.0, 1..500)
    ) -> Vec<f64> {
        samples.sort_by(f64::total_cmp);
        samples
    }
}

prop_compose! {
    fn arb_checks()(flags in prop::collection::vec(any::<bool>(), 1..8)) -> BTreeMap<String, bool> {
        flags
            .into_iter()
            .enumerate()
            .map(|(i, ok)| (format!("check_{i}"), ok))
            .collect()
    }
}

proptest! {
    #[test]
    fn median_is_nearest_rank(samples in arb_sorted_samples()) {
        let expected = samples[(0.5 * samples.len() as f64).ceil() as usize - 1];
        prop_assert_eq!(percentile(&samples, 50.0), expected);
    }

    #[test]
    fn percentile_stays_within_bounds(samples in arb_sorted_samples(), p in 0.0f64..=100.0) {
        let value = percentile(&samples, p);
        prop_assert!(value >= samples[0]);
        prop_assert!(value <= samples[samples.len() - 1]);
    }

    #[test]
    fn empty_percentile_is_zero(p in -50.0f64..150.0) {
        prop_assert_eq!(percentile(&[], p), 0.0);
    }

    #[test]
    fn response_history_keeps_most_recent(cap in 1usize..200, extra in 1usize..300) {
        let mut store = MetricsStore::with_caps(cap, cap, cap);
        let total = cap + extra;
        for i in 0..total {
            store.record_request("GET", "/api/events", 200, i as f64);
        }

        prop_assert_eq!(store.response_sample_len(), cap);
        let retained: Vec<f64> = store.response_times().copied().collect();
        let expected: Vec<f64> = (extra..total).map(|i| i as f64).collect();
        prop_assert_eq!(retained, expected);
        prop_assert_eq!(store.requests().total, total as u64);
    }

    #[test]
    fn healthy_is_conjunction_of_checks(checks in arb_checks()) {
        let expected = checks.values().all(|ok| *ok);
        let report = HealthReport::from_checks(checks, 0, Utc::now());
        prop_assert_eq!(report.healthy, expected);
    }
}

#[test]
fn flipping_one_check_makes_report_unhealthy() {
    let mut checks: BTreeMap<String, bool> = ["database", "errorRate", "responseTime", "memory"]
        .into_iter()
        .map(|name| (name.to_string(), true))
        .collect();
    assert!(HealthReport::from_checks(checks.clone(), 0, Utc::now()).healthy);

    checks.insert("memory".to_string(), false);
    assert!(!HealthReport::from_checks(checks, 0, Utc::now()).healthy);
}

#[test]
fn percentile_of_known_samples() {
    let samples: Vec<f64> = (1..=100).map(f64::from).collect();
    assert_relative_eq!(percentile(&samples, 95.0), 95.0);
    assert_relative_eq!(percentile(&samples, 99.0), 99.0);
    assert_relative_eq!(percentile(&samples, 100.0), 100.0);
}

#[test]
fn repeated_breach_alerts_once_per_cooldown() {
    let mut engine = AlertEngine::new(AlertThresholds::default(), Duration::minutes(5), 100);
    let slow = ThresholdInputs {
        p95_response_ms: 4_000.0,
        ..ThresholdInputs::default()
    };
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    let first = engine.evaluate(&slow, start);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].kind, AlertKind::SlowResponse);

    let second = engine.evaluate(&slow, start + Duration::minutes(2));
    assert!(second.is_empty());

    let third = engine.evaluate(&slow, start + Duration::minutes(6));
    assert_eq!(third.len(), 1);
    assert_eq!(engine.history().count(), 2);
}

#[test]
fn distinct_keys_are_throttled_independently() {
    let mut engine = AlertEngine::new(AlertThresholds::default(), Duration::minutes(5), 100);
    let now = Utc::now();

    assert!(engine
        .raise(AlertKind::DatabaseFailure, json!({ "error": "refused" }), now)
        .is_some());
    assert!(engine
        .raise(AlertKind::SlowDatabase, json!({ "latencyMs": 1500 }), now)
        .is_some());
    assert!(engine
        .raise(AlertKind::DatabaseFailure, json!({ "error": "refused" }), now)
        .is_none());
}
