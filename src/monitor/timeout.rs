use serde::Serialize;

use crate::constants::{
    MAX_LATENCY_BOOST, OPTIMIZED_TIMEOUT_FACTOR, RECENT_RESPONSE_WINDOW,
    RELAX_MIN_WPS_FACTOR, RELAX_RESPONSE_BOUNDARY_FACTOR, TIMEOUT_RATE_BOOST,
    TIMEOUT_RATE_THRESHOLD,
};
use crate::monitor::metrics::{MetricKind, MetricsRecorder};

/// Live thresholds, seeded from the capability profile and tuned in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveThresholds {
    pub timeout_ms: u64,
    pub slow_response_ms: f64,
    pub very_slow_response_ms: f64,
    pub min_words_per_second: f64,
    pub max_chunk_latency_ms: f64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl AdaptiveThresholds {
    fn clamp_timeout(&self, value: f64) -> u64 {
        let lower = self.min_timeout_ms.min(self.max_timeout_ms) as f64;
        let upper = self.max_timeout_ms as f64;
        value.clamp(lower, upper).round() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSpeed {
    Normal,
    Slow,
    VerySlow,
}

pub fn classify_response(response_time_ms: f64, thresholds: &AdaptiveThresholds) -> ResponseSpeed {
    if response_time_ms > thresholds.very_slow_response_ms {
        ResponseSpeed::VerySlow
    } else if response_time_ms > thresholds.slow_response_ms {
        ResponseSpeed::Slow
    } else {
        ResponseSpeed::Normal
    }
}

/// Timeout for the next request in milliseconds. Pure: reads state only.
pub fn next_timeout(thresholds: &AdaptiveThresholds, recorder: &MetricsRecorder) -> u64 {
    let cap = thresholds.max_timeout_ms as f64;
    let mut timeout = thresholds.timeout_ms as f64;

    if let Some(recent) = recorder.recent_response_average(RECENT_RESPONSE_WINDOW)
        && thresholds.slow_response_ms > 0.0
        && recent > thresholds.slow_response_ms
    {
        let boost = (recent / thresholds.slow_response_ms).min(MAX_LATENCY_BOOST);
        timeout = (timeout * boost).min(cap);
    }

    if let Some(rate) = recorder.counters().timeout_rate()
        && rate > TIMEOUT_RATE_THRESHOLD
    {
        timeout = (timeout * TIMEOUT_RATE_BOOST).min(cap);
    }

    thresholds.clamp_timeout(timeout)
}

/// Periodic tuning pass. Returns true when any threshold changed.
pub fn optimize(thresholds: &mut AdaptiveThresholds, recorder: &MetricsRecorder) -> bool {
    let response_samples = recorder.samples(MetricKind::ResponseTime);
    if response_samples.is_empty() {
        return false;
    }

    let avg_response_time = recorder.averages().avg_response_time;
    let before = thresholds.clone();

    if avg_response_time > thresholds.slow_response_ms {
        thresholds.timeout_ms = thresholds.clamp_timeout(avg_response_time * OPTIMIZED_TIMEOUT_FACTOR);
    }

    // Slow and very-slow boundaries both widen by 1.2; the throughput floor
    // drops to 0.7 of itself. Nothing ever tightens here.
    if avg_response_time > thresholds.very_slow_response_ms {
        let cap = thresholds.max_timeout_ms as f64;
        thresholds.slow_response_ms =
            (thresholds.slow_response_ms * RELAX_RESPONSE_BOUNDARY_FACTOR).min(cap);
        thresholds.very_slow_response_ms = (thresholds.very_slow_response_ms
            * RELAX_RESPONSE_BOUNDARY_FACTOR)
            .min(cap)
            .max(thresholds.slow_response_ms);
        thresholds.min_words_per_second *= RELAX_MIN_WPS_FACTOR;
    }

    let changed = *thresholds != before;
    if changed {
        log::info!(
            "thresholds tuned (avg response {:.0}ms): timeout {}ms -> {}ms, slow {:.0}ms, very slow {:.0}ms, min wps {:.2}",
            avg_response_time,
            before.timeout_ms,
            thresholds.timeout_ms,
            thresholds.slow_response_ms,
            thresholds.very_slow_response_ms,
            thresholds.min_words_per_second
        );
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> AdaptiveThresholds {
        AdaptiveThresholds {
            timeout_ms: 60_000,
            slow_response_ms: 5_000.0,
            very_slow_response_ms: 15_000.0,
            min_words_per_second: 5.0,
            max_chunk_latency_ms: 2_000.0,
            min_timeout_ms: 30_000,
            max_timeout_ms: 300_000,
        }
    }

    #[test]
    fn empty_history_returns_base_timeout() {
        assert_eq!(next_timeout(&thresholds(), &MetricsRecorder::default()), 60_000);
    }

    #[test]
    fn slow_recent_responses_scale_the_timeout() {
        let mut recorder = MetricsRecorder::default();
        recorder.record(MetricKind::ResponseTime, 10_000.0);
        // mean 10s / slow 5s = 2x
        assert_eq!(next_timeout(&thresholds(), &recorder), 120_000);
    }

    #[test]
    fn latency_boost_is_capped_at_three() {
        let mut recorder = MetricsRecorder::default();
        recorder.record(MetricKind::ResponseTime, 50_000.0);
        assert_eq!(next_timeout(&thresholds(), &recorder), 180_000);
    }

    #[test]
    fn only_the_last_five_responses_drive_the_boost() {
        let mut recorder = MetricsRecorder::default();
        for _ in 0..20 {
            recorder.record(MetricKind::ResponseTime, 100_000.0);
        }
        for _ in 0..5 {
            recorder.record(MetricKind::ResponseTime, 1_000.0);
        }
        assert_eq!(next_timeout(&thresholds(), &recorder), 60_000);
    }

    #[test]
    fn high_timeout_rate_applies_one_and_a_half() {
        let mut recorder = MetricsRecorder::default();
        for _ in 0..10 {
            recorder.record_request();
        }
        for _ in 0..3 {
            recorder.record_timeout();
        }
        assert_eq!(next_timeout(&thresholds(), &recorder), 90_000);
    }

    #[test]
    fn timeout_rate_at_threshold_does_not_boost() {
        let mut recorder = MetricsRecorder::default();
        for _ in 0..10 {
            recorder.record_request();
        }
        for _ in 0..2 {
            recorder.record_timeout();
        }
        assert_eq!(next_timeout(&thresholds(), &recorder), 60_000);
    }

    #[test]
    fn both_boosts_stack_and_respect_the_cap() {
        let mut t = thresholds();
        t.max_timeout_ms = 200_000;
        let mut recorder = MetricsRecorder::default();
        recorder.record(MetricKind::ResponseTime, 50_000.0);
        recorder.record_request();
        recorder.record_timeout();
        assert_eq!(next_timeout(&t, &recorder), 200_000);
    }

    #[test]
    fn result_is_always_within_bounds() {
        let mut t = thresholds();
        t.timeout_ms = 1_000;
        assert_eq!(next_timeout(&t, &MetricsRecorder::default()), 30_000);

        let histories: [&[f64]; 4] = [&[], &[0.0], &[4_000.0, 7_000.0], &[1e9, 1e9]];
        for history in histories {
            let mut recorder = MetricsRecorder::default();
            for value in history {
                recorder.record(MetricKind::ResponseTime, *value);
            }
            for timeouts in 0..3 {
                recorder.record_request();
                if timeouts > 0 {
                    recorder.record_timeout();
                }
                let value = next_timeout(&thresholds(), &recorder);
                assert!((30_000..=300_000).contains(&value), "{}", value);
            }
        }
    }

    #[test]
    fn classifies_slow_but_not_very_slow() {
        let t = thresholds();
        assert_eq!(classify_response(6_000.0, &t), ResponseSpeed::Slow);
        assert_eq!(classify_response(16_000.0, &t), ResponseSpeed::VerySlow);
        assert_eq!(classify_response(5_000.0, &t), ResponseSpeed::Normal);
    }

    #[test]
    fn optimizer_learns_larger_base_timeout() {
        let mut t = thresholds();
        let mut recorder = MetricsRecorder::default();
        recorder.record(MetricKind::ResponseTime, 20_000.0);
        recorder.record(MetricKind::ResponseTime, 30_000.0);

        assert!(optimize(&mut t, &recorder));
        // avg 25s * 2.5
        assert_eq!(t.timeout_ms, 62_500);
        // avg also above very slow (15s): boundaries relaxed
        assert_eq!(t.slow_response_ms, 6_000.0);
        assert_eq!(t.very_slow_response_ms, 18_000.0);
        assert!((t.min_words_per_second - 3.5).abs() < 1e-9);
    }

    #[test]
    fn optimizer_clamps_learned_timeout() {
        let mut t = thresholds();
        let mut recorder = MetricsRecorder::default();
        recorder.record(MetricKind::ResponseTime, 6_000.0);
        assert!(optimize(&mut t, &recorder));
        assert_eq!(t.timeout_ms, 30_000);
        assert_eq!(t.slow_response_ms, 5_000.0);
    }

    #[test]
    fn optimizer_leaves_fast_hosts_alone() {
        let mut t = thresholds();
        let mut recorder = MetricsRecorder::default();
        assert!(!optimize(&mut t, &recorder));
        recorder.record(MetricKind::ResponseTime, 1_000.0);
        assert!(!optimize(&mut t, &recorder));
        assert_eq!(t, thresholds());
    }
}
