pub mod capability;
pub mod metrics;
pub mod timeout;

pub use capability::{CapabilityLevel, CapabilityProfile, HostInfo};
pub use metrics::{MetricAverages, MetricCounters, MetricKind, MetricsRecorder};
pub use timeout::{AdaptiveThresholds, ResponseSpeed, classify_response, next_timeout, optimize};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Per-client performance context: capability profile, live thresholds and
/// the metrics window. Created once and shared by the chat client.
#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    pub profile: CapabilityProfile,
    pub thresholds: AdaptiveThresholds,
    pub recorder: MetricsRecorder,
}

impl PerformanceMonitor {
    pub fn new(profile: CapabilityProfile) -> Self {
        let thresholds = profile.thresholds.clone();
        Self {
            profile,
            thresholds,
            recorder: MetricsRecorder::default(),
        }
    }

    pub fn with_thresholds(profile: CapabilityProfile, thresholds: AdaptiveThresholds) -> Self {
        Self {
            profile,
            thresholds,
            recorder: MetricsRecorder::default(),
        }
    }

    pub fn next_timeout(&self) -> Duration {
        Duration::from_millis(next_timeout(&self.thresholds, &self.recorder))
    }

    pub fn optimize(&mut self) -> bool {
        optimize(&mut self.thresholds, &self.recorder)
    }

    pub fn classify_response(&self, response_time_ms: f64) -> ResponseSpeed {
        classify_response(response_time_ms, &self.thresholds)
    }
}

#[derive(Clone)]
pub struct SharedMonitor {
    inner: Arc<Mutex<PerformanceMonitor>>,
}

impl SharedMonitor {
    pub fn new(monitor: PerformanceMonitor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(monitor)),
        }
    }

    /// Locks the context. A poisoned lock still holds valid numbers, so it is
    /// recovered instead of propagated.
    pub fn lock(&self) -> MutexGuard<'_, PerformanceMonitor> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> PerformanceMonitor {
        self.lock().clone()
    }
}

/// Runs the tuning pass every `interval` until `shutdown` is cancelled.
pub fn spawn_optimizer(
    monitor: SharedMonitor,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    monitor.lock().optimize();
                }
            }
        }
        log::debug!("threshold optimizer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn optimizer_task_tunes_on_each_tick() {
        let mut monitor = PerformanceMonitor::new(CapabilityLevel::High.starter_profile());
        monitor.recorder.record(MetricKind::ResponseTime, 40_000.0);
        let shared = SharedMonitor::new(monitor);
        let shutdown = CancellationToken::new();

        let handle = spawn_optimizer(shared.clone(), Duration::from_secs(60), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(shared.snapshot().thresholds.timeout_ms, 100_000);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
