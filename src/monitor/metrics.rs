use std::collections::VecDeque;

use serde::Serialize;

use crate::constants::METRICS_SAMPLE_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Full request duration in milliseconds
    ResponseTime,
    /// Estimated words per second of a completed response
    WordsPerSecond,
    /// Gap between two consecutive chunks in milliseconds
    ChunkLatency,
}

/// Fixed-capacity FIFO of samples; the oldest sample is evicted first.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Mean of the newest `n` samples, or of all of them if fewer exist.
    pub fn recent_mean(&self, n: usize) -> Option<f64> {
        if self.samples.is_empty() || n == 0 {
            return None;
        }
        let take = n.min(self.samples.len());
        let sum: f64 = self.samples.iter().rev().take(take).sum();
        Some(sum / take as f64)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricAverages {
    pub avg_response_time: f64,
    pub avg_words_per_second: f64,
    pub avg_chunk_latency: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricCounters {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub timeout_count: u64,
    pub connection_failure_count: u64,
}

impl MetricCounters {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn timeout_rate(&self) -> Option<f64> {
        (self.total_requests > 0).then(|| self.timeout_count as f64 / self.total_requests as f64)
    }
}

/// Sliding-window timings plus lifetime request counters.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    response_times: SampleWindow,
    words_per_second: SampleWindow,
    chunk_latencies: SampleWindow,
    counters: MetricCounters,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::with_capacity(METRICS_SAMPLE_CAPACITY)
    }
}

impl MetricsRecorder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            response_times: SampleWindow::new(capacity),
            words_per_second: SampleWindow::new(capacity),
            chunk_latencies: SampleWindow::new(capacity),
            counters: MetricCounters::default(),
        }
    }

    pub fn record(&mut self, kind: MetricKind, value: f64) {
        if !value.is_finite() || value < 0.0 {
            log::debug!("ignoring invalid {:?} sample: {}", kind, value);
            return;
        }
        self.window_mut(kind).push(value);
    }

    pub fn record_request(&mut self) {
        self.counters.total_requests += 1;
    }

    pub fn record_success(&mut self) {
        self.counters.successful_requests += 1;
    }

    pub fn record_timeout(&mut self) {
        self.counters.timeout_count += 1;
    }

    pub fn record_connection_failure(&mut self) {
        self.counters.connection_failure_count += 1;
    }

    pub fn averages(&self) -> MetricAverages {
        MetricAverages {
            avg_response_time: self.response_times.mean(),
            avg_words_per_second: self.words_per_second.mean(),
            avg_chunk_latency: self.chunk_latencies.mean(),
            success_rate: self.counters.success_rate(),
        }
    }

    pub fn counters(&self) -> MetricCounters {
        self.counters
    }

    pub fn samples(&self, kind: MetricKind) -> &SampleWindow {
        match kind {
            MetricKind::ResponseTime => &self.response_times,
            MetricKind::WordsPerSecond => &self.words_per_second,
            MetricKind::ChunkLatency => &self.chunk_latencies,
        }
    }

    pub fn recent_response_average(&self, n: usize) -> Option<f64> {
        self.response_times.recent_mean(n)
    }

    /// Operator reset: drops every sample and counter.
    pub fn reset(&mut self) {
        self.response_times.clear();
        self.words_per_second.clear();
        self.chunk_latencies.clear();
        self.counters = MetricCounters::default();
        log::info!("performance metrics reset");
    }

    fn window_mut(&mut self, kind: MetricKind) -> &mut SampleWindow {
        match kind {
            MetricKind::ResponseTime => &mut self.response_times,
            MetricKind::WordsPerSecond => &mut self.words_per_second,
            MetricKind::ChunkLatency => &mut self.chunk_latencies,
        }
    }
}
