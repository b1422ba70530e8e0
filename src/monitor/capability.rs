use serde::Serialize;
use sysinfo::System;

use crate::constants::{
    DEFAULT_CONNECTION_TYPE, DEFAULT_CPU_CORES, DEFAULT_MEMORY_GB, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS,
    PROGRESS_OFFSETS_DEFAULT_SECS, PROGRESS_OFFSETS_LOW_SECS,
};
use crate::monitor::timeout::AdaptiveThresholds;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityLevel {
    Low,
    Medium,
    High,
}

impl CapabilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityLevel::Low => "low",
            CapabilityLevel::Medium => "medium",
            CapabilityLevel::High => "high",
        }
    }

    pub fn classify(cpu_cores: u32, memory_gb: f64) -> Self {
        if cpu_cores <= 2 || memory_gb <= 2.0 {
            CapabilityLevel::Low
        } else if cpu_cores >= 8 && memory_gb >= 8.0 {
            CapabilityLevel::High
        } else {
            CapabilityLevel::Medium
        }
    }

    /// Starter threshold bundle for this level.
    pub fn starter_thresholds(&self) -> AdaptiveThresholds {
        let (timeout_ms, slow_response_ms, very_slow_response_ms, min_words_per_second, max_chunk_latency_ms) =
            match self {
                CapabilityLevel::Low => (180_000, 15_000.0, 45_000.0, 1.0, 5_000.0),
                CapabilityLevel::Medium => (90_000, 8_000.0, 25_000.0, 3.0, 3_000.0),
                CapabilityLevel::High => (45_000, 5_000.0, 15_000.0, 5.0, 2_000.0),
            };

        AdaptiveThresholds {
            timeout_ms,
            slow_response_ms,
            very_slow_response_ms,
            min_words_per_second,
            max_chunk_latency_ms,
            min_timeout_ms: MIN_TIMEOUT_MS,
            max_timeout_ms: MAX_TIMEOUT_MS,
        }
    }

    /// Profile for a nominal host of this level, without probing.
    pub fn starter_profile(&self) -> CapabilityProfile {
        let (cpu_cores, memory_gb) = match self {
            CapabilityLevel::Low => (2, 2.0),
            CapabilityLevel::Medium => (DEFAULT_CPU_CORES, DEFAULT_MEMORY_GB),
            CapabilityLevel::High => (8, 8.0),
        };
        CapabilityProfile {
            level: *self,
            cpu_cores,
            memory_gb,
            connection_type: DEFAULT_CONNECTION_TYPE.to_string(),
            thresholds: self.starter_thresholds(),
        }
    }

    /// Offsets (seconds after session start) at which waiting messages fire.
    pub fn progress_offsets_secs(&self) -> &'static [u64] {
        match self {
            CapabilityLevel::Low => PROGRESS_OFFSETS_LOW_SECS,
            CapabilityLevel::Medium | CapabilityLevel::High => PROGRESS_OFFSETS_DEFAULT_SECS,
        }
    }
}

/// Raw host facts; `None` means the probe could not tell.
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub cpu_cores: Option<u32>,
    pub memory_gb: Option<f64>,
    pub connection_type: Option<String>,
}

impl HostInfo {
    /// Probes the local machine. Never fails; unknown facts stay `None`.
    pub fn detect(connection_type: Option<&str>) -> Self {
        let system = System::new_all();

        let cores = system.cpus().len() as u32;
        let total_memory = system.total_memory();

        Self {
            cpu_cores: (cores > 0).then_some(cores),
            memory_gb: (total_memory > 0).then(|| total_memory as f64 / BYTES_PER_GB),
            connection_type: connection_type
                .filter(|t| !t.trim().is_empty())
                .map(|t| t.trim().to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityProfile {
    pub level: CapabilityLevel,
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub connection_type: String,
    pub thresholds: AdaptiveThresholds,
}

impl CapabilityProfile {
    /// Classifies the host and picks its starter thresholds.
    pub fn estimate(host: &HostInfo) -> Self {
        let cpu_cores = host.cpu_cores.filter(|c| *c > 0).unwrap_or(DEFAULT_CPU_CORES);
        let memory_gb = host
            .memory_gb
            .filter(|m| m.is_finite() && *m > 0.0)
            .unwrap_or(DEFAULT_MEMORY_GB);
        let connection_type = host
            .connection_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONNECTION_TYPE.to_string());

        let level = CapabilityLevel::classify(cpu_cores, memory_gb);

        log::info!(
            "host capability: {} ({} cores, {:.1}GB, network {})",
            level.as_str(),
            cpu_cores,
            memory_gb,
            connection_type
        );

        Self {
            level,
            cpu_cores,
            memory_gb,
            connection_type,
            thresholds: level.starter_thresholds(),
        }
    }

    /// Profile with a forced level, keeping the probed host facts.
    pub fn with_level(mut self, level: CapabilityLevel) -> Self {
        self.level = level;
        self.thresholds = level.starter_thresholds();
        self
    }
}

impl Default for CapabilityProfile {
    fn default() -> Self {
        Self::estimate(&HostInfo::default())
    }
}
