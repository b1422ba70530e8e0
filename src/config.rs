use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use clap::Parser;

use crate::monitor::CapabilityLevel;
use crate::constants::{
    DEFAULT_BACKEND_URL, DEFAULT_CHAT_PATH, DEFAULT_CONNECTION_TYPE, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_OPTIMIZE_INTERVAL, DEFAULT_RETRY_DELAY,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "synapse-stream")]
#[command(about = "streaming chat client for the synapse backend")]
pub struct Config {
    #[arg(long, default_value = DEFAULT_BACKEND_URL, help = "synapse backend url")]
    pub backend_url: String,

    #[arg(long, default_value = DEFAULT_CHAT_PATH, help = "chat endpoint path")]
    pub chat_path: String,

    #[arg(
        long,
        default_value = "info",
        help = "log level (off, error, warn, info, debug, trace)"
    )]
    pub log_level: String,

    #[arg(
        long,
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        help = "streaming attempts per turn before falling back"
    )]
    pub max_attempts: u32,

    #[arg(
        long,
        default_value = DEFAULT_RETRY_DELAY,
        value_parser = humantime::parse_duration,
        help = "fixed delay between attempts (e.g. 2s, 500ms)"
    )]
    pub retry_delay: Duration,

    #[arg(
        long,
        default_value = DEFAULT_OPTIMIZE_INTERVAL,
        value_parser = humantime::parse_duration,
        help = "how often thresholds are re-tuned from observed latency"
    )]
    pub optimize_interval: Duration,

    #[arg(
        long,
        default_value = "262144",
        help = "initial buffer size in bytes for stream line assembly (capacity hint)"
    )]
    pub max_buffer_size: usize,

    #[arg(long, help = "salvage json from malformed stream events")]
    pub enable_chunk_recovery: bool,

    #[arg(
        long,
        default_value = DEFAULT_CONNECTION_TYPE,
        help = "network effective type reported to the capability estimator"
    )]
    pub connection_type: String,

    #[arg(long, value_enum, help = "force a capability level instead of probing the host")]
    pub capability: Option<CapabilityLevel>,

    #[arg(long, help = "directory for the persisted conversation")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, help = "start in standard (non-incremental) mode")]
    pub standard: bool,

    #[arg(long, help = "send a single message and exit")]
    pub prompt: Option<String>,
}

impl Config {
    pub fn chat_url(&self) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), self.chat_path)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_buffer_size: usize,
    pub enable_chunk_recovery: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 64 * 1024,
            enable_chunk_recovery: true,
        }
    }
}

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

pub fn init_runtime_config(config: RuntimeConfig) {
    RUNTIME_CONFIG.set(config).ok();
}

pub fn get_runtime_config() -> &'static RuntimeConfig {
    RUNTIME_CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<RuntimeConfig> = OnceLock::new();
        DEFAULT.get_or_init(RuntimeConfig::default)
    })
}

pub fn validate_config(config: &Config) -> Result<(), String> {
    if !config.backend_url.starts_with("http://") && !config.backend_url.starts_with("https://") {
        return Err(format!(
            "invalid backend URL (must start with http:// or https://): {}",
            config.backend_url
        ));
    }
    if let Err(e) = url::Url::parse(&config.backend_url) {
        return Err(format!("invalid backend URL format: {}", e));
    }
    if !config.chat_path.starts_with('/') {
        return Err(format!(
            "invalid chat path (must start with /): {}",
            config.chat_path
        ));
    }
    if config.max_attempts == 0 {
        return Err("max attempts must be at least 1".to_string());
    }
    Ok(())
}
