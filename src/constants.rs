/// Synapse backend endpoints
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
pub const DEFAULT_CHAT_PATH: &str = "/api/chat";

/// Request headers
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const ACCEPT_EVENT_STREAM: &str = "text/event-stream";

/// Metrics window
pub const METRICS_SAMPLE_CAPACITY: usize = 100;
pub const RECENT_RESPONSE_WINDOW: usize = 5;

/// Words are estimated from characters at this ratio
pub const CHARS_PER_WORD: f64 = 5.0;

/// Adaptive timeout multipliers
pub const MAX_LATENCY_BOOST: f64 = 3.0;
pub const TIMEOUT_RATE_THRESHOLD: f64 = 0.2;
pub const TIMEOUT_RATE_BOOST: f64 = 1.5;
pub const OPTIMIZED_TIMEOUT_FACTOR: f64 = 2.5;
pub const RELAX_RESPONSE_BOUNDARY_FACTOR: f64 = 1.2;
pub const RELAX_MIN_WPS_FACTOR: f64 = 0.7;

/// Timeout bounds shared by every capability level
pub const MIN_TIMEOUT_MS: u64 = 30_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Retry policy defaults
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const TIMEOUT_RETRY_LIMIT: u32 = 2;
pub const DEFAULT_RETRY_DELAY: &str = "2s";
pub const DEFAULT_OPTIMIZE_INTERVAL: &str = "60s";

/// Capability probe fallbacks
pub const DEFAULT_CPU_CORES: u32 = 4;
pub const DEFAULT_MEMORY_GB: f64 = 4.0;
pub const DEFAULT_CONNECTION_TYPE: &str = "unknown";

/// Progress message offsets (seconds since session start)
pub const PROGRESS_OFFSETS_LOW_SECS: &[u64] = &[5, 15, 30, 60, 120];
pub const PROGRESS_OFFSETS_DEFAULT_SECS: &[u64] = &[3, 10, 20, 45];

/// Error messages
pub const ERROR_TIMEOUT: &str = "The response took too long and was stopped";
pub const ERROR_CANCELLED: &str = "Request cancelled";
pub const ERROR_BACKEND_UNAVAILABLE: &str = "Synapse backend not reachable";
pub const ERROR_SESSION_ACTIVE: &str = "A response is already being generated";
pub const ERROR_EMPTY_MESSAGE: &str = "Message must not be empty";

/// Stream framing
pub const SSE_DATA_PREFIX: &str = "data:";
pub const SSE_DONE_MESSAGE: &str = "[DONE]";
pub const SSE_LINE_BOUNDARY: char = '\n';

/// Logging prefixes
pub const LOG_PREFIX_SUCCESS: &str = "✅";
pub const LOG_PREFIX_ERROR: &str = "❌";
pub const LOG_PREFIX_WARNING: &str = "⚠️";

/// Persisted conversation file name inside the state directory
pub const CONVERSATION_FILE: &str = "conversation.json";
