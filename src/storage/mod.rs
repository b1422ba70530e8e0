pub mod conversation;

pub use conversation::{ConversationStore, ConversationTurn, Role};

use std::path::PathBuf;

/// Default state directory, following the XDG cache convention.
pub fn default_state_directory() -> PathBuf {
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("synapse-stream");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".cache").join("synapse-stream");
    }

    std::env::temp_dir().join("synapse-stream")
}
