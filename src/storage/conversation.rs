use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::SessionError;
use crate::session::StreamingStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_stats: Option<StreamingStats>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            streaming_stats: None,
        }
    }

    pub fn assistant(content: String, stats: StreamingStats) -> Self {
        Self {
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            streaming_stats: Some(stats),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConversationBlob {
    turns: Vec<ConversationTurn>,
}

/// The conversation, persisted as a single JSON blob.
pub struct ConversationStore {
    path: PathBuf,
    turns: RwLock<Vec<ConversationTurn>>,
}

impl ConversationStore {
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self, SessionError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SessionError::unknown(&format!("failed to create state directory: {}", e))
            })?;
        }

        let turns = if path.exists() {
            match std::fs::read(&path) {
                Ok(bytes) if !bytes.is_empty() => {
                    match serde_json::from_slice::<ConversationBlob>(&bytes) {
                        Ok(blob) => blob.turns,
                        Err(e) => {
                            log::warn!(
                                "ignoring unreadable conversation {}: {}",
                                path.display(),
                                e
                            );
                            Vec::new()
                        }
                    }
                }
                Ok(_) => Vec::new(),
                Err(e) => {
                    return Err(SessionError::unknown(&format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            turns: RwLock::new(turns),
        })
    }

    pub async fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }

    pub async fn push(&self, turn: ConversationTurn) -> Result<(), SessionError> {
        let mut guard = self.turns.write().await;
        guard.push(turn);
        self.persist_locked(&guard).await
    }

    /// Drops a trailing user turn that never got an answer.
    pub async fn pop_unanswered(&self) -> Result<Option<ConversationTurn>, SessionError> {
        let mut guard = self.turns.write().await;
        if guard.last().map(|t| t.role) != Some(Role::User) {
            return Ok(None);
        }
        let removed = guard.pop();
        self.persist_locked(&guard).await?;
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        let mut guard = self.turns.write().await;
        guard.clear();
        self.persist_locked(&guard).await
    }

    async fn persist_locked(&self, turns: &[ConversationTurn]) -> Result<(), SessionError> {
        let tmp_path = self.path.with_extension("tmp");
        let blob = ConversationBlob {
            turns: turns.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&blob).map_err(|e| {
            SessionError::unknown(&format!("failed to serialize conversation: {}", e))
        })?;
        fs::write(&tmp_path, data).await.map_err(|e| {
            SessionError::unknown(&format!("failed to write {}: {}", tmp_path.display(), e))
        })?;
        fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            SessionError::unknown(&format!(
                "failed to atomic write {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }
}
