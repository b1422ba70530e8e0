use serde_json::Value;

use crate::session::StreamMode;
use crate::storage::ConversationTurn;

pub struct RequestBuilder {
    body: serde_json::Map<String, Value>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            body: serde_json::Map::new(),
        }
    }

    pub fn add_required<T: Into<Value>>(mut self, key: &str, value: T) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.body)
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Chat payload: the full conversation history. Retries resend all of it.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    messages: Value,
}

impl ChatRequest {
    pub fn from_turns(turns: &[ConversationTurn]) -> Self {
        let messages = turns
            .iter()
            .filter(|turn| !turn.content.is_empty())
            .map(|turn| {
                RequestBuilder::new()
                    .add_required("role", turn.role.as_str())
                    .add_required("content", turn.content.as_str())
                    .build()
            })
            .collect();

        Self {
            messages: Value::Array(messages),
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.as_array().map(|m| m.len()).unwrap_or(0)
    }

    /// Body for the given mode; only the `stream` flag differs.
    pub fn body(&self, mode: StreamMode) -> Value {
        RequestBuilder::new()
            .add_required("messages", self.messages.clone())
            .add_required("stream", mode.is_streaming())
            .build()
    }
}
