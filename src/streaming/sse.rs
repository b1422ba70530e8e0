use serde_json::Value;

use crate::config::get_runtime_config;
use crate::constants::{SSE_DATA_PREFIX, SSE_DONE_MESSAGE, SSE_LINE_BOUNDARY};
use crate::logging::sanitize_log_message;
use crate::streaming::chunks::{StreamEvent, classify_event};
use crate::streaming::recovery::recover_event_json;

/// Decoded line, or the reason it was skipped
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    Event(StreamEvent),
    Malformed(String),
}

/// Incremental decoder for `data: <json>` lines. Bytes are buffered until a
/// full line is available so multi-byte characters may straddle chunks.
pub struct EventDecoder {
    buffer: Vec<u8>,
    enable_recovery: bool,
}

impl Default for EventDecoder {
    fn default() -> Self {
        let runtime_config = get_runtime_config();
        Self::new(
            runtime_config.max_buffer_size,
            runtime_config.enable_chunk_recovery,
        )
    }
}

impl EventDecoder {
    pub fn new(capacity_hint: usize, enable_recovery: bool) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity_hint.min(1024 * 1024)),
            enable_recovery,
        }
    }

    /// Feeds raw bytes and returns every complete line decoded so far.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodedLine> {
        self.buffer.extend_from_slice(bytes);

        let mut decoded = Vec::new();
        while let Some(boundary_pos) = self
            .buffer
            .iter()
            .position(|b| *b == SSE_LINE_BOUNDARY as u8)
        {
            let line: Vec<u8> = self.buffer.drain(..=boundary_pos).collect();
            if let Some(item) = self.decode_line(&line[..line.len() - 1]) {
                decoded.push(item);
            }
        }
        decoded
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<DecodedLine> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&self, raw: &[u8]) -> Option<DecodedLine> {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text.trim(),
            Err(_) => return Some(DecodedLine::Malformed("invalid UTF-8 in stream".to_string())),
        };

        // blank separators, comments (": keep-alive") and event/id fields
        if text.is_empty() || text.starts_with(':') {
            return None;
        }
        let Some(data_content) = text.strip_prefix(SSE_DATA_PREFIX) else {
            if text.starts_with("event:") || text.starts_with("id:") || text.starts_with("retry:") {
                return None;
            }
            log::warn!(
                "stream format: non-standard line: {}",
                sanitize_log_message(text)
            );
            return Some(DecodedLine::Malformed(text.to_string()));
        };

        let data_content = data_content.trim();
        if data_content == SSE_DONE_MESSAGE {
            return Some(DecodedLine::Event(StreamEvent::Done));
        }

        match serde_json::from_str::<Value>(data_content) {
            Ok(event) => Some(DecodedLine::Event(classify_event(&event))),
            Err(e) => {
                if self.enable_recovery {
                    if let Some(recovered) = recover_event_json(data_content) {
                        log::info!("recovered malformed stream event");
                        return Some(DecodedLine::Event(classify_event(&recovered)));
                    }
                    log::error!("stream event parsing error (recovery failed): {}", e);
                } else {
                    log::warn!("stream event parsing error: {}", e);
                }
                Some(DecodedLine::Malformed(data_content.to_string()))
            }
        }
    }
}
