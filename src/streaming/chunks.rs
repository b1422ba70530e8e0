use serde_json::Value;

/// One decoded event from the backend stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental content fragment
    Content(String),
    /// Error payload sent by the backend mid-stream
    Error(String),
    /// Terminal completion marker
    Done,
    /// Event that carried nothing usable (keep-alive, metadata)
    Empty,
}

/// Interprets a parsed event object.
pub fn classify_event(event: &Value) -> StreamEvent {
    if let Some(error) = extract_error(event) {
        return StreamEvent::Error(error);
    }

    let mut content = String::new();
    if let Some(value) = event.get("content") {
        append_stream_content(value, &mut content);
    } else if let Some(delta) = event.get("delta") {
        append_stream_content(delta, &mut content);
    } else if let Some(choice) = extract_first_choice(event) {
        if let Some(delta_content) = choice.get("delta").and_then(|d| d.get("content")) {
            append_stream_content(delta_content, &mut content);
        } else if let Some(text) = choice.get("text") {
            append_stream_content(text, &mut content);
        }
    }

    let done = event.get("done").and_then(|d| d.as_bool()).unwrap_or(false)
        || event.get("type").and_then(|t| t.as_str()) == Some("done");

    match (content.is_empty(), done) {
        // a final event may still carry text; content wins and the stream end
        // (or a following marker) completes the session
        (false, _) => StreamEvent::Content(content),
        (true, true) => StreamEvent::Done,
        (true, false) => StreamEvent::Empty,
    }
}

/// Full response text of a non-incremental reply.
pub fn extract_response_text(response: &Value) -> Option<String> {
    let mut text = String::new();
    if let Some(value) = response.get("response") {
        append_stream_content(value, &mut text);
    } else if let Some(value) = response.get("content") {
        append_stream_content(value, &mut text);
    } else if let Some(message) = response.get("message").and_then(|m| m.get("content")) {
        append_stream_content(message, &mut text);
    } else if let Some(choice) = extract_first_choice(response)
        && let Some(message) = choice.get("message").and_then(|m| m.get("content"))
    {
        append_stream_content(message, &mut text);
    } else {
        return None;
    }
    Some(text)
}

pub fn extract_error(value: &Value) -> Option<String> {
    match value.get("error") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(Value::Object(obj)) => Some(
            obj.get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
        ),
        Some(Value::Null) | Some(Value::Bool(false)) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn extract_first_choice(chunk: &Value) -> Option<&Value> {
    chunk
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|array| array.first())
}

fn append_stream_content(content_value: &Value, buffer: &mut String) {
    match content_value {
        Value::String(text) => buffer.push_str(text),
        Value::Array(items) => {
            for item in items {
                if let Some(text) = item.as_str() {
                    buffer.push_str(text);
                } else if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                    buffer.push_str(text);
                }
            }
        }
        Value::Object(obj) => {
            if let Some(text) = obj.get("text").and_then(|t| t.as_str()) {
                buffer.push_str(text);
            } else if let Some(nested) = obj.get("content") {
                append_stream_content(nested, buffer);
            }
        }
        _ => {}
    }
}
