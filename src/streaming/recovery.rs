use serde_json::Value;

/// Salvages an event object from a line that failed to parse, e.g. one with
/// trailing garbage or a stray prefix around the JSON body.
pub fn recover_event_json(line: &str) -> Option<Value> {
    if let Some(start_brace) = line.find('{')
        && let Some(end_brace) = line.rfind('}')
        && start_brace < end_brace
    {
        let potential_json = &line[start_brace..=end_brace];
        if let Ok(parsed @ Value::Object(_)) = serde_json::from_str::<Value>(potential_json) {
            return Some(parsed);
        }

        // trailing commas before a closing brace
        let cleaned = potential_json.replace(",}", "}").replace(", }", " }");
        if let Ok(parsed @ Value::Object(_)) = serde_json::from_str::<Value>(&cleaned) {
            return Some(parsed);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recovers_object_surrounded_by_noise() {
        assert_eq!(
            recover_event_json("garbage {\"content\": \"hi\"} tail"),
            Some(json!({"content": "hi"}))
        );
    }

    #[test]
    fn recovers_trailing_comma() {
        assert_eq!(
            recover_event_json("{\"content\": \"hi\",}"),
            Some(json!({"content": "hi"}))
        );
    }

    #[test]
    fn gives_up_on_truncated_objects() {
        assert_eq!(recover_event_json("{\"content\": \"hi"), None);
        assert_eq!(recover_event_json("no json here"), None);
    }
}
