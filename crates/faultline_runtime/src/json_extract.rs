//! Layered recovery of JSON from LLM output. No format guarantee exists
//! upstream, so parsing falls through strict parse -> fenced code block ->
//! bracket matching before the caller's stage-specific hard fallback.

use serde_json::Value;

/// Try to pull a JSON value out of raw model output.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Strict parse first
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    // Fenced code block (```json ... ``` or bare ```)
    if let Some(block) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Some(value);
        }
    }

    // Bracket matching: first balanced object or array in the text
    if let Some(candidate) = extract_balanced(trimmed, '{', '}') {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(value);
        }
    }
    if let Some(candidate) = extract_balanced(trimmed, '[', ']') {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(value);
        }
    }

    None
}

/// Like `extract_json` but only accepts an array, searching arrays first so
/// an object wrapper like {"hypotheses": [...]} still yields the array.
pub fn extract_json_array(raw: &str) -> Option<Vec<Value>> {
    let value = extract_json(raw)?;
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => {
            // Accept the first array-valued key, whatever it is named.
            map.into_iter()
                .find_map(|(_, v)| v.as_array().cloned())
        }
        _ => None,
    }
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_wins() {
        let value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn fenced_block_is_recovered() {
        let raw = "Here is the result:\n```json\n{\"a\": 2}\n```\nDone.";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn balanced_object_inside_prose() {
        let raw = "The answer is {\"a\": {\"b\": 3}} as requested.";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["a"]["b"], 3);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_matching() {
        let raw = "prefix {\"msg\": \"left { brace\", \"n\": 4} suffix";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["n"], 4);
    }

    #[test]
    fn array_pulled_out_of_object_wrapper() {
        let raw = r#"{"hypotheses": [{"hypothesis_text": "x"}]}"#;
        let items = extract_json_array(raw).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json("no json here at all").is_none());
    }
}
