//! Tolerant parsing of structured model output.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AiError;

/**
 * \brief Parse model output as JSON after removing a Markdown fence.
 * \details Handles "```json ... ```" (label case-insensitive), a bare "``` ... ```",
 * and commentary after the closing fence.
 */
pub fn parse_model_json(text: &str) -> Result<Value, AiError> {
    Ok(serde_json::from_str(strip_code_fence(text))?)
}

/**
 * \brief Like `parse_model_json`, deserializing straight into `T`.
 */
pub fn parse_model_json_as<T: DeserializeOwned>(text: &str) -> Result<T, AiError> {
    Ok(serde_json::from_str(strip_code_fence(text))?)
}

/**
 * \brief Remove a surrounding Markdown code fence, if any.
 */
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_ticks) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let body = match after_ticks.get(..4) {
        Some(label) if label.eq_ignore_ascii_case("json") => &after_ticks[4..],
        _ => after_ticks,
    };
    // The label line ends at the first newline; anything else on it is ignored.
    let body = match body.find('\n') {
        Some(pos) if body[..pos].trim().is_empty() => &body[pos + 1..],
        _ => body,
    };
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim()
}

/**
 * \brief Treat newline-delimited bullet or numbered text as a list.
 * \details Strips "-", "*", "•" and "1." / "1)" markers; blank lines are skipped.
 */
pub fn parse_bullet_list(text: &str) -> Vec<String> {
    strip_code_fence(text)
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

/**
 * \brief Best-effort list extraction: JSON array, an object holding one array, or bullets.
 */
pub fn parse_string_list(text: &str) -> Vec<String> {
    match parse_model_json(text) {
        Ok(Value::Array(items)) => json_items(items),
        Ok(Value::Object(map)) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => json_items(items),
                _ => parse_bullet_list(text),
            }
        }
        _ => parse_bullet_list(text),
    }
}

fn json_items(items: Vec<Value>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    for marker in ["- ", "* ", "• ", "– "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim();
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest.trim();
            }
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_parses_fenced_json() {
        let v = parse_model_json("```json\n{\"a\":1}\n```").expect("parse");
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn test_fence_label_case_and_trailing_commentary() {
        let v = parse_model_json("  ```JSON\n[1, 2]\n```\nHope this helps!  ").expect("parse");
        assert_eq!(v, json!([1, 2]));
    }

    #[test]
    fn test_unlabeled_fence_and_plain_json() {
        assert_eq!(
            parse_model_json("```\n{\"ok\": true}\n```").expect("parse"),
            json!({"ok": true})
        );
        assert_eq!(
            parse_model_json("  {\"ok\": false}\n").expect("parse"),
            json!({"ok": false})
        );
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let err = parse_model_json("```json\nnot json\n```").unwrap_err();
        assert!(matches!(err, AiError::Json(_)));
    }

    #[test]
    fn test_parse_into_type() {
        #[derive(Deserialize)]
        struct Outline {
            title: String,
            points: Vec<String>,
        }
        let o: Outline =
            parse_model_json_as("```json\n{\"title\": \"T\", \"points\": [\"a\"]}\n```")
                .expect("parse");
        assert_eq!(o.title, "T");
        assert_eq!(o.points, vec!["a"]);
    }

    #[test]
    fn test_bullet_fallback() {
        let items = parse_bullet_list("- First\n* Second\n\n3. Third\n4) Fourth\n• Fifth");
        assert_eq!(items, vec!["First", "Second", "Third", "Fourth", "Fifth"]);
        assert_eq!(parse_bullet_list("3.5 hours of talks"), vec!["3.5 hours of talks"]);
    }

    #[test]
    fn test_string_list_prefers_json() {
        assert_eq!(
            parse_string_list("```json\n[\"a\", \"b\", \"\"]\n```"),
            vec!["a", "b"]
        );
        assert_eq!(
            parse_string_list("{\"objectives\": [\"x\", \"y\"]}"),
            vec!["x", "y"]
        );
        assert_eq!(parse_string_list("- x\n- y"), vec!["x", "y"]);
    }
}
