//! Path lookup into JSON response bodies
//!
//! Paths are dot-separated object keys with optional array indices, e.g.
//! `page_info.next_marker` or `errors[0].error_code`.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Split a path into segments. Returns `None` for an empty or malformed path.
fn parse(path: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();

    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if rest.is_empty() {
            return None;
        }

        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return None;
            }
            let close = rest.find(']')?;
            let index = rest[1..close].trim().parse().ok()?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
        }
    }

    Some(segments)
}

/// Look up the value at `path`
pub fn search<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse(path)?;
    let mut current = value;
    for segment in segments {
        current = match segment {
            Segment::Key(key) => current.as_object()?.get(key)?,
            Segment::Index(index) => current.as_array()?.get(index)?,
        };
    }
    Some(current)
}

/// Look up the value at `path` as a string.
///
/// Numbers are rendered in decimal form; `null`, booleans, arrays and
/// objects yield `None`.
pub fn search_str(value: &Value, path: &str) -> Option<String> {
    match search(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_nested_key() {
        let body = json!({"page_info": {"next_marker": "abc"}});
        assert_eq!(
            search_str(&body, "page_info.next_marker"),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_search_array_index() {
        let body = json!({"errors": [{"error_code": "VPC.0101"}, {"error_code": "VPC.0202"}]});
        assert_eq!(
            search_str(&body, "errors[1].error_code"),
            Some("VPC.0202".to_string())
        );
        assert_eq!(search(&body, "errors[2].error_code"), None);
    }

    #[test]
    fn test_search_leading_index() {
        let body = json!([["a", "b"], ["c"]]);
        assert_eq!(search_str(&body, "[0][1]"), Some("b".to_string()));
    }

    #[test]
    fn test_search_number_rendered_as_string() {
        let body = json!({"error": {"code": 4133}});
        assert_eq!(search_str(&body, "error.code"), Some("4133".to_string()));
    }

    #[test]
    fn test_search_missing_or_wrong_type() {
        let body = json!({"status": null, "flag": true, "list": [1]});
        assert_eq!(search_str(&body, "status"), None);
        assert_eq!(search_str(&body, "flag"), None);
        assert_eq!(search(&body, "list.key"), None);
        assert_eq!(search(&body, "missing"), None);
    }

    #[test]
    fn test_malformed_paths() {
        let body = json!({"a": {"b": 1}});
        assert_eq!(search(&body, ""), None);
        assert_eq!(search(&body, "a..b"), None);
        assert_eq!(search(&body, "a[x]"), None);
        assert_eq!(search(&body, "a[0"), None);
        assert_eq!(search(&body, "a[0]b"), None);
    }
}
