//! Utility functions for path templates and URLs

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").ok());

/// Placeholder names used in a path template (e.g., "v2/{project_id}/x" -> ["project_id"])
pub fn placeholders(template: &str) -> Vec<String> {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Percent-encode `value` as a single path segment ("a/b?c" -> "a%2Fb%3Fc")
pub fn encode_segment(value: &str) -> String {
    let Ok(mut url) = reqwest::Url::parse("http://segment.invalid/") else {
        return value.to_string();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(value);
    }
    url.path().trim_start_matches('/').to_string()
}

/// Substitute `{name}` placeholders with percent-encoded values. Unknown
/// placeholders are left as they are.
pub fn expand_path(template: &str, values: &HashMap<&str, &str>) -> String {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return template.to_string();
    };
    re.replace_all(template, |c: &regex::Captures| {
        values
            .get(&c[1])
            .map(|v| encode_segment(v))
            .unwrap_or_else(|| c[0].to_string())
    })
    .into_owned()
}

/// Join an endpoint and a relative path with exactly one slash
pub fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("v2/{project_id}/vpn-gateways/{id}"),
            vec!["project_id", "id"]
        );
        assert!(placeholders("v1/instances").is_empty());
    }

    #[test]
    fn test_expand_path() {
        let values = HashMap::from([("project_id", "p1"), ("id", "gw-1")]);
        assert_eq!(
            expand_path("v2/{project_id}/vpn-gateways/{id}", &values),
            "v2/p1/vpn-gateways/gw-1"
        );
        assert_eq!(expand_path("v2/{job_id}", &values), "v2/{job_id}");
    }

    #[test]
    fn test_expand_path_encodes_values() {
        let values = HashMap::from([("project_id", "p1"), ("id", "a/b?c#d e")]);
        assert_eq!(
            expand_path("v2/{project_id}/vpn-gateways/{id}", &values),
            "v2/p1/vpn-gateways/a%2Fb%3Fc%23d%20e"
        );
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("gw-1"), "gw-1");
        assert_eq!(encode_segment("ff80_8081.x~y"), "ff80_8081.x~y");
        assert_eq!(encode_segment("50%"), "50%25");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://api.example.com/", "/v1/x"), "https://api.example.com/v1/x");
        assert_eq!(join_url("http://127.0.0.1:8080", "v1/x"), "http://127.0.0.1:8080/v1/x");
    }
}
