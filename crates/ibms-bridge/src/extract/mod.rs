//! Path extraction from telemetry snapshots

mod path;

pub use path::{JsonPath, PathError};

use serde_json::Value;

use crate::error::PointError;

/// Return the first value matched by `path`, or `PathNotFound`.
pub fn extract<'v>(document: &'v Value, path: &JsonPath) -> Result<&'v Value, PointError> {
    path.first_match(document)
        .ok_or_else(|| PointError::PathNotFound {
            path: path.as_str().to_string(),
        })
}

/// Compile and evaluate in one step. Prefer compiling once at load time.
pub fn extract_str<'v>(document: &'v Value, path: &str) -> Result<&'v Value, PointError> {
    let compiled = JsonPath::compile(path).map_err(|e| PointError::MalformedPath {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    extract(document, &compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_not_found_is_distinct_from_malformed() {
        let doc = json!({"current": {"temperature_2m": 21.4}});

        assert_eq!(extract_str(&doc, "$.current.temperature_2m").unwrap(), &json!(21.4));
        assert!(matches!(
            extract_str(&doc, "$.current.humidity"),
            Err(PointError::PathNotFound { .. })
        ));
        assert!(matches!(
            extract_str(&doc, "$.current[?(@"),
            Err(PointError::MalformedPath { .. })
        ));
    }

    #[test]
    fn test_extract_does_not_mutate_document() {
        let doc = json!({"a": [1, 2, 3]});
        let before = doc.clone();
        let path = JsonPath::compile("$.a[-1]").unwrap();

        assert_eq!(extract(&doc, &path).unwrap(), &json!(3));
        assert_eq!(extract(&doc, &path).unwrap(), &json!(3));
        assert_eq!(doc, before);
    }
}
