//! Mapping Rules
//!
//! Loads the mapping document: a JSON object keyed by point key, each entry
//! naming where to read a value, how to transform it and which protocol
//! object to publish it as. Paths and transformation names are checked
//! here so a bad document fails at startup rather than on every tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, info};

use crate::extract::{JsonPath, PathError};
use crate::transform::TransformRegistry;

/// Object parameter holding an explicit logical name
pub const OBJECT_NAME_PARAM: &str = "objectName";

/// Error type for mapping loading
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Failed to read mapping file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse mapping JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mapping document must be a JSON object keyed by point name")]
    NotAnObject,

    #[error("Invalid rule '{point}': {reason}")]
    InvalidRule { point: String, reason: String },

    #[error("Rule '{point}' has malformed json_path '{path}': {source}")]
    MalformedPath {
        point: String,
        path: String,
        #[source]
        source: PathError,
    },

    #[error("Rule '{point}' references unknown transformation '{name}'")]
    UnknownTransformation { point: String, name: String },

    #[error("Rule '{point}' has invalid bacnet_params: {reason}")]
    InvalidParams { point: String, reason: String },

    #[error("Object name '{name}' is used by both '{first}' and '{second}'")]
    DuplicateObjectName {
        name: String,
        first: String,
        second: String,
    },
}

/// One entry of the mapping document as written on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingEntry {
    pub json_path: String,

    #[serde(default)]
    pub transformation_function: Option<String>,

    pub bacnet_class: String,

    #[serde(default)]
    pub bacnet_params: Option<Value>,
}

/// A validated, immutable mapping rule
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub point_key: String,
    pub source_path: JsonPath,
    pub transformation: Option<String>,
    pub object_class: String,
    pub object_params: Map<String, Value>,
}

impl MappingRule {
    /// Registry identity: the `objectName` parameter if set, else the point key
    pub fn logical_name(&self) -> &str {
        self.object_params
            .get(OBJECT_NAME_PARAM)
            .and_then(Value::as_str)
            .unwrap_or(&self.point_key)
    }

    fn from_entry(
        point_key: &str,
        entry: MappingEntry,
        transforms: &TransformRegistry,
    ) -> Result<Self, MappingError> {
        let source_path =
            JsonPath::compile(&entry.json_path).map_err(|source| MappingError::MalformedPath {
                point: point_key.to_string(),
                path: entry.json_path.clone(),
                source,
            })?;

        // An empty name means "no transformation"
        let transformation = entry.transformation_function.filter(|name| !name.is_empty());
        if let Some(name) = &transformation {
            if !transforms.contains(name) {
                return Err(MappingError::UnknownTransformation {
                    point: point_key.to_string(),
                    name: name.clone(),
                });
            }
        }

        if entry.bacnet_class.trim().is_empty() {
            return Err(MappingError::InvalidRule {
                point: point_key.to_string(),
                reason: "bacnet_class is empty".to_string(),
            });
        }

        let object_params = match entry.bacnet_params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(MappingError::InvalidParams {
                    point: point_key.to_string(),
                    reason: format!("expected an object, got {}", other),
                });
            }
        };

        if let Some(name) = object_params.get(OBJECT_NAME_PARAM) {
            match name.as_str() {
                Some(s) if !s.is_empty() => {}
                _ => {
                    return Err(MappingError::InvalidParams {
                        point: point_key.to_string(),
                        reason: format!("{} must be a non-empty string", OBJECT_NAME_PARAM),
                    });
                }
            }
        }

        Ok(Self {
            point_key: point_key.to_string(),
            source_path,
            transformation,
            object_class: entry.bacnet_class,
            object_params,
        })
    }
}

/// Ordered, validated collection of mapping rules
#[derive(Debug, Clone, Default)]
pub struct MappingRuleSet {
    rules: Vec<MappingRule>,
}

impl MappingRuleSet {
    /// Load and validate a mapping document from disk
    pub async fn load(
        path: impl AsRef<Path>,
        transforms: &TransformRegistry,
    ) -> Result<Self, MappingError> {
        let path = path.as_ref();
        info!("Loading mapping from: {}", path.display());

        let content = fs::read_to_string(path)
            .await
            .map_err(|source| MappingError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let rules = Self::from_json_str(&content, transforms)?;
        info!("Loaded {} mapping rules", rules.len());
        Ok(rules)
    }

    pub fn from_json_str(content: &str, transforms: &TransformRegistry) -> Result<Self, MappingError> {
        let document: Value = serde_json::from_str(content)?;
        Self::from_value(document, transforms)
    }

    pub fn from_value(document: Value, transforms: &TransformRegistry) -> Result<Self, MappingError> {
        let Value::Object(entries) = document else {
            return Err(MappingError::NotAnObject);
        };

        let mut rules = Vec::with_capacity(entries.len());
        let mut owners: HashMap<String, String> = HashMap::new();

        for (point_key, raw) in entries {
            let entry: MappingEntry =
                serde_json::from_value(raw).map_err(|e| MappingError::InvalidRule {
                    point: point_key.clone(),
                    reason: e.to_string(),
                })?;
            let rule = MappingRule::from_entry(&point_key, entry, transforms)?;

            let name = rule.logical_name().to_string();
            if let Some(first) = owners.get(&name) {
                return Err(MappingError::DuplicateObjectName {
                    name,
                    first: first.clone(),
                    second: point_key,
                });
            }
            owners.insert(name, point_key);

            debug!(
                point = %rule.point_key,
                path = %rule.source_path,
                class = %rule.object_class,
                "Loaded mapping rule"
            );
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    pub fn from_rules(rules: Vec<MappingRule>) -> Self {
        Self { rules }
    }

    pub fn get(&self, point_key: &str) -> Option<&MappingRule> {
        self.rules.iter().find(|r| r.point_key == point_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a MappingRuleSet {
    type Item = &'a MappingRule;
    type IntoIter = std::slice::Iter<'a, MappingRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn transforms() -> TransformRegistry {
        TransformRegistry::with_builtins()
    }

    fn weather_mapping() -> Value {
        json!({
            "Temp": {
                "json_path": "$.current.temperature_2m",
                "transformation_function": null,
                "bacnet_class": "AnalogValueObject",
                "bacnet_params": {"objectIdentifier": "analog-value,1", "units": "degreesCelsius"}
            },
            "EvenMinute": {
                "json_path": "$.current.time",
                "transformation_function": "check_if_min_even",
                "bacnet_class": "BinaryValueObject",
                "bacnet_params": {"objectName": "Even Minute Flag"}
            },
            "Wind": {
                "json_path": "current.wind_speed_10m",
                "bacnet_class": "AnalogValueObject"
            }
        })
    }

    #[test]
    fn test_parse_preserves_order() {
        let rules = MappingRuleSet::from_value(weather_mapping(), &transforms()).unwrap();

        let keys: Vec<_> = rules.iter().map(|r| r.point_key.as_str()).collect();
        assert_eq!(keys, vec!["Temp", "EvenMinute", "Wind"]);

        let even = rules.get("EvenMinute").unwrap();
        assert_eq!(even.transformation.as_deref(), Some("check_if_min_even"));
        assert_eq!(even.logical_name(), "Even Minute Flag");

        let wind = rules.get("Wind").unwrap();
        assert_eq!(wind.logical_name(), "Wind");
        assert!(wind.object_params.is_empty());
        assert!(wind.transformation.is_none());
    }

    #[test]
    fn test_rejects_malformed_path() {
        let doc = json!({"Bad": {"json_path": "$.current[", "bacnet_class": "AnalogValueObject"}});
        let err = MappingRuleSet::from_value(doc, &transforms()).unwrap_err();
        assert!(matches!(err, MappingError::MalformedPath { ref point, .. } if point == "Bad"));
    }

    #[test]
    fn test_rejects_unknown_transformation() {
        let doc = json!({"X": {
            "json_path": "$.a",
            "transformation_function": "os.system",
            "bacnet_class": "AnalogValueObject"
        }});
        let err = MappingRuleSet::from_value(doc, &transforms()).unwrap_err();
        assert!(matches!(err, MappingError::UnknownTransformation { ref name, .. } if name == "os.system"));
    }

    #[test]
    fn test_empty_transformation_means_none() {
        let doc = json!({"X": {"json_path": "$.a", "transformation_function": "", "bacnet_class": "AnalogValueObject"}});
        let rules = MappingRuleSet::from_value(doc, &transforms()).unwrap();
        assert!(rules.get("X").unwrap().transformation.is_none());
    }

    #[test]
    fn test_rejects_invalid_params() {
        let doc = json!({"X": {"json_path": "$.a", "bacnet_class": "AnalogValueObject", "bacnet_params": [1]}});
        assert!(matches!(
            MappingRuleSet::from_value(doc, &transforms()),
            Err(MappingError::InvalidParams { .. })
        ));

        let doc = json!({"X": {"json_path": "$.a", "bacnet_class": "AnalogValueObject", "bacnet_params": {"objectName": 5}}});
        assert!(matches!(
            MappingRuleSet::from_value(doc, &transforms()),
            Err(MappingError::InvalidParams { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_logical_names() {
        let doc = json!({
            "A": {"json_path": "$.a", "bacnet_class": "AnalogValueObject", "bacnet_params": {"objectName": "B"}},
            "B": {"json_path": "$.b", "bacnet_class": "AnalogValueObject"}
        });
        let err = MappingRuleSet::from_value(doc, &transforms()).unwrap_err();
        assert!(matches!(
            err,
            MappingError::DuplicateObjectName { ref name, ref first, ref second }
                if name == "B" && first == "A" && second == "B"
        ));
    }

    #[test]
    fn test_rejects_non_object_document_and_unknown_fields() {
        assert!(matches!(
            MappingRuleSet::from_json_str("[1, 2]", &transforms()),
            Err(MappingError::NotAnObject)
        ));
        assert!(matches!(
            MappingRuleSet::from_json_str("{not json", &transforms()),
            Err(MappingError::Json(_))
        ));

        let doc = json!({"X": {"json_path": "$.a", "bacnet_class": "AnalogValueObject", "bacnet_klass": 1}});
        assert!(matches!(
            MappingRuleSet::from_value(doc, &transforms()),
            Err(MappingError::InvalidRule { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(&path, weather_mapping().to_string()).unwrap();

        let rules = MappingRuleSet::load(&path, &transforms()).await.unwrap();
        assert_eq!(rules.len(), 3);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = MappingRuleSet::load(dir.path().join("nope.json"), &transforms())
            .await
            .unwrap_err();
        assert!(matches!(err, MappingError::Io { .. }));
    }
}
