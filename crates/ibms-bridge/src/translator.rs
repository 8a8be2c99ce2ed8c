//! Data Transformer
//!
//! Applies every mapping rule to one telemetry snapshot. Rules are
//! independent: one failing rule yields an error entry for its point key
//! and the rest of the batch still translates.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::PointError;
use crate::extract;
use crate::mapping::{MappingRule, MappingRuleSet};
use crate::transform::TransformRegistry;
use crate::types::{PointValue, json_kind};

/// One rule applied to one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedPoint {
    pub point_key: String,
    pub logical_name: String,
    pub value: PointValue,
    pub object_class: String,
    pub object_params: Map<String, Value>,
}

/// Per-point outcome of a translation pass, in rule order
#[derive(Debug, Default)]
pub struct TranslationBatch {
    results: Vec<(String, Result<TransformedPoint, PointError>)>,
}

impl TranslationBatch {
    pub fn get(&self, point_key: &str) -> Option<&Result<TransformedPoint, PointError>> {
        self.results
            .iter()
            .find(|(key, _)| key == point_key)
            .map(|(_, result)| result)
    }

    pub fn successes(&self) -> impl Iterator<Item = &TransformedPoint> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &PointError)> {
        self.results
            .iter()
            .filter_map(|(key, r)| r.as_ref().err().map(|e| (key.as_str(), e)))
    }

    /// Split into successful points and `(point_key, error)` pairs
    pub fn into_parts(self) -> (Vec<TransformedPoint>, Vec<(String, PointError)>) {
        let mut points = Vec::new();
        let mut errors = Vec::new();
        for (key, result) in self.results {
            match result {
                Ok(point) => points.push(point),
                Err(err) => errors.push((key, err)),
            }
        }
        (points, errors)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DataTransformer {
    transforms: Arc<TransformRegistry>,
}

impl DataTransformer {
    pub fn new(transforms: Arc<TransformRegistry>) -> Self {
        Self { transforms }
    }

    pub fn transform(&self, snapshot: &Value, rules: &MappingRuleSet) -> TranslationBatch {
        let results = rules
            .iter()
            .map(|rule| {
                let result = self.translate(snapshot, rule);
                match &result {
                    Ok(point) => debug!(point = %rule.point_key, value = %point.value, "Translated point"),
                    Err(err) => warn!(point = %rule.point_key, error = %err, "Failed to translate point"),
                }
                (rule.point_key.clone(), result)
            })
            .collect();

        TranslationBatch { results }
    }

    /// Apply one rule to a snapshot
    pub fn translate(&self, snapshot: &Value, rule: &MappingRule) -> Result<TransformedPoint, PointError> {
        let extracted = extract::extract(snapshot, &rule.source_path)?;

        let value = match &rule.transformation {
            Some(name) => {
                let output = self.transforms.apply(name, extracted)?;
                if output.is_null() {
                    return Err(PointError::TransformationProducedNoValue { name: name.clone() });
                }
                to_scalar(&output, rule)?
            }
            None => to_scalar(extracted, rule)?,
        };

        Ok(TransformedPoint {
            point_key: rule.point_key.clone(),
            logical_name: rule.logical_name().to_string(),
            value,
            object_class: rule.object_class.clone(),
            object_params: rule.object_params.clone(),
        })
    }
}

fn to_scalar(value: &Value, rule: &MappingRule) -> Result<PointValue, PointError> {
    PointValue::from_json(value).ok_or_else(|| PointError::NonScalarValue {
        path: rule.source_path.to_string(),
        found: json_kind(value).to_string(),
    })
}
