//! Transformation Registry
//!
//! Closed set of named value transformations, built once at startup.
//! Mapping documents refer to entries by name; nothing is looked up
//! dynamically beyond this table.

mod builtins;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PointError;
use crate::types::json_kind;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("Unknown transformation: {0}")]
    Unknown(String),

    #[error("Transformation '{name}' rejected input: {reason}")]
    Domain { name: String, reason: String },
}

impl From<TransformError> for PointError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Unknown(name) => PointError::UnknownTransformation { name },
            TransformError::Domain { name, reason } => {
                PointError::TransformationDomain { name, reason }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input Domain
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of input a transformation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDomain {
    /// ISO-8601 timestamp string
    Timestamp,
    Boolean,
    Number,
    Any,
}

impl InputDomain {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            InputDomain::Timestamp => value.is_string(),
            InputDomain::Boolean => value.is_boolean(),
            InputDomain::Number => value.is_number(),
            InputDomain::Any => true,
        }
    }
}

impl fmt::Display for InputDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InputDomain::Timestamp => "timestamp",
            InputDomain::Boolean => "boolean",
            InputDomain::Number => "number",
            InputDomain::Any => "any",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Pure transformation body. `Err` carries the reason the input was rejected.
pub type TransformFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

struct TransformEntry {
    domain: InputDomain,
    func: TransformFn,
}

pub struct TransformRegistry {
    entries: HashMap<String, Arc<TransformEntry>>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransformRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry holding the built-in transformations
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: &str, domain: InputDomain, func: F)
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            Arc::new(TransformEntry {
                domain,
                func: Arc::new(func),
            }),
        );
    }

    /// Make `alias` resolve to the same entry as `target`.
    /// Returns false if `target` is not registered.
    pub fn alias(&mut self, alias: &str, target: &str) -> bool {
        match self.entries.get(target).cloned() {
            Some(entry) => {
                self.entries.insert(alias.to_string(), entry);
                true
            }
            None => false,
        }
    }

    pub fn apply(&self, name: &str, value: &Value) -> Result<Value, TransformError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| TransformError::Unknown(name.to_string()))?;

        if !entry.domain.accepts(value) {
            return Err(TransformError::Domain {
                name: name.to_string(),
                reason: format!("expected {}, got {}", entry.domain, json_kind(value)),
            });
        }

        (entry.func)(value).map_err(|reason| TransformError::Domain {
            name: name.to_string(),
            reason,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn domain(&self, name: &str) -> Option<InputDomain> {
        self.entries.get(name).map(|e| e.domain)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.entries.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("names", &self.names())
            .finish()
    }
}
