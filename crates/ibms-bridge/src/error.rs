//! Error types
//!
//! `PointError` is scoped to one logical point and never aborts a tick.
//! `Error` covers start-up: configuration, mapping and I/O.

use serde::Serialize;

use crate::config::ConfigError;
use crate::mapping::MappingError;
use crate::poller::PollError;

/// Failure of a single point during translation or synchronization
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointError {
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    #[error("Malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Unknown transformation: {name}")]
    UnknownTransformation { name: String },

    #[error("Transformation '{name}' rejected input: {reason}")]
    TransformationDomain { name: String, reason: String },

    #[error("Transformation '{name}' produced no value")]
    TransformationProducedNoValue { name: String },

    #[error("Value at '{path}' is not a scalar ({found})")]
    NonScalarValue { path: String, found: String },

    #[error("Cannot construct {class} object: {reason}")]
    ObjectConstruction { class: String, reason: String },

    #[error("Cannot update {object}: {reason}")]
    ObjectUpdate { object: String, reason: String },

    #[error("Cannot announce {object}: {reason}")]
    Notification { object: String, reason: String },
}

impl PointError {
    /// Short stable name of the error kind, for logs and events
    pub fn kind(&self) -> &'static str {
        match self {
            PointError::PathNotFound { .. } => "path_not_found",
            PointError::MalformedPath { .. } => "malformed_path",
            PointError::UnknownTransformation { .. } => "unknown_transformation",
            PointError::TransformationDomain { .. } => "transformation_domain",
            PointError::TransformationProducedNoValue { .. } => "transformation_produced_no_value",
            PointError::NonScalarValue { .. } => "non_scalar_value",
            PointError::ObjectConstruction { .. } => "object_construction",
            PointError::ObjectUpdate { .. } => "object_update",
            PointError::Notification { .. } => "notification",
        }
    }
}

/// A point error tagged with the point it belongs to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointFailure {
    pub point: String,
    #[serde(flatten)]
    pub error: PointError,
}

impl PointFailure {
    pub fn new(point: &str, error: PointError) -> Self {
        Self {
            point: point.to_string(),
            error,
        }
    }
}

impl std::fmt::Display for PointFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.point, self.error)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Start-up and collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Poll error: {0}")]
    Poll(#[from] PollError),

    #[error("Service error: {0}")]
    Service(#[from] bridge_runtime::ServiceError),
}
