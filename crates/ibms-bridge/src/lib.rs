//! IBMS Bridge - telemetry to BACnet object synchronization
//!
//! This crate provides:
//! - Path extraction and named transformations over polled JSON snapshots
//! - Mapping rules from snapshot fields to protocol objects
//! - An object registry that creates objects once and announces value changes
//! - A protocol stack seam with an in-process local device implementation
//! - The bridge service driven by `bridge_runtime::service`

// Re-export core crates
pub use bridge_runtime;

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Core translation
pub mod extract;
pub mod mapping;
pub mod transform;
pub mod translator;

// Object lifecycle
pub mod stack;
pub mod sync;

pub mod engine;
pub mod poller;
pub mod service;

pub use config::BridgeConfig;
pub use engine::{BridgeEngine, TickReport};
pub use error::{Error, PointError, PointFailure, Result};
pub use mapping::{MappingRule, MappingRuleSet};
pub use types::{ObjectIdentifier, ObjectType, PointValue};
