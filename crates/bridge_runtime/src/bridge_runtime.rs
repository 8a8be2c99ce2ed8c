//! Bridge Runtime - Service lifecycle for the telemetry bridge
//!
//! Long-running parts of the bridge (the poll loop, observers of bridge
//! events) are modelled as services. The manager owns their tasks, drives
//! their tick timers and routes events between them.

pub mod service;

pub use service::*;
