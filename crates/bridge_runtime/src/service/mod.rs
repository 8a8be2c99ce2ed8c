//! Service Lifecycle Management
//!
//! A service is a long-running component of the bridge, such as the
//! telemetry poll loop. Services publish what they do on the event bus.
//!
//! # Lifecycle
//!
//! - `on_start`: called once before the service enters its loop
//! - `on_tick`: called every `tick_interval` (the first tick fires immediately)
//! - `on_stop`: called once on shutdown, bounded by `shutdown_timeout`

mod event;
mod handle;
mod manager;

pub use event::*;
pub use handle::*;
pub use manager::*;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Service Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during service lifecycle
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Service initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Service already running: {0}")]
    AlreadyRunning(String),

    #[error("Service not running: {0}")]
    NotRunning(String),

    #[error("Tick failed: {0}")]
    TickFailed(String),

    #[error("Shutdown timeout")]
    ShutdownTimeout,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

// ─────────────────────────────────────────────────────────────────────────────
// Service Specification
// ─────────────────────────────────────────────────────────────────────────────

/// Static description of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique service identifier (e.g. "bridge/telemetry")
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Period of `on_tick` calls; `None` disables ticking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_interval: Option<Duration>,

    /// Upper bound for `on_stop`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl ServiceSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tick_interval: None,
            shutdown_timeout: default_shutdown_timeout(),
            description: None,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context passed to every lifecycle hook
pub struct ServiceContext {
    pub service_id: String,

    event_publisher: EventPublisher,
}

impl ServiceContext {
    pub fn new(service_id: String, event_publisher: EventPublisher) -> Self {
        Self {
            service_id,
            event_publisher,
        }
    }

    /// Publish an event on the bus
    pub fn publish(&self, event: Event) -> ServiceResult<()> {
        self.event_publisher.publish(event)
    }

    /// Create an event sourced from this service and publish it.
    ///
    /// Publishing with nobody listening is not an error for the caller.
    pub fn emit(&self, event_type: impl Into<String>, data: serde_json::Value) {
        let event = Event::new(event_type, &self.service_id, data);
        if self.publish(event).is_err() {
            tracing::trace!(service_id = %self.service_id, "No event subscribers");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A component managed by the [`ServiceManager`]
#[async_trait]
pub trait Service: Send + Sync + 'static {
    fn spec(&self) -> ServiceSpec;

    /// Acquire resources. An error here keeps the service from running.
    async fn on_start(&mut self, ctx: &ServiceContext) -> ServiceResult<()>;

    /// Release resources. The service is considered stopped even on error.
    async fn on_stop(&mut self, ctx: &ServiceContext) -> ServiceResult<()>;

    /// Periodic work. Errors are logged and the loop keeps running.
    async fn on_tick(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
        Ok(())
    }
}
