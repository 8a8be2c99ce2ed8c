//! Bridge Service
//!
//! Drives the engine from the service runtime: every tick polls the
//! telemetry source, synchronizes the snapshot and publishes what happened
//! on the event bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_runtime::{Service, ServiceContext, ServiceResult, ServiceSpec, topics};
use serde_json::json;
use tracing::{error, info, warn};

use crate::engine::{BridgeEngine, TickReport};
use crate::poller::TelemetrySource;
use crate::sync::SideEffect;

pub const SERVICE_ID: &str = "ibms-bridge";

pub struct BridgeService {
    source: Arc<dyn TelemetrySource>,
    engine: Arc<BridgeEngine>,
    interval: Duration,
}

impl BridgeService {
    pub fn new(source: Arc<dyn TelemetrySource>, engine: Arc<BridgeEngine>, interval: Duration) -> Self {
        Self {
            source,
            engine,
            interval,
        }
    }

    fn publish_report(ctx: &ServiceContext, report: &TickReport) {
        for effect in &report.effects {
            let topic = match effect {
                SideEffect::Created { .. } => topics::OBJECT_CREATED,
                SideEffect::Changed { .. } => topics::OBJECT_CHANGED,
            };
            ctx.emit(topic, serde_json::to_value(effect).unwrap_or_default());
        }

        let failures = report
            .translation_errors
            .iter()
            .map(|f| ("translate", f))
            .chain(report.sync_errors.iter().map(|f| ("synchronize", f)));
        for (stage, failure) in failures {
            let mut data = serde_json::to_value(failure).unwrap_or_default();
            if let Some(obj) = data.as_object_mut() {
                obj.insert("stage".to_string(), json!(stage));
                obj.insert("tick_id".to_string(), json!(report.tick_id));
            }
            ctx.emit(topics::POINT_FAILED, data);
        }
    }
}

#[async_trait]
impl Service for BridgeService {
    fn spec(&self) -> ServiceSpec {
        ServiceSpec::new(SERVICE_ID, "Telemetry Bridge")
            .with_tick_interval(self.interval)
            .with_description("Polls telemetry and synchronizes protocol objects")
    }

    async fn on_start(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
        info!(
            rules = self.engine.rules().len(),
            interval_secs = self.interval.as_secs(),
            "Bridge service started"
        );
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
        self.engine.shutdown().await;
        info!("Bridge service stopped");
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &ServiceContext) -> ServiceResult<()> {
        let snapshot = match self.source.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Skip this tick; the next one polls again
                error!("Failed to poll telemetry: {}", e);
                ctx.emit(topics::POLL_FAILED, json!({"error": e.to_string()}));
                return Ok(());
            }
        };

        let report = self.engine.run_tick(&snapshot).await;
        if !report.is_clean() {
            warn!(
                tick = %report.tick_id,
                errors = report.error_count(),
                "Tick finished with point errors"
            );
        }
        Self::publish_report(ctx, &report);
        Ok(())
    }
}
