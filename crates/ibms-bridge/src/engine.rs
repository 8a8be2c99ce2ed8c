//! Bridge Engine
//!
//! One instance per running bridge. Owns the mapping rules, the object
//! registry and the synchronizer; `run_tick` is called once per snapshot
//! and ticks must not overlap.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::PointFailure;
use crate::mapping::MappingRuleSet;
use crate::stack::{ObjectFactory, ProtocolStack};
use crate::sync::{BroadcastDispatcher, DispatchStats, ObjectRegistry, ObjectSynchronizer, SideEffect};
use crate::transform::TransformRegistry;
use crate::translator::DataTransformer;

/// Everything one tick did
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Points translated successfully
    pub translated: usize,
    pub translation_errors: Vec<PointFailure>,
    pub effects: Vec<SideEffect>,
    pub suppressed: Vec<String>,
    pub sync_errors: Vec<PointFailure>,
    /// Dispatcher counters after the tick
    pub dispatch: DispatchStats,
}

impl TickReport {
    pub fn error_count(&self) -> usize {
        self.translation_errors.len() + self.sync_errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }
}

pub struct BridgeEngine {
    rules: MappingRuleSet,
    transformer: DataTransformer,
    registry: ObjectRegistry,
    synchronizer: ObjectSynchronizer,
}

impl BridgeEngine {
    /// Must be called inside a tokio runtime (spawns the dispatcher worker)
    pub fn new(
        rules: MappingRuleSet,
        transforms: Arc<TransformRegistry>,
        stack: Arc<dyn ProtocolStack>,
        settings: &SyncConfig,
    ) -> Self {
        let dispatcher = BroadcastDispatcher::spawn(stack.clone(), settings.dispatch_queue);
        let synchronizer = ObjectSynchronizer::new(stack, Arc::new(ObjectFactory::with_standard_classes()), dispatcher)
            .with_concurrency(settings.concurrency);

        Self {
            rules,
            transformer: DataTransformer::new(transforms),
            registry: ObjectRegistry::new(),
            synchronizer,
        }
    }

    pub fn rules(&self) -> &MappingRuleSet {
        &self.rules
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &BroadcastDispatcher {
        self.synchronizer.dispatcher()
    }

    /// Translate one snapshot and synchronize the result
    pub async fn run_tick(&self, snapshot: &Value) -> TickReport {
        let tick_id = Uuid::new_v4();
        let span = info_span!("tick", id = %tick_id);

        async move {
            let started_at = Utc::now();
            let timer = Instant::now();

            let (points, errors) = self.transformer.transform(snapshot, &self.rules).into_parts();
            let translated = points.len();
            let translation_errors = errors
                .into_iter()
                .map(|(point, error)| PointFailure { point, error })
                .collect();

            let sync = self.synchronizer.synchronize(&self.registry, points).await;

            let report = TickReport {
                tick_id,
                started_at,
                duration_ms: timer.elapsed().as_millis() as u64,
                translated,
                translation_errors,
                effects: sync.effects,
                suppressed: sync.suppressed,
                sync_errors: sync.errors,
                dispatch: self.dispatcher().stats(),
            };

            info!(
                translated = report.translated,
                created = report.effects.iter().filter(|e| matches!(e, SideEffect::Created { .. })).count(),
                changed = report.effects.iter().filter(|e| matches!(e, SideEffect::Changed { .. })).count(),
                unchanged = report.suppressed.len(),
                errors = report.error_count(),
                "Tick complete"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Flush queued announcements and stop the dispatcher
    pub async fn shutdown(&self) {
        info!("Shutting down bridge engine");
        self.dispatcher().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PointError;
    use crate::stack::fake::FakeStack;
    use crate::stack::{LocalDevice, LocalStack, Segmentation};
    use crate::types::{ObjectIdentifier, ObjectType, PointValue};
    use serde_json::json;

    fn rules(transforms: &TransformRegistry) -> MappingRuleSet {
        MappingRuleSet::from_value(
            json!({
                "Temp": {
                    "json_path": "$.current.temperature_2m",
                    "transformation_function": null,
                    "bacnet_class": "AnalogValueObject",
                    "bacnet_params": {"units": "degreesCelsius"}
                },
                "EvenMinute": {
                    "json_path": "$.current.time",
                    "transformation_function": "minute-parity",
                    "bacnet_class": "BinaryValueObject",
                    "bacnet_params": {}
                },
                "Humidity": {
                    "json_path": "$.current.relative_humidity_2m",
                    "bacnet_class": "AnalogValueObject"
                }
            }),
            transforms,
        )
        .unwrap()
    }

    fn engine(stack: Arc<dyn ProtocolStack>) -> BridgeEngine {
        let transforms = Arc::new(TransformRegistry::with_builtins());
        BridgeEngine::new(rules(&transforms), transforms, stack, &SyncConfig::default())
    }

    fn snapshot(temp: f64, time: &str) -> Value {
        json!({"current": {"time": time, "temperature_2m": temp}})
    }

    #[tokio::test]
    async fn test_three_ticks() {
        let stack = Arc::new(FakeStack::new());
        let engine = engine(stack.clone());

        let first = engine.run_tick(&snapshot(21.4, "2024-01-01T10:31")).await;
        assert_eq!(first.translated, 2);
        assert_eq!(first.effects.len(), 2);
        assert_eq!(first.translation_errors.len(), 1);
        assert_eq!(first.translation_errors[0].point, "Humidity");
        assert!(matches!(first.translation_errors[0].error, PointError::PathNotFound { .. }));

        let second = engine.run_tick(&snapshot(21.4, "2024-01-01T10:31")).await;
        assert!(second.effects.is_empty());
        assert_eq!(second.suppressed.len(), 2);

        let third = engine.run_tick(&snapshot(22.0, "2024-01-01T10:31")).await;
        assert_eq!(third.effects.len(), 1);
        assert_eq!(third.effects[0].logical_name(), "Temp");
        assert_eq!(third.effects[0].value(), &PointValue::Real(22.0));

        engine.shutdown().await;
        assert_eq!(stack.announcements().len(), 3);
        assert_eq!(engine.registry().len().await, 2);
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let engine = engine(Arc::new(FakeStack::new()));
        let report = engine.run_tick(&snapshot(21.4, "2024-01-01T10:32")).await;

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["translated"], json!(2));
        assert_eq!(value["translation_errors"][0]["kind"], json!("path_not_found"));
        assert_eq!(value["effects"][0]["effect"], json!("created"));
        assert_eq!(value["effects"][0]["value"], json!(21.4));
        assert_eq!(value["effects"][1]["value"], json!(1));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_with_local_stack() {
        let stack = Arc::new(LocalStack::new(LocalDevice {
            identifier: ObjectIdentifier::new(ObjectType::Device, 599).unwrap(),
            name: "bridge".to_string(),
            max_apdu_length: 1476,
            segmentation: Segmentation::SegmentedBoth,
            vendor_id: 999,
            address: "0.0.0.0:47808".to_string(),
        }));
        let mut announcements = stack.subscribe();
        let engine = engine(stack.clone());

        engine.run_tick(&snapshot(21.4, "2024-01-01T10:31")).await;
        engine.run_tick(&snapshot(22.0, "2024-01-01T10:32")).await;
        engine.shutdown().await;

        let temp = stack.object_by_name("Temp").unwrap();
        assert_eq!(temp.present_value, PointValue::Real(22.0));
        assert_eq!(temp.properties.units.as_deref(), Some("degreesCelsius"));
        assert_eq!(
            stack.object_by_name("EvenMinute").unwrap().present_value,
            PointValue::Boolean(true)
        );

        let mut received = Vec::new();
        while let Ok(n) = announcements.try_recv() {
            received.push((n.object_name, n.values[0].value.clone()));
        }
        assert_eq!(received.len(), 4);
        assert!(received.contains(&("Temp".to_string(), PointValue::Real(22.0))));
        assert!(received.contains(&("EvenMinute".to_string(), PointValue::Integer(1))));
    }
}
