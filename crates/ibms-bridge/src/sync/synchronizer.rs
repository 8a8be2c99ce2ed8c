//! Object Synchronizer
//!
//! Per logical name: absent → create the object and record its value;
//! present → compare against the last known value and update only on change.
//! `last_known_value` advances only after the stack accepted the value.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::dispatcher::BroadcastDispatcher;
use super::registry::{ObjectRecord, ObjectRegistry, RecordGuard};
use crate::error::{PointError, PointFailure};
use crate::stack::{ObjectFactory, ProtocolStack, StackError};
use crate::translator::TransformedPoint;
use crate::types::{ObjectIdentifier, PointValue};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum SideEffect {
    Created {
        logical_name: String,
        object: ObjectIdentifier,
        value: PointValue,
    },
    Changed {
        logical_name: String,
        object: ObjectIdentifier,
        previous: PointValue,
        value: PointValue,
    },
}

impl SideEffect {
    pub fn logical_name(&self) -> &str {
        match self {
            SideEffect::Created { logical_name, .. } | SideEffect::Changed { logical_name, .. } => {
                logical_name
            }
        }
    }

    pub fn value(&self) -> &PointValue {
        match self {
            SideEffect::Created { value, .. } | SideEffect::Changed { value, .. } => value,
        }
    }
}

/// Outcome of one synchronization pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub effects: Vec<SideEffect>,
    /// Logical names whose value was unchanged
    pub suppressed: Vec<String>,
    pub errors: Vec<PointFailure>,
}

impl SyncReport {
    pub fn created(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| matches!(e, SideEffect::Created { .. }))
            .count()
    }

    pub fn changed(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| matches!(e, SideEffect::Changed { .. }))
            .count()
    }
}

enum PointOutcome {
    /// Applied; the announcement may still have been refused
    Applied(SideEffect, Option<PointError>),
    Suppressed(String),
    Failed(String, PointError),
}

pub struct ObjectSynchronizer {
    stack: Arc<dyn ProtocolStack>,
    factory: Arc<ObjectFactory>,
    dispatcher: BroadcastDispatcher,
    concurrency: usize,
}

impl ObjectSynchronizer {
    pub fn new(
        stack: Arc<dyn ProtocolStack>,
        factory: Arc<ObjectFactory>,
        dispatcher: BroadcastDispatcher,
    ) -> Self {
        Self {
            stack,
            factory,
            dispatcher,
            concurrency: 1,
        }
    }

    /// Reconcile up to `concurrency` distinct names at once (1 = sequential)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn dispatcher(&self) -> &BroadcastDispatcher {
        &self.dispatcher
    }

    pub async fn synchronize(&self, registry: &ObjectRegistry, points: Vec<TransformedPoint>) -> SyncReport {
        let outcomes: Vec<PointOutcome> = stream::iter(points)
            .map(|point| self.sync_point(registry, point))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = SyncReport::default();
        for outcome in outcomes {
            match outcome {
                PointOutcome::Applied(effect, notify_error) => {
                    if let Some(error) = notify_error {
                        report.errors.push(PointFailure::new(effect.logical_name(), error));
                    }
                    report.effects.push(effect);
                }
                PointOutcome::Suppressed(name) => report.suppressed.push(name),
                PointOutcome::Failed(name, error) => report.errors.push(PointFailure::new(&name, error)),
            }
        }
        report
    }

    async fn sync_point(&self, registry: &ObjectRegistry, point: TransformedPoint) -> PointOutcome {
        let name = point.logical_name.clone();
        match self.apply(registry, point).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(point = %name, error = %error, "Failed to synchronize point");
                PointOutcome::Failed(name, error)
            }
        }
    }

    async fn apply(&self, registry: &ObjectRegistry, point: TransformedPoint) -> Result<PointOutcome, PointError> {
        // Held until the side effect for this name is settled
        let mut slot = registry.lock(&point.logical_name).await;

        match slot.as_mut() {
            Some(record) => self.reconcile(record, point).await,
            None => self.create(&mut slot, point).await,
        }
    }

    async fn create(&self, slot: &mut RecordGuard, point: TransformedPoint) -> Result<PointOutcome, PointError> {
        let construction_error = |e: StackError| PointError::ObjectConstruction {
            class: point.object_class.clone(),
            reason: e.to_string(),
        };

        let spec = self
            .factory
            .build(&point.object_class, &point.logical_name, &point.object_params, &point.value)
            .map_err(construction_error)?;
        let handle = self.stack.create_object(spec).await.map_err(construction_error)?;

        info!(point = %point.logical_name, object = %handle.identifier, value = %point.value, "Created object");

        let notify_error = self.dispatcher.notify(&handle, point.value.clone()).await.err();
        let effect = SideEffect::Created {
            logical_name: point.logical_name.clone(),
            object: handle.identifier,
            value: point.value.clone(),
        };

        let now = Utc::now();
        **slot = Some(ObjectRecord {
            logical_name: point.logical_name,
            handle,
            last_known_value: point.value,
            created_at: now,
            updated_at: now,
        });
        Ok(PointOutcome::Applied(effect, notify_error))
    }

    async fn reconcile(&self, record: &mut ObjectRecord, point: TransformedPoint) -> Result<PointOutcome, PointError> {
        if record.last_known_value == point.value {
            debug!(point = %point.logical_name, value = %point.value, "No change, skipping broadcast");
            return Ok(PointOutcome::Suppressed(point.logical_name));
        }

        self.stack
            .update_value(&record.handle, &point.value)
            .await
            .map_err(|e| PointError::ObjectUpdate {
                object: record.handle.to_string(),
                reason: e.to_string(),
            })?;

        let previous = std::mem::replace(&mut record.last_known_value, point.value.clone());
        record.updated_at = Utc::now();

        info!(
            point = %point.logical_name,
            object = %record.handle.identifier,
            "Updated object: {} -> {}",
            previous,
            point.value
        );

        let notify_error = self.dispatcher.notify(&record.handle, point.value.clone()).await.err();
        Ok(PointOutcome::Applied(
            SideEffect::Changed {
                logical_name: point.logical_name,
                object: record.handle.identifier,
                previous,
                value: point.value,
            },
            notify_error,
        ))
    }
}
