//! Object Registry
//!
//! Maps logical names to the protocol objects the bridge has created. Each
//! name owns a slot behind its own async mutex: whoever holds the slot may
//! decide create-vs-reconcile and apply the side effect without racing
//! another task on the same name, while distinct names proceed in parallel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::stack::ObjectHandle;
use crate::types::PointValue;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectRecord {
    pub logical_name: String,
    pub handle: ObjectHandle,
    /// Value most recently and successfully pushed to the stack
    pub last_known_value: PointValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<Option<ObjectRecord>>>;

/// Exclusive access to one logical name's record
pub type RecordGuard = OwnedMutexGuard<Option<ObjectRecord>>;

#[derive(Debug, Default)]
pub struct ObjectRegistry {
    slots: DashMap<String, Slot>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the slot for `logical_name`, creating an empty one if needed.
    /// Held across the stack calls for that name.
    pub async fn lock(&self, logical_name: &str) -> RecordGuard {
        let slot = self
            .slots
            .entry(logical_name.to_string())
            .or_default()
            .value()
            .clone();
        slot.lock_owned().await
    }

    pub async fn get(&self, logical_name: &str) -> Option<ObjectRecord> {
        let slot = self.slots.get(logical_name)?.value().clone();
        let record = slot.lock().await;
        record.clone()
    }

    pub async fn contains(&self, logical_name: &str) -> bool {
        self.get(logical_name).await.is_some()
    }

    /// All created records, sorted by logical name
    pub async fn snapshot(&self) -> Vec<ObjectRecord> {
        let slots: Vec<Slot> = self.slots.iter().map(|e| e.value().clone()).collect();

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(record) = slot.lock().await.clone() {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        records
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
