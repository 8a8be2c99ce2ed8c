//! Recording protocol stack for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CovNotification, ObjectHandle, ObjectSpec, ProtocolStack, StackError};
use crate::types::{ObjectIdentifier, ObjectType, PointValue};

#[derive(Debug, Clone, PartialEq)]
pub enum StackCall {
    Create { name: String, value: PointValue },
    Update { name: String, value: PointValue },
    Announce { name: String, value: PointValue },
}

#[derive(Default)]
pub struct FakeStack {
    calls: Mutex<Vec<StackCall>>,
    values: Mutex<HashMap<String, PointValue>>,
    next_instance: AtomicU32,
    fail_create: AtomicBool,
    fail_update: AtomicBool,
    fail_announce: AtomicBool,
    announce_delay: Mutex<Option<Duration>>,
}

impl FakeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<StackCall> {
        self.calls.lock().clone()
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, StackCall::Create { .. }))
    }

    pub fn updates(&self) -> usize {
        self.count(|c| matches!(c, StackCall::Update { .. }))
    }

    pub fn announcements(&self) -> Vec<(String, PointValue)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                StackCall::Announce { name, value } => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Value the stack currently holds for an object
    pub fn value(&self, name: &str) -> Option<PointValue> {
        self.values.lock().get(name).cloned()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_announce(&self, fail: bool) {
        self.fail_announce.store(fail, Ordering::SeqCst);
    }

    pub fn set_announce_delay(&self, delay: Duration) {
        *self.announce_delay.lock() = Some(delay);
    }

    fn count(&self, pred: impl Fn(&StackCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl ProtocolStack for FakeStack {
    fn device_identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier {
            object_type: ObjectType::Device,
            instance: 1,
        }
    }

    async fn create_object(&self, spec: ObjectSpec) -> Result<ObjectHandle, StackError> {
        self.calls.lock().push(StackCall::Create {
            name: spec.object_name.clone(),
            value: spec.present_value.clone(),
        });
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StackError::Transport("create rejected".to_string()));
        }

        let identifier = spec.identifier.unwrap_or(ObjectIdentifier {
            object_type: spec.object_type,
            instance: self.next_instance.fetch_add(1, Ordering::SeqCst) + 1,
        });
        self.values
            .lock()
            .insert(spec.object_name.clone(), spec.present_value);
        Ok(ObjectHandle {
            identifier,
            name: spec.object_name,
        })
    }

    async fn update_value(&self, handle: &ObjectHandle, value: &PointValue) -> Result<(), StackError> {
        self.calls.lock().push(StackCall::Update {
            name: handle.name.clone(),
            value: value.clone(),
        });
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(StackError::Transport("update rejected".to_string()));
        }
        self.values.lock().insert(handle.name.clone(), value.clone());
        Ok(())
    }

    async fn announce(&self, notification: &CovNotification) -> Result<(), StackError> {
        let delay = *self.announce_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let value = notification
            .values
            .first()
            .map(|pv| pv.value.clone())
            .unwrap_or(PointValue::Integer(0));
        self.calls.lock().push(StackCall::Announce {
            name: notification.object_name.clone(),
            value,
        });
        if self.fail_announce.load(Ordering::SeqCst) {
            return Err(StackError::Transport("announce rejected".to_string()));
        }
        Ok(())
    }
}
