//! In-process protocol stack
//!
//! Hosts the local device and its object database. Announcements are
//! published on a broadcast channel; subscribers (a wire transport, tests,
//! diagnostics) receive every unconfirmed COV notification.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{
    CovNotification, ObjectHandle, ObjectProperties, ObjectSpec, ProtocolStack, StackError,
    coerce_present_value,
};
use crate::types::{MAX_INSTANCE, ObjectIdentifier, ObjectType, PointValue};

const ANNOUNCE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Segmentation {
    #[default]
    SegmentedBoth,
    SegmentedTransmit,
    SegmentedReceive,
    NoSegmentation,
}

/// Identity of the local device that hosts the bridge objects
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalDevice {
    pub identifier: ObjectIdentifier,
    pub name: String,
    pub max_apdu_length: u32,
    pub segmentation: Segmentation,
    pub vendor_id: u16,
    pub address: String,
}

/// Snapshot of one hosted object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostedObject {
    pub identifier: ObjectIdentifier,
    pub name: String,
    pub class: String,
    pub present_value: PointValue,
    pub properties: ObjectProperties,
    pub last_update: DateTime<Utc>,
}

#[derive(Default)]
struct ObjectDatabase {
    objects: BTreeMap<ObjectIdentifier, HostedObject>,
    names: HashMap<String, ObjectIdentifier>,
}

impl ObjectDatabase {
    fn allocate(&self, object_type: ObjectType) -> Result<ObjectIdentifier, StackError> {
        (1..=MAX_INSTANCE)
            .map(|instance| ObjectIdentifier {
                object_type,
                instance,
            })
            .find(|id| !self.objects.contains_key(id))
            .ok_or(StackError::InstancesExhausted(object_type))
    }
}

pub struct LocalStack {
    device: LocalDevice,
    db: RwLock<ObjectDatabase>,
    announcements: broadcast::Sender<CovNotification>,
}

impl LocalStack {
    pub fn new(device: LocalDevice) -> Self {
        let (announcements, _) = broadcast::channel(ANNOUNCE_CAPACITY);
        info!(
            "Local device {} ({}) on {}",
            device.name, device.identifier, device.address
        );
        Self {
            device,
            db: RwLock::new(ObjectDatabase::default()),
            announcements,
        }
    }

    pub fn device(&self) -> &LocalDevice {
        &self.device
    }

    /// Receive every announcement made after this call
    pub fn subscribe(&self) -> broadcast::Receiver<CovNotification> {
        self.announcements.subscribe()
    }

    pub fn object(&self, identifier: &ObjectIdentifier) -> Option<HostedObject> {
        self.db.read().objects.get(identifier).cloned()
    }

    pub fn object_by_name(&self, name: &str) -> Option<HostedObject> {
        let db = self.db.read();
        db.names.get(name).and_then(|id| db.objects.get(id)).cloned()
    }

    /// Object list of the device, device object first
    pub fn object_list(&self) -> Vec<ObjectIdentifier> {
        std::iter::once(self.device.identifier)
            .chain(self.db.read().objects.keys().copied())
            .collect()
    }

    pub fn object_count(&self) -> usize {
        self.db.read().objects.len()
    }
}

#[async_trait]
impl ProtocolStack for LocalStack {
    fn device_identifier(&self) -> ObjectIdentifier {
        self.device.identifier
    }

    async fn create_object(&self, spec: ObjectSpec) -> Result<ObjectHandle, StackError> {
        let mut db = self.db.write();

        if spec.object_name == self.device.name || db.names.contains_key(&spec.object_name) {
            return Err(StackError::DuplicateName(spec.object_name));
        }

        let identifier = match spec.identifier {
            Some(id) if db.objects.contains_key(&id) => return Err(StackError::DuplicateIdentifier(id)),
            Some(id) => id,
            None => db.allocate(spec.object_type)?,
        };

        let object = HostedObject {
            identifier,
            name: spec.object_name.clone(),
            class: spec.class,
            present_value: spec.present_value,
            properties: spec.properties,
            last_update: Utc::now(),
        };
        db.names.insert(object.name.clone(), identifier);
        db.objects.insert(identifier, object);

        debug!(object = %identifier, name = %spec.object_name, "Added object to local device");
        Ok(ObjectHandle {
            identifier,
            name: spec.object_name,
        })
    }

    async fn update_value(&self, handle: &ObjectHandle, value: &PointValue) -> Result<(), StackError> {
        let mut db = self.db.write();
        let object = db
            .objects
            .get_mut(&handle.identifier)
            .ok_or(StackError::ObjectNotFound(handle.identifier))?;

        object.present_value = coerce_present_value(
            handle.identifier.object_type,
            value,
            object.properties.number_of_states,
        )?;
        object.last_update = Utc::now();
        Ok(())
    }

    async fn announce(&self, notification: &CovNotification) -> Result<(), StackError> {
        if !self.db.read().objects.contains_key(&notification.monitored_object) {
            return Err(StackError::ObjectNotFound(notification.monitored_object));
        }

        // Unconfirmed: nobody listening is not a failure
        match self.announcements.send(notification.clone()) {
            Ok(receivers) => debug!(
                object = %notification.monitored_object,
                receivers,
                "Announced change of value"
            ),
            Err(_) => debug!(
                object = %notification.monitored_object,
                "Announced change of value with no listeners"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::ObjectFactory;
    use serde_json::{Map, json};

    fn device() -> LocalDevice {
        LocalDevice {
            identifier: ObjectIdentifier::new(ObjectType::Device, 599).unwrap(),
            name: "ibms-bridge".to_string(),
            max_apdu_length: 1476,
            segmentation: Segmentation::SegmentedBoth,
            vendor_id: 999,
            address: "0.0.0.0:47808".to_string(),
        }
    }

    fn spec(class: &str, name: &str, params: serde_json::Value, value: PointValue) -> ObjectSpec {
        let params: Map<String, serde_json::Value> = match params {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        };
        ObjectFactory::default().build(class, name, &params, &value).unwrap()
    }

    #[tokio::test]
    async fn test_create_allocates_instances() {
        let stack = LocalStack::new(device());

        let a = stack
            .create_object(spec("AnalogValueObject", "A", json!({}), PointValue::Real(1.0)))
            .await
            .unwrap();
        let b = stack
            .create_object(spec("AnalogValueObject", "B", json!({}), PointValue::Real(2.0)))
            .await
            .unwrap();
        let c = stack
            .create_object(spec("BinaryValueObject", "C", json!({}), PointValue::Boolean(true)))
            .await
            .unwrap();

        assert_eq!(a.identifier.instance, 1);
        assert_eq!(b.identifier.instance, 2);
        assert_eq!(c.identifier, ObjectIdentifier::new(ObjectType::BinaryValue, 1).unwrap());
        assert_eq!(stack.object_count(), 3);
        assert_eq!(stack.object_list()[0], device().identifier);
        assert_eq!(stack.object_by_name("B").unwrap().present_value, PointValue::Real(2.0));
    }

    #[tokio::test]
    async fn test_rejects_duplicates() {
        let stack = LocalStack::new(device());
        stack
            .create_object(spec("AnalogValueObject", "A", json!({"objectIdentifier": 5}), PointValue::Real(1.0)))
            .await
            .unwrap();

        assert!(matches!(
            stack
                .create_object(spec("AnalogValueObject", "A", json!({}), PointValue::Real(1.0)))
                .await,
            Err(StackError::DuplicateName(_))
        ));
        assert!(matches!(
            stack
                .create_object(spec("AnalogValueObject", "Z", json!({"objectIdentifier": 5}), PointValue::Real(1.0)))
                .await,
            Err(StackError::DuplicateIdentifier(_))
        ));
        assert!(matches!(
            stack
                .create_object(spec("AnalogValueObject", "ibms-bridge", json!({}), PointValue::Real(1.0)))
                .await,
            Err(StackError::DuplicateName(_))
        ));
    }

    #[tokio::test]
    async fn test_update_value_validates() {
        let stack = LocalStack::new(device());
        let handle = stack
            .create_object(spec("BinaryValueObject", "Flag", json!({}), PointValue::Integer(0)))
            .await
            .unwrap();

        stack.update_value(&handle, &PointValue::Integer(1)).await.unwrap();
        assert_eq!(stack.object(&handle.identifier).unwrap().present_value, PointValue::Boolean(true));

        assert!(matches!(
            stack.update_value(&handle, &PointValue::Text("on".into())).await,
            Err(StackError::IncompatibleValue { .. })
        ));
        assert_eq!(stack.object(&handle.identifier).unwrap().present_value, PointValue::Boolean(true));
    }

    #[tokio::test]
    async fn test_announce_reaches_subscribers() {
        let stack = LocalStack::new(device());
        let mut rx = stack.subscribe();
        let handle = stack
            .create_object(spec("AnalogValueObject", "Temp", json!({}), PointValue::Real(21.4)))
            .await
            .unwrap();

        let notification = CovNotification::present_value(stack.device_identifier(), &handle, PointValue::Real(21.4));
        stack.announce(&notification).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, notification);
        assert_eq!(received.time_remaining, 0);
        assert_eq!(received.initiating_device.instance, 599);
    }

    #[tokio::test]
    async fn test_announce_unknown_object() {
        let stack = LocalStack::new(device());
        let handle = ObjectHandle {
            identifier: ObjectIdentifier::new(ObjectType::AnalogValue, 77).unwrap(),
            name: "ghost".to_string(),
        };
        let notification = CovNotification::present_value(stack.device_identifier(), &handle, PointValue::Real(0.0));
        assert!(matches!(
            stack.announce(&notification).await,
            Err(StackError::ObjectNotFound(_))
        ));
    }
}
