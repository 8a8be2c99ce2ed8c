//! Protocol stack seam
//!
//! The engine never touches the network directly. It builds object
//! specifications with the [`ObjectFactory`] and hands them to a
//! [`ProtocolStack`], which owns the hosted objects and their announcement.

mod factory;
mod local;

#[cfg(test)]
pub(crate) mod fake;

pub use factory::{ObjectFactory, ObjectProperties, ObjectSpec, coerce_present_value};
pub use local::{HostedObject, LocalDevice, LocalStack, Segmentation};

use async_trait::async_trait;
use serde::Serialize;

use crate::types::{ObjectIdentifier, ObjectType, PointValue, PropertyIdentifier};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StackError {
    #[error("Unknown object class: {0}")]
    UnknownClass(String),

    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("Incompatible present value for {object_type}: {reason}")]
    IncompatibleValue {
        object_type: ObjectType,
        reason: String,
    },

    #[error("Object identifier already in use: {0}")]
    DuplicateIdentifier(ObjectIdentifier),

    #[error("Object name already in use: {0}")]
    DuplicateName(String),

    #[error("No free instance left for {0}")]
    InstancesExhausted(ObjectType),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectIdentifier),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Reference to an object hosted by a stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectHandle {
    pub identifier: ObjectIdentifier,
    pub name: String,
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyValue {
    pub property: PropertyIdentifier,
    pub value: PointValue,
}

/// Unconfirmed change-of-value notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovNotification {
    pub initiating_device: ObjectIdentifier,
    pub monitored_object: ObjectIdentifier,
    pub object_name: String,
    /// Seconds left on the subscription; 0 for unsolicited notifications
    pub time_remaining: u32,
    pub values: Vec<PropertyValue>,
}

impl CovNotification {
    pub fn present_value(device: ObjectIdentifier, handle: &ObjectHandle, value: PointValue) -> Self {
        Self {
            initiating_device: device,
            monitored_object: handle.identifier,
            object_name: handle.name.clone(),
            time_remaining: 0,
            values: vec![PropertyValue {
                property: PropertyIdentifier::PresentValue,
                value,
            }],
        }
    }
}

/// Capabilities the engine needs from a protocol stack
#[async_trait]
pub trait ProtocolStack: Send + Sync {
    /// Identifier of the local device announcing changes
    fn device_identifier(&self) -> ObjectIdentifier;

    async fn create_object(&self, spec: ObjectSpec) -> Result<ObjectHandle, StackError>;

    async fn update_value(&self, handle: &ObjectHandle, value: &PointValue) -> Result<(), StackError>;

    async fn announce(&self, notification: &CovNotification) -> Result<(), StackError>;
}
