//! BACnet-facing value and identity types shared across the bridge

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Largest instance number a 22-bit BACnet object identifier can carry
pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

/// Object types the bridge can host on its local device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    MultiStateInput,
    MultiStateOutput,
    MultiStateValue,
    CharacterStringValue,
    Device,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::AnalogInput => "analog-input",
            ObjectType::AnalogOutput => "analog-output",
            ObjectType::AnalogValue => "analog-value",
            ObjectType::BinaryInput => "binary-input",
            ObjectType::BinaryOutput => "binary-output",
            ObjectType::BinaryValue => "binary-value",
            ObjectType::MultiStateInput => "multi-state-input",
            ObjectType::MultiStateOutput => "multi-state-output",
            ObjectType::MultiStateValue => "multi-state-value",
            ObjectType::CharacterStringValue => "characterstring-value",
            ObjectType::Device => "device",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    /// Accepts "analog-value", "analog_value", "analogValue" and short forms like "av"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "analoginput" | "ai" => Ok(ObjectType::AnalogInput),
            "analogoutput" | "ao" => Ok(ObjectType::AnalogOutput),
            "analogvalue" | "av" => Ok(ObjectType::AnalogValue),
            "binaryinput" | "bi" => Ok(ObjectType::BinaryInput),
            "binaryoutput" | "bo" => Ok(ObjectType::BinaryOutput),
            "binaryvalue" | "bv" => Ok(ObjectType::BinaryValue),
            "multistateinput" | "msi" => Ok(ObjectType::MultiStateInput),
            "multistateoutput" | "mso" => Ok(ObjectType::MultiStateOutput),
            "multistatevalue" | "msv" => Ok(ObjectType::MultiStateValue),
            "characterstringvalue" | "csv" => Ok(ObjectType::CharacterStringValue),
            "device" | "dev" => Ok(ObjectType::Device),
            _ => Err(format!("Unknown object type: {}", s)),
        }
    }
}

impl Serialize for ObjectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObjectType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Object Identifier
// ─────────────────────────────────────────────────────────────────────────────

/// BACnet object identifier: type plus 22-bit instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    pub fn new(object_type: ObjectType, instance: u32) -> Result<Self, String> {
        if instance > MAX_INSTANCE {
            return Err(format!(
                "Instance {} exceeds maximum {}",
                instance, MAX_INSTANCE
            ));
        }
        Ok(Self {
            object_type,
            instance,
        })
    }

    /// Parse the configuration forms: `"analog-value,1"`, `"analog-value:1"`
    /// or a `["analogValue", 1]` pair
    pub fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => s.parse(),
            Value::Array(pair) if pair.len() == 2 => {
                let object_type = pair[0]
                    .as_str()
                    .ok_or_else(|| "object type must be a string".to_string())?
                    .parse()?;
                let instance = pair[1]
                    .as_u64()
                    .and_then(|i| u32::try_from(i).ok())
                    .ok_or_else(|| "instance must be a non-negative integer".to_string())?;
                Self::new(object_type, instance)
            }
            other => Err(format!("Invalid object identifier: {}", other)),
        }
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.object_type, self.instance)
    }
}

impl FromStr for ObjectIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_type, instance) = s
            .split_once([',', ':'])
            .ok_or_else(|| format!("Invalid object identifier: {}", s))?;
        let instance: u32 = instance
            .trim()
            .parse()
            .map_err(|_| format!("Invalid instance in object identifier: {}", s))?;
        Self::new(object_type.trim().parse()?, instance)
    }
}

impl Serialize for ObjectIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Properties carried in change-of-value notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyIdentifier {
    PresentValue,
    StatusFlags,
}

// ─────────────────────────────────────────────────────────────────────────────
// Point Value
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar present value of a point.
///
/// Equality is exact and type-sensitive: `Real(1.0) != Integer(1)`.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
}

impl PointValue {
    /// Convert a JSON scalar. Null, arrays and objects have no point value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(PointValue::Boolean(*b)),
            Value::String(s) => Some(PointValue::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(PointValue::Integer(i))
                } else {
                    n.as_f64().map(PointValue::Real)
                }
            }
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PointValue::Integer(i) => Value::from(*i),
            PointValue::Real(f) => Value::from(*f),
            PointValue::Boolean(b) => Value::Bool(*b),
            PointValue::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Integer(i) => Some(*i as f64),
            PointValue::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PointValue::Integer(_) => "integer",
            PointValue::Real(_) => "real",
            PointValue::Boolean(_) => "boolean",
            PointValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Integer(i) => write!(f, "{}", i),
            PointValue::Real(v) => write!(f, "{}", v),
            PointValue::Boolean(b) => write!(f, "{}", b),
            PointValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<f64> for PointValue {
    fn from(v: f64) -> Self {
        PointValue::Real(v)
    }
}

impl From<i64> for PointValue {
    fn from(v: i64) -> Self {
        PointValue::Integer(v)
    }
}

impl From<bool> for PointValue {
    fn from(v: bool) -> Self {
        PointValue::Boolean(v)
    }
}

impl From<&str> for PointValue {
    fn from(v: &str) -> Self {
        PointValue::Text(v.to_string())
    }
}

impl Serialize for PointValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PointValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        PointValue::from_json(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("not a scalar: {}", value)))
    }
}

/// Short name for a JSON value's kind, for error messages
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
