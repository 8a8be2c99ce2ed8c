//! Object Factory
//!
//! Closed table of object classes the mapping document may name, and the
//! validation that turns a class name plus construction parameters into an
//! [`ObjectSpec`].

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::StackError;
use crate::types::{ObjectIdentifier, ObjectType, PointValue, json_kind};

const STANDARD_CLASSES: &[(&str, ObjectType)] = &[
    ("AnalogInputObject", ObjectType::AnalogInput),
    ("AnalogOutputObject", ObjectType::AnalogOutput),
    ("AnalogValueObject", ObjectType::AnalogValue),
    ("BinaryInputObject", ObjectType::BinaryInput),
    ("BinaryOutputObject", ObjectType::BinaryOutput),
    ("BinaryValueObject", ObjectType::BinaryValue),
    ("MultiStateInputObject", ObjectType::MultiStateInput),
    ("MultiStateOutputObject", ObjectType::MultiStateOutput),
    ("MultiStateValueObject", ObjectType::MultiStateValue),
    ("CharacterStringValueObject", ObjectType::CharacterStringValue),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Analog,
    Binary,
    MultiState,
    CharacterString,
    Device,
}

fn family(object_type: ObjectType) -> Family {
    match object_type {
        ObjectType::AnalogInput | ObjectType::AnalogOutput | ObjectType::AnalogValue => Family::Analog,
        ObjectType::BinaryInput | ObjectType::BinaryOutput | ObjectType::BinaryValue => Family::Binary,
        ObjectType::MultiStateInput | ObjectType::MultiStateOutput | ObjectType::MultiStateValue => {
            Family::MultiState
        }
        ObjectType::CharacterStringValue => Family::CharacterString,
        ObjectType::Device => Family::Device,
    }
}

/// Optional descriptive properties of a hosted object
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectProperties {
    pub description: Option<String>,
    pub units: Option<String>,
    pub cov_increment: Option<f64>,
    pub out_of_service: bool,
    pub number_of_states: Option<u32>,
    pub active_text: Option<String>,
    pub inactive_text: Option<String>,
}

/// Validated construction request for a protocol object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSpec {
    pub class: String,
    pub object_type: ObjectType,
    /// `None` lets the stack allocate the next free instance
    pub identifier: Option<ObjectIdentifier>,
    pub object_name: String,
    pub present_value: PointValue,
    pub properties: ObjectProperties,
}

/// Check `value` against an object type and convert it to the stored form.
///
/// Analog objects store reals, binary objects store booleans (`0`/`1` are
/// accepted as inactive/active), multi-state objects store a 1-based state
/// number and characterstring objects store text.
pub fn coerce_present_value(
    object_type: ObjectType,
    value: &PointValue,
    number_of_states: Option<u32>,
) -> Result<PointValue, StackError> {
    let incompatible = |reason: String| StackError::IncompatibleValue { object_type, reason };

    match (family(object_type), value) {
        (Family::Analog, PointValue::Real(v)) => Ok(PointValue::Real(*v)),
        (Family::Analog, PointValue::Integer(i)) => Ok(PointValue::Real(*i as f64)),
        (Family::Binary, PointValue::Boolean(b)) => Ok(PointValue::Boolean(*b)),
        (Family::Binary, PointValue::Integer(i @ (0 | 1))) => Ok(PointValue::Boolean(*i == 1)),
        (Family::MultiState, PointValue::Integer(state)) => {
            if *state < 1 {
                return Err(incompatible(format!("state {} must be at least 1", state)));
            }
            if let Some(states) = number_of_states {
                if *state > i64::from(states) {
                    return Err(incompatible(format!(
                        "state {} exceeds numberOfStates {}",
                        state, states
                    )));
                }
            }
            Ok(PointValue::Integer(*state))
        }
        (Family::CharacterString, PointValue::Text(s)) => Ok(PointValue::Text(s.clone())),
        (Family::Device, _) => Err(incompatible("device objects have no present value".to_string())),
        (_, other) => Err(incompatible(format!("{} value {} not accepted", other.kind(), other))),
    }
}

pub struct ObjectFactory {
    classes: HashMap<String, ObjectType>,
}

impl Default for ObjectFactory {
    fn default() -> Self {
        Self::with_standard_classes()
    }
}

impl ObjectFactory {
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
        }
    }

    pub fn with_standard_classes() -> Self {
        let mut factory = Self::new();
        for (name, object_type) in STANDARD_CLASSES {
            factory.register(name, *object_type);
        }
        factory
    }

    pub fn register(&mut self, class: &str, object_type: ObjectType) {
        self.classes.insert(class.to_string(), object_type);
    }

    pub fn object_type(&self, class: &str) -> Option<ObjectType> {
        self.classes.get(class).copied()
    }

    /// Registered class names, sorted
    pub fn classes(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.classes.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Build an object spec from configuration parameters.
    ///
    /// `objectName` defaults to `logical_name`; the incoming value always
    /// wins over a configured `presentValue`.
    pub fn build(
        &self,
        class: &str,
        logical_name: &str,
        params: &Map<String, Value>,
        value: &PointValue,
    ) -> Result<ObjectSpec, StackError> {
        let object_type = self
            .object_type(class)
            .ok_or_else(|| StackError::UnknownClass(class.to_string()))?;
        let fam = family(object_type);

        let mut object_name = logical_name.to_string();
        let mut identifier = None;
        let mut properties = ObjectProperties::default();

        for (key, param) in params {
            match key.as_str() {
                "objectName" => object_name = string_param(key, param)?,
                "objectIdentifier" => identifier = Some(identifier_param(object_type, param)?),
                "description" => properties.description = Some(string_param(key, param)?),
                "units" => properties.units = Some(string_param(key, param)?),
                "covIncrement" => {
                    let increment = param
                        .as_f64()
                        .filter(|v| *v >= 0.0)
                        .ok_or_else(|| invalid(key, format!("expected a non-negative number, got {}", param)))?;
                    properties.cov_increment = Some(increment);
                }
                "outOfService" => {
                    properties.out_of_service = param
                        .as_bool()
                        .ok_or_else(|| invalid(key, format!("expected a boolean, got {}", json_kind(param))))?;
                }
                "numberOfStates" if fam == Family::MultiState => {
                    let states = param
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .filter(|n| *n >= 1)
                        .ok_or_else(|| invalid(key, format!("expected a positive integer, got {}", param)))?;
                    properties.number_of_states = Some(states);
                }
                "activeText" if fam == Family::Binary => {
                    properties.active_text = Some(string_param(key, param)?)
                }
                "inactiveText" if fam == Family::Binary => {
                    properties.inactive_text = Some(string_param(key, param)?)
                }
                "presentValue" => {}
                _ => {
                    return Err(invalid(key, format!("not a parameter of {}", class)));
                }
            }
        }

        if object_name.is_empty() {
            return Err(invalid("objectName", "must not be empty".to_string()));
        }

        let present_value = coerce_present_value(object_type, value, properties.number_of_states)?;

        Ok(ObjectSpec {
            class: class.to_string(),
            object_type,
            identifier,
            object_name,
            present_value,
            properties,
        })
    }
}

fn invalid(param: &str, reason: String) -> StackError {
    StackError::InvalidParameter {
        param: param.to_string(),
        reason,
    }
}

fn string_param(key: &str, param: &Value) -> Result<String, StackError> {
    param
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(key, format!("expected a string, got {}", json_kind(param))))
}

/// Accepts the identifier forms, or a bare instance number of the class's type
fn identifier_param(object_type: ObjectType, param: &Value) -> Result<ObjectIdentifier, StackError> {
    let identifier = match param.as_u64() {
        Some(instance) => u32::try_from(instance)
            .map_err(|_| format!("instance {} out of range", instance))
            .and_then(|i| ObjectIdentifier::new(object_type, i)),
        None => ObjectIdentifier::from_json(param),
    }
    .map_err(|reason| invalid("objectIdentifier", reason))?;

    if identifier.object_type != object_type {
        return Err(invalid(
            "objectIdentifier",
            format!("{} does not match class type {}", identifier, object_type),
        ));
    }
    Ok(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    #[test]
    fn test_standard_classes() {
        let factory = ObjectFactory::with_standard_classes();
        assert_eq!(factory.classes().len(), 10);
        assert_eq!(factory.object_type("BinaryValueObject"), Some(ObjectType::BinaryValue));
        assert_eq!(factory.object_type("Device"), None);
    }

    #[test]
    fn test_build_merges_name_and_value() {
        let factory = ObjectFactory::default();
        let spec = factory
            .build(
                "AnalogValueObject",
                "Temp",
                &params(json!({
                    "objectIdentifier": "analog-value,3",
                    "units": "degreesCelsius",
                    "presentValue": 0.0,
                    "covIncrement": 0.5
                })),
                &PointValue::Real(21.4),
            )
            .unwrap();

        assert_eq!(spec.object_name, "Temp");
        assert_eq!(spec.present_value, PointValue::Real(21.4));
        assert_eq!(spec.identifier, Some(ObjectIdentifier::new(ObjectType::AnalogValue, 3).unwrap()));
        assert_eq!(spec.properties.units.as_deref(), Some("degreesCelsius"));
        assert_eq!(spec.properties.cov_increment, Some(0.5));
    }

    #[test]
    fn test_object_name_param_overrides_logical_name() {
        let factory = ObjectFactory::default();
        let spec = factory
            .build("AnalogValueObject", "Temp", &params(json!({"objectName": "Outdoor Temp"})), &PointValue::Real(1.0))
            .unwrap();
        assert_eq!(spec.object_name, "Outdoor Temp");
    }

    #[test]
    fn test_unknown_class_and_param() {
        let factory = ObjectFactory::default();
        assert_eq!(
            factory.build("PumpObject", "P", &Map::new(), &PointValue::Real(1.0)),
            Err(StackError::UnknownClass("PumpObject".to_string()))
        );
        assert!(matches!(
            factory.build("AnalogValueObject", "T", &params(json!({"colour": "red"})), &PointValue::Real(1.0)),
            Err(StackError::InvalidParameter { ref param, .. }) if param == "colour"
        ));
        assert!(matches!(
            factory.build("AnalogValueObject", "T", &params(json!({"numberOfStates": 3})), &PointValue::Real(1.0)),
            Err(StackError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_identifier_must_match_class() {
        let factory = ObjectFactory::default();
        assert!(matches!(
            factory.build(
                "AnalogValueObject",
                "T",
                &params(json!({"objectIdentifier": "binary-value,1"})),
                &PointValue::Real(1.0)
            ),
            Err(StackError::InvalidParameter { .. })
        ));

        let spec = factory
            .build("BinaryValueObject", "B", &params(json!({"objectIdentifier": 9})), &PointValue::Boolean(true))
            .unwrap();
        assert_eq!(spec.identifier.unwrap().instance, 9);
    }

    #[test]
    fn test_value_compatibility() {
        let analog = ObjectType::AnalogValue;
        let binary = ObjectType::BinaryValue;
        let multi = ObjectType::MultiStateValue;
        let text = ObjectType::CharacterStringValue;

        assert_eq!(coerce_present_value(analog, &PointValue::Integer(3), None), Ok(PointValue::Real(3.0)));
        assert!(coerce_present_value(analog, &PointValue::Text("x".into()), None).is_err());

        assert_eq!(coerce_present_value(binary, &PointValue::Integer(1), None), Ok(PointValue::Boolean(true)));
        assert_eq!(coerce_present_value(binary, &PointValue::Integer(0), None), Ok(PointValue::Boolean(false)));
        assert!(coerce_present_value(binary, &PointValue::Integer(2), None).is_err());

        assert!(coerce_present_value(multi, &PointValue::Integer(3), Some(3)).is_ok());
        assert!(coerce_present_value(multi, &PointValue::Integer(4), Some(3)).is_err());
        assert!(coerce_present_value(multi, &PointValue::Integer(0), None).is_err());

        assert!(coerce_present_value(text, &PointValue::Text("ok".into()), None).is_ok());
        assert!(coerce_present_value(text, &PointValue::Real(1.0), None).is_err());
    }
}
