//! Built-in transformations

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;

use super::{InputDomain, TransformRegistry};

pub const MINUTE_PARITY: &str = "minute-parity";
pub const BOOLEAN_TO_INT: &str = "boolean-to-int";
pub const ROUND: &str = "round";

/// Name used by older mapping documents for `minute-parity`
const MINUTE_PARITY_LEGACY: &str = "check_if_min_even";

pub(super) fn register_all(registry: &mut TransformRegistry) {
    registry.register(MINUTE_PARITY, InputDomain::Timestamp, minute_parity);
    registry.alias(MINUTE_PARITY_LEGACY, MINUTE_PARITY);
    registry.register(BOOLEAN_TO_INT, InputDomain::Boolean, boolean_to_int);
    registry.register(ROUND, InputDomain::Number, round);
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    // Basic form
    "%Y%m%dT%H%M%S%.f",
    "%Y%m%dT%H%M",
];

// `%#z` takes `+01`, `+0100` and `+01:00`
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M%#z",
    "%Y%m%dT%H%M%S%.f%#z",
    "%Y%m%dT%H%M%#z",
];

/// Minute of an ISO-8601 timestamp, in the timestamp's own offset
fn parse_minute(text: &str) -> Option<u32> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.minute());
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.minute());
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.minute());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(|_| 0)
}

/// 1 when the minute is even, 0 when odd
fn minute_parity(value: &Value) -> Result<Value, String> {
    let text = value.as_str().ok_or_else(|| "expected a string".to_string())?;
    let minute =
        parse_minute(text).ok_or_else(|| format!("'{}' is not an ISO-8601 timestamp", text))?;
    Ok(Value::from(if minute % 2 == 0 { 1 } else { 0 }))
}

fn boolean_to_int(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        other => Err(format!("expected a boolean, got {}", other)),
    }
}

fn round(value: &Value) -> Result<Value, String> {
    let n = value.as_f64().ok_or_else(|| "expected a number".to_string())?;
    if n.abs() >= i64::MAX as f64 {
        return Err(format!("{} is out of integer range", n));
    }
    Ok(Value::from(n.round() as i64))
}
