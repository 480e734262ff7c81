//! Runtime value coercion.
//!
//! Static compatibility is checked per edge when the graph is built. Values
//! still need converting when they arrive, because an `any` output may carry
//! any JSON value and a `string` output feeding a `number` input has to be
//! parsed. Coercion is never silently lossy: a value that cannot be converted
//! is an error for the consuming node.

use crate::port::PortType;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use std::fmt;

/// A non-identity conversion applied to a value on its way into a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoercion {
    /// Input port that received the value.
    pub port: String,
    pub from: PortType,
    pub to: PortType,
}

/// A value that could not be converted to the port's type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoercionError {
    pub from: PortType,
    pub to: PortType,
    pub reason: String,
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot coerce {} to {}: {}", self.from, self.to, self.reason)
    }
}

impl std::error::Error for CoercionError {}

/// Returns the port type describing a runtime value, or `None` for `null`.
#[must_use]
pub fn runtime_type(value: &JsonValue) -> Option<PortType> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(_) => Some(PortType::Boolean),
        JsonValue::Number(_) => Some(PortType::Number),
        JsonValue::String(_) => Some(PortType::String),
        JsonValue::Array(_) => Some(PortType::Array),
        JsonValue::Object(_) => Some(PortType::Object),
    }
}

/// Converts `value` for a port of type `target`.
///
/// Returns the converted value and, when a conversion happened, the pair of
/// types involved.
///
/// # Errors
///
/// Returns [`CoercionError`] when no rule applies or the rule fails (for
/// example a string that is not a decimal number).
pub fn coerce(
    value: JsonValue,
    target: PortType,
) -> Result<(JsonValue, Option<(PortType, PortType)>), CoercionError> {
    let Some(from) = runtime_type(&value) else {
        return Ok((value, None));
    };

    if target == PortType::Any || from == target {
        return Ok((value, None));
    }

    let fail = |reason: String| CoercionError {
        from,
        to: target,
        reason,
    };

    if target == PortType::File {
        return match from {
            PortType::String | PortType::Object => Ok((value, None)),
            _ => Err(fail("expected base64 text or a file object".to_string())),
        };
    }

    let converted = match (value, target) {
        (JsonValue::String(s), PortType::Number) => parse_number(&s).ok_or_else(|| {
            fail(format!("'{s}' is not a decimal number"))
        })?,
        (JsonValue::Number(n), PortType::String) => JsonValue::String(n.to_string()),
        (JsonValue::Object(map), PortType::String) => {
            let encoded = serde_json::to_string(&map).map_err(|e| fail(e.to_string()))?;
            JsonValue::String(encoded)
        }
        (JsonValue::String(s), PortType::Object) => {
            match serde_json::from_str::<JsonValue>(&s).map_err(|e| fail(e.to_string()))? {
                decoded @ JsonValue::Object(_) => decoded,
                other => {
                    return Err(fail(format!(
                        "decoded JSON is {}, not an object",
                        runtime_type(&other).map_or("null", PortType::as_str)
                    )));
                }
            }
        }
        (other, PortType::Array) => JsonValue::Array(vec![other]),
        _ => return Err(fail("no coercion registered".to_string())),
    };

    Ok((converted, Some((from, target))))
}

fn parse_number(s: &str) -> Option<JsonValue> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(JsonValue::Number(i.into()));
    }
    let f = trimmed.parse::<f64>().ok()?;
    Number::from_f64(f).map(JsonValue::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_for_matching_and_any() {
        assert_eq!(coerce(json!("x"), PortType::String).unwrap(), (json!("x"), None));
        assert_eq!(coerce(json!([1]), PortType::Any).unwrap(), (json!([1]), None));
        assert_eq!(coerce(JsonValue::Null, PortType::Number).unwrap(), (JsonValue::Null, None));
    }

    #[test]
    fn string_to_number() {
        let (value, applied) = coerce(json!(" 42 "), PortType::Number).unwrap();
        assert_eq!(value, json!(42));
        assert_eq!(applied, Some((PortType::String, PortType::Number)));

        let (value, _) = coerce(json!("2.5"), PortType::Number).unwrap();
        assert_eq!(value, json!(2.5));
    }

    #[test]
    fn unparsable_string_fails() {
        let err = coerce(json!("forty"), PortType::Number).unwrap_err();
        assert_eq!(err.from, PortType::String);
        assert_eq!(err.to, PortType::Number);
        assert!(err.reason.contains("forty"));

        assert!(coerce(json!("NaN"), PortType::Number).is_err());
    }

    #[test]
    fn number_to_canonical_string() {
        assert_eq!(coerce(json!(11), PortType::String).unwrap().0, json!("11"));
        assert_eq!(coerce(json!(1.5), PortType::String).unwrap().0, json!("1.5"));
    }

    #[test]
    fn scalars_wrap_into_arrays() {
        let (value, applied) = coerce(json!({"a": 1}), PortType::Array).unwrap();
        assert_eq!(value, json!([{"a": 1}]));
        assert_eq!(applied, Some((PortType::Object, PortType::Array)));
    }

    #[test]
    fn object_string_round_trip() {
        let (encoded, _) = coerce(json!({"b": 2, "a": 1}), PortType::String).unwrap();
        assert_eq!(encoded, json!(r#"{"a":1,"b":2}"#));

        let (decoded, _) = coerce(encoded, PortType::Object).unwrap();
        assert_eq!(decoded, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn string_must_decode_to_object() {
        assert!(coerce(json!("[1,2]"), PortType::Object).is_err());
        assert!(coerce(json!("{not json"), PortType::Object).is_err());
    }

    #[test]
    fn file_ports_accept_payloads_only() {
        assert_eq!(coerce(json!("aGk="), PortType::File).unwrap(), (json!("aGk="), None));
        assert!(coerce(json!({"data": "aGk="}), PortType::File).is_ok());
        assert!(coerce(json!(3), PortType::File).is_err());
    }

    #[test]
    fn unregistered_runtime_pairs_fail() {
        let err = coerce(json!(true), PortType::String).unwrap_err();
        assert!(err.to_string().contains("no coercion registered"));
        assert!(coerce(json!([1]), PortType::Object).is_err());
    }
}
