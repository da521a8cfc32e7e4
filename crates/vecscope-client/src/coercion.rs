//! Coercion of raw filter input into typed values.
//!
//! Filter values arrive as text typed into the UI. Before they reach the
//! compiler they are converted to the value domain of the attribute they
//! target, using either a declared type name (`"[]int32"`, `"uuid"`, ...) or
//! the type inferred by attribute discovery.
//!
//! Coercion never fails: input that cannot be parsed for a numeric type is
//! passed through as a string and callers must tolerate the mismatch.

use std::fmt;

use vecscope_common::Value;

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Field type driving coercion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Uuid,
    Datetime,
    /// Integer of any width; input is parsed as a float and floored.
    Int,
    Float,
    /// Numeric type of unknown precision, as produced by discovery.
    Number,
    Bool,
    /// Objects and mixed-type fields; input stays a raw string.
    Object,
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a declared type name such as `int32`, `[]string` or `datetime`.
    pub fn parse(name: &str) -> Option<FieldType> {
        let name = name.trim();
        if let Some(inner) = name.strip_prefix("[]") {
            return FieldType::parse(inner).map(|t| FieldType::Array(Box::new(t)));
        }

        let ty = match name.to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => FieldType::String,
            "uuid" => FieldType::Uuid,
            "datetime" | "date" | "timestamp" => FieldType::Datetime,
            "int" | "integer" | "int8" | "int16" | "int32" | "int64" | "uint" | "uint8"
            | "uint16" | "uint32" | "uint64" | "i32" | "i64" | "u32" | "u64" => FieldType::Int,
            "float" | "float32" | "float64" | "f32" | "f64" | "double" => FieldType::Float,
            "number" => FieldType::Number,
            "bool" | "boolean" => FieldType::Bool,
            "object" | "mixed" | "json" => FieldType::Object,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, FieldType::Array(_))
    }

    /// Scalar type used for individual elements (`[]int32` → `int`).
    pub fn element_type(&self) -> &FieldType {
        match self {
            FieldType::Array(inner) => inner.element_type(),
            other => other,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Uuid => f.write_str("uuid"),
            FieldType::Datetime => f.write_str("datetime"),
            FieldType::Int => f.write_str("int"),
            FieldType::Float => f.write_str("float"),
            FieldType::Number => f.write_str("number"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::Object => f.write_str("object"),
            FieldType::Array(inner) => write!(f, "[]{inner}"),
        }
    }
}

fn is_null_literal(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("null")
}

/// Coerce raw input for a field of the given type.
///
/// * `"null"` (any case) is the null value.
/// * Unknown and object types keep the raw string.
/// * Comma-separated input becomes an array of individually coerced tokens.
/// * A single value for an array type yields one scalar, for containment
///   checks.
pub fn coerce(raw: &str, field_type: Option<&FieldType>) -> Value {
    if is_null_literal(raw) {
        return Value::Null;
    }

    let element = match field_type.map(FieldType::element_type) {
        None | Some(FieldType::Object) => return Value::String(raw.to_string()),
        Some(element) => element,
    };

    if raw.contains(',') {
        let items = raw
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| coerce_scalar(token, element))
            .collect();
        return Value::Array(items);
    }

    coerce_scalar(raw, element)
}

/// Coerce raw input given a declared type name.
///
/// ```rust
/// use vecscope_client::coercion::parse_value_for_field_type;
/// use vecscope_common::Value;
///
/// assert_eq!(
///     parse_value_for_field_type("1, 2, 3", "[]int32"),
///     Value::from(vec![1i64, 2, 3])
/// );
/// ```
pub fn parse_value_for_field_type(raw: &str, type_name: &str) -> Value {
    coerce(raw, FieldType::parse(type_name).as_ref())
}

fn coerce_scalar(token: &str, element: &FieldType) -> Value {
    if is_null_literal(token) {
        return Value::Null;
    }

    match element {
        FieldType::Int => match parse_number(token) {
            Some(n) => floor_to_int(n),
            None => Value::String(token.to_string()),
        },
        FieldType::Float => match parse_number(token) {
            Some(n) => Value::Float(n),
            None => Value::String(token.to_string()),
        },
        FieldType::Number => match parse_number(token) {
            Some(n) => number_value(n),
            None => Value::String(token.to_string()),
        },
        FieldType::Bool => Value::Bool(parse_bool(token)),
        FieldType::String | FieldType::Uuid | FieldType::Datetime | FieldType::Object => {
            Value::String(token.to_string())
        }
        FieldType::Array(inner) => coerce_scalar(token, inner.element_type()),
    }
}

fn parse_number(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}

/// Floor to an integer; values outside the i64 range stay floats.
fn floor_to_int(n: f64) -> Value {
    let floored = n.floor();
    if floored >= i64::MIN as f64 && floored < i64::MAX as f64 {
        Value::Int(floored as i64)
    } else {
        Value::Float(floored)
    }
}

fn parse_bool(token: &str) -> bool {
    let token = token.trim();
    if token.eq_ignore_ascii_case("true") || token == "1" {
        true
    } else if token.eq_ignore_ascii_case("false") || token == "0" {
        false
    } else {
        !token.is_empty()
    }
}

/// Re-coerce an already typed value.
///
/// Strings go through [`coerce`]; other values are normalized to the target
/// type so that coercion is idempotent.
pub fn coerce_value(value: &Value, field_type: Option<&FieldType>) -> Value {
    let Some(field_type) = field_type else {
        return value.clone();
    };
    let element = field_type.element_type();

    match value {
        Value::String(raw) => coerce(raw, Some(field_type)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(token) => coerce_scalar(token, element),
                    other => normalize_scalar(other, element),
                })
                .collect(),
        ),
        other => normalize_scalar(other, element),
    }
}

fn normalize_scalar(value: &Value, element: &FieldType) -> Value {
    match (element, value) {
        (_, Value::Null) => Value::Null,
        (FieldType::Int, Value::Float(f)) => floor_to_int(*f),
        (FieldType::Float, Value::Int(i)) => Value::Float(*i as f64),
        (FieldType::Number, Value::Float(f)) => number_value(*f),
        (FieldType::Bool, Value::Int(i)) => Value::Bool(*i != 0),
        (FieldType::String | FieldType::Uuid | FieldType::Datetime, v)
            if !matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_)) =>
        {
            Value::String(v.to_display_string())
        }
        (_, v) => v.clone(),
    }
}
