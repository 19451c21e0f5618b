//! Coercion matchers.
//!
//! A matcher decides how a raw leaf value is transformed before it is checked
//! against a schema. Values decoded from JSON already carry types, while values
//! taken from query strings or path segments are always strings.

use crate::schema::Schema;
use serde_json::{Number, Value};

/// Leaf transformation applied before schema checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Matcher {
    /// Typed input (JSON-like bodies): integral floats become integers,
    /// integers are accepted where numbers are expected.
    #[default]
    Json,
    /// String input (query, path, header and form params): numbers and booleans
    /// are parsed from strings, single values are wrapped into arrays.
    String,
    /// No transformation.
    Strict,
}

impl Matcher {
    /// Transform `value` towards `schema`. The result is still checked by the caller.
    pub fn transform(&self, schema: &Schema, value: Value) -> Value {
        match self {
            Matcher::Strict => value,
            Matcher::Json => json_transform(schema, value),
            Matcher::String => string_transform(schema, value),
        }
    }
}

fn json_transform(schema: &Schema, value: Value) -> Value {
    match (schema, value) {
        (Schema::Integer, Value::Number(n)) => integral(&n).map_or(Value::Number(n), Value::from),
        (_, value) => value,
    }
}

fn string_transform(schema: &Schema, value: Value) -> Value {
    match (schema, value) {
        (Schema::Integer, Value::String(s)) => {
            let trimmed = s.trim();
            match (trimmed.parse::<i64>(), trimmed.parse::<u64>()) {
                (Ok(n), _) => Value::from(n),
                (_, Ok(n)) => Value::from(n),
                _ => Value::String(s),
            }
        }
        (Schema::Number, Value::String(s)) => match s.trim().parse::<f64>().ok().and_then(Number::from_f64) {
            Some(n) => Value::Number(n),
            None => Value::String(s),
        },
        (Schema::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        (Schema::Nullable(_), Value::String(s)) if s.is_empty() => Value::Null,
        (Schema::Array(_), Value::Array(items)) => Value::Array(items),
        (Schema::Array(_), Value::Null) => Value::Null,
        (Schema::Array(_), scalar) => Value::Array(vec![scalar]),
        (_, value) => json_transform(schema, value),
    }
}

// Integers already exact (`i64` or `u64`) are kept as they are.
fn integral(n: &Number) -> Option<i64> {
    if n.is_i64() || n.is_u64() {
        return None;
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
