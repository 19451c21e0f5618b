//! Schema model used by the coercion strategies.
//!
//! Schemas are plain data: they can be cloned freely, shared between routes and
//! described as JSON for error payloads.

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// Expected shape of a value.
#[derive(Clone)]
pub enum Schema {
    /// Accepts any value unchanged
    Any,
    /// A string
    String,
    /// A whole number
    Integer,
    /// Any number
    Number,
    /// `true` or `false`
    Boolean,
    /// One of the listed values
    Enum(Vec<Value>),
    /// A string matching the regular expression
    Pattern(Arc<Regex>),
    /// `null` or a value matching the inner schema
    Nullable(Box<Schema>),
    /// An array of values matching the inner schema
    Array(Box<Schema>),
    /// A map with arbitrary keys whose values match the inner schema
    Map(Box<Schema>),
    /// An object with declared fields
    Object(ObjectSchema),
}

impl Schema {
    /// Start building an object schema.
    pub fn object() -> ObjectSchema {
        ObjectSchema::new()
    }

    /// Array of `items`.
    pub fn array(items: Schema) -> Self {
        Schema::Array(Box::new(items))
    }

    /// Nullable `inner`.
    pub fn nullable(inner: Schema) -> Self {
        Schema::Nullable(Box::new(inner))
    }

    /// Map of string keys to `values`.
    pub fn map(values: Schema) -> Self {
        Schema::Map(Box::new(values))
    }

    /// One of the given values.
    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Schema::Enum(values.into_iter().map(Into::into).collect())
    }

    /// String matching `pattern`.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Schema::Pattern(Arc::new(Regex::new(pattern)?)))
    }

    /// Name of the predicate a value must satisfy to match this schema.
    pub fn predicate(&self) -> &'static str {
        match self {
            Schema::Any => "any?",
            Schema::String => "string?",
            Schema::Integer => "integer?",
            Schema::Number => "number?",
            Schema::Boolean => "boolean?",
            Schema::Enum(_) => "enum?",
            Schema::Pattern(_) => "re-matches?",
            Schema::Nullable(inner) => inner.predicate(),
            Schema::Array(_) => "sequential?",
            Schema::Map(_) | Schema::Object(_) => "map?",
        }
    }

    /// Describe the schema as JSON, in a JSON-Schema like layout.
    pub fn describe(&self) -> Value {
        match self {
            Schema::Any => json!({}),
            Schema::String => json!({"type": "string"}),
            Schema::Integer => json!({"type": "integer"}),
            Schema::Number => json!({"type": "number"}),
            Schema::Boolean => json!({"type": "boolean"}),
            Schema::Enum(values) => json!({"enum": values}),
            Schema::Pattern(re) => json!({"type": "string", "pattern": re.as_str()}),
            Schema::Nullable(inner) => {
                let mut described = inner.describe();
                if let Value::Object(map) = &mut described {
                    map.insert("nullable".to_string(), Value::Bool(true));
                }
                described
            }
            Schema::Array(items) => json!({"type": "array", "items": items.describe()}),
            Schema::Map(values) => {
                json!({"type": "object", "additionalProperties": values.describe()})
            }
            Schema::Object(object) => object.describe(),
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema({})", self.describe())
    }
}

impl Serialize for Schema {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.describe().serialize(serializer)
    }
}

impl From<ObjectSchema> for Schema {
    fn from(object: ObjectSchema) -> Self {
        Schema::Object(object)
    }
}

/// A declared object field.
#[derive(Debug, Clone)]
pub struct Field {
    /// Key in the object
    pub name: String,
    /// Schema of the value
    pub schema: Schema,
    /// Whether the key must be present
    pub required: bool,
    /// Value inserted when an optional key is missing
    pub default: Option<Value>,
}

/// Object schema with declared fields.
///
/// Objects are closed by default: undeclared keys are reported by strategies that
/// reject extra keys. Call [`ObjectSchema::open`] to accept them.
#[derive(Debug, Clone)]
pub struct ObjectSchema {
    pub(crate) fields: Vec<Field>,
    pub(crate) closed: bool,
}

impl Default for ObjectSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectSchema {
    /// Create an empty, closed object schema.
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            closed: true,
        }
    }

    /// Add a required field.
    pub fn required(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.push(Field {
            name: name.into(),
            schema,
            required: true,
            default: None,
        });
        self
    }

    /// Add an optional field.
    pub fn optional(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.push(Field {
            name: name.into(),
            schema,
            required: false,
            default: None,
        });
        self
    }

    /// Add an optional field that falls back to `default` when missing.
    pub fn optional_with_default(
        mut self,
        name: impl Into<String>,
        schema: Schema,
        default: Value,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            schema,
            required: false,
            default: Some(default),
        });
        self
    }

    /// Accept undeclared keys.
    pub fn open(mut self) -> Self {
        self.closed = false;
        self
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a declared field.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether undeclared keys are rejected.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut described = field.schema.describe();
            if let (Some(default), Value::Object(map)) = (&field.default, &mut described) {
                map.insert("default".to_string(), default.clone());
            }
            properties.insert(field.name.clone(), described);
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": !self.closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_object_lists_required_fields() {
        let schema: Schema = Schema::object()
            .required("x", Schema::Integer)
            .optional_with_default("y", Schema::Integer, json!(0))
            .into();

        let described = schema.describe();
        assert_eq!(described["type"], "object");
        assert_eq!(described["required"], json!(["x"]));
        assert_eq!(described["properties"]["y"]["default"], 0);
        assert_eq!(described["additionalProperties"], false);
    }

    #[test]
    fn nullable_predicate_uses_inner_schema() {
        assert_eq!(Schema::nullable(Schema::Integer).predicate(), "integer?");
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(Schema::pattern("(").is_err());
    }

    #[test]
    fn serializes_as_description() {
        let json = serde_json::to_value(Schema::array(Schema::String)).unwrap();
        assert_eq!(json, json!({"type": "array", "items": {"type": "string"}}));
    }
}
