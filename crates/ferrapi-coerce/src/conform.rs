//! Schema walker shared by the built-in strategies.

use crate::matcher::Matcher;
use crate::problem::{Problem, Problems};
use crate::schema::{ObjectSchema, Schema};
use crate::strategy::ExtraKeys;
use serde_json::{Map, Value};

/// Walks a value alongside its schema, collecting every problem instead of
/// stopping at the first one.
pub(crate) struct Conformer {
    matcher: Matcher,
    extra_keys: ExtraKeys,
    problems: Vec<Problem>,
    path: Vec<String>,
}

impl Conformer {
    pub(crate) fn new(matcher: Matcher, extra_keys: ExtraKeys) -> Self {
        Self {
            matcher,
            extra_keys,
            problems: Vec::new(),
            path: Vec::new(),
        }
    }

    pub(crate) fn run(mut self, schema: &Schema, value: Value) -> Result<Value, Problems> {
        let conformed = self.walk(schema, value);
        if self.problems.is_empty() {
            Ok(conformed)
        } else {
            Err(Problems::new(self.problems))
        }
    }

    fn report(&mut self, predicate: &str, value: Value) {
        self.problems
            .push(Problem::new(self.path.clone(), predicate, value));
    }

    fn walk(&mut self, schema: &Schema, value: Value) -> Value {
        let value = self.matcher.transform(schema, value);

        match schema {
            Schema::Any => value,
            Schema::String => self.check(schema, value, Value::is_string),
            Schema::Integer => self.check(schema, value, |v| v.is_i64() || v.is_u64()),
            Schema::Number => self.check(schema, value, Value::is_number),
            Schema::Boolean => self.check(schema, value, Value::is_boolean),
            Schema::Enum(allowed) => {
                if allowed.contains(&value) {
                    value
                } else {
                    self.report(schema.predicate(), value.clone());
                    value
                }
            }
            Schema::Pattern(re) => {
                let matches = value.as_str().is_some_and(|s| re.is_match(s));
                if !matches {
                    self.report(schema.predicate(), value.clone());
                }
                value
            }
            Schema::Nullable(inner) => {
                if value.is_null() {
                    value
                } else {
                    self.walk(inner, value)
                }
            }
            Schema::Array(items) => match value {
                Value::Array(values) => Value::Array(
                    values
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| {
                            self.path.push(i.to_string());
                            let conformed = self.walk(items, v);
                            self.path.pop();
                            conformed
                        })
                        .collect(),
                ),
                other => {
                    self.report(schema.predicate(), other.clone());
                    other
                }
            },
            Schema::Map(values) => match value {
                Value::Object(map) => Value::Object(
                    map.into_iter()
                        .map(|(k, v)| {
                            self.path.push(k.clone());
                            let conformed = self.walk(values, v);
                            self.path.pop();
                            (k, conformed)
                        })
                        .collect(),
                ),
                other => {
                    self.report(schema.predicate(), other.clone());
                    other
                }
            },
            Schema::Object(object) => match value {
                Value::Object(map) => Value::Object(self.walk_object(object, map)),
                other => {
                    self.report(schema.predicate(), other.clone());
                    other
                }
            },
        }
    }

    fn check(&mut self, schema: &Schema, value: Value, ok: impl Fn(&Value) -> bool) -> Value {
        if !ok(&value) {
            self.report(schema.predicate(), value.clone());
        }
        value
    }

    fn walk_object(&mut self, object: &ObjectSchema, mut input: Map<String, Value>) -> Map<String, Value> {
        let mut output = Map::new();

        for field in &object.fields {
            self.path.push(field.name.clone());
            match input.remove(&field.name) {
                Some(value) => {
                    let conformed = self.walk(&field.schema, value);
                    output.insert(field.name.clone(), conformed);
                }
                None => match &field.default {
                    Some(default) => {
                        output.insert(field.name.clone(), default.clone());
                    }
                    None if field.required => self.report("required-key", Value::Null),
                    None => {}
                },
            }
            self.path.pop();
        }

        // Whatever is left in `input` was not declared.
        for (key, value) in input {
            match (object.closed, self.extra_keys) {
                (false, _) => {
                    output.insert(key, value);
                }
                (true, ExtraKeys::Reject) => {
                    self.path.push(key);
                    self.report("disallowed-key", value);
                    self.path.pop();
                }
                (true, ExtraKeys::Strip) => {}
            }
        }

        output
    }
}
