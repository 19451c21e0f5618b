//! Coercion strategies.
//!
//! A strategy picks a [`Matcher`] for the kind of input being coerced and decides
//! what happens to undeclared object keys. Two strategies ship with the crate:
//!
//! | Name     | Strategy           | Undeclared keys on closed objects |
//! |----------|--------------------|-----------------------------------|
//! | `schema` | [`SchemaCoercion`] | reported as `disallowed-key`      |
//! | `spec`   | [`SpecCoercion`]   | stripped                          |
//!
//! Custom strategies implement [`CoercionStrategy`] and are passed around as
//! [`Coercion`] handles.

use crate::conform::Conformer;
use crate::matcher::Matcher;
use crate::problem::Problems;
use crate::schema::Schema;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a coercion strategy.
pub type Coercion = Arc<dyn CoercionStrategy>;

/// Which kind of input is being coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoercionKind {
    /// A decoded request body
    Body,
    /// String-valued request parameters (query, path, header, form)
    String,
    /// A response body
    Response,
}

/// What to do with keys a closed object schema does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraKeys {
    /// Report each as a `disallowed-key` problem
    Reject,
    /// Drop them silently
    Strip,
}

/// Context for a single coercion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionContext {
    /// Kind of input
    pub kind: CoercionKind,
    /// Negotiated format of the input, e.g. `application/json`
    pub format: Option<String>,
}

impl CoercionContext {
    /// Context without a negotiated format.
    pub fn new(kind: CoercionKind) -> Self {
        Self { kind, format: None }
    }

    /// Attach the negotiated format.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Whether the format carries typed (JSON-like) values.
    fn typed_format(&self) -> bool {
        match self.format.as_deref() {
            None => true,
            Some(format) => !format.contains("x-www-form-urlencoded"),
        }
    }
}

/// A coercion strategy.
///
/// Implementations only need a name, a matcher selection and an extra-key policy;
/// [`CoercionStrategy::coerce`] walks the value with those settings.
pub trait CoercionStrategy: Send + Sync + 'static {
    /// Identifier reported in validation failures.
    fn name(&self) -> &str;

    /// Matcher used for the given input.
    fn matcher(&self, ctx: &CoercionContext) -> Matcher;

    /// Policy for undeclared keys on closed objects.
    fn extra_keys(&self) -> ExtraKeys;

    /// Conform `value` against `schema`.
    fn coerce(&self, schema: &Schema, value: Value, ctx: &CoercionContext) -> Result<Value, Problems> {
        Conformer::new(self.matcher(ctx), self.extra_keys()).run(schema, value)
    }
}

impl fmt::Debug for dyn CoercionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coercion({})", self.name())
    }
}

/// Per-format response matchers shared by the built-in strategies.
#[derive(Debug, Clone, Default)]
struct ResponseMatchers {
    by_format: HashMap<String, Matcher>,
}

impl ResponseMatchers {
    fn select(&self, ctx: &CoercionContext) -> Matcher {
        ctx.format
            .as_deref()
            .and_then(|format| self.by_format.get(format).copied())
            .unwrap_or(Matcher::Strict)
    }
}

fn request_matcher(ctx: &CoercionContext) -> Matcher {
    match ctx.kind {
        CoercionKind::Body if ctx.typed_format() => Matcher::Json,
        CoercionKind::Body | CoercionKind::String => Matcher::String,
        CoercionKind::Response => Matcher::Strict,
    }
}

/// Closed-world schema coercion.
#[derive(Debug, Clone, Default)]
pub struct SchemaCoercion {
    responses: ResponseMatchers,
}

impl SchemaCoercion {
    /// Create the strategy with strict response coercion for all formats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `matcher` when coercing responses negotiated as `format`.
    pub fn with_response_matcher(mut self, format: impl Into<String>, matcher: Matcher) -> Self {
        self.responses.by_format.insert(format.into(), matcher);
        self
    }
}

impl CoercionStrategy for SchemaCoercion {
    fn name(&self) -> &str {
        "schema"
    }

    fn matcher(&self, ctx: &CoercionContext) -> Matcher {
        match ctx.kind {
            CoercionKind::Response => self.responses.select(ctx),
            _ => request_matcher(ctx),
        }
    }

    fn extra_keys(&self) -> ExtraKeys {
        ExtraKeys::Reject
    }
}

/// Open-world spec coercion: undeclared keys are stripped instead of rejected.
#[derive(Debug, Clone, Default)]
pub struct SpecCoercion {
    responses: ResponseMatchers,
}

impl SpecCoercion {
    /// Create the strategy with strict response coercion for all formats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `matcher` when coercing responses negotiated as `format`.
    pub fn with_response_matcher(mut self, format: impl Into<String>, matcher: Matcher) -> Self {
        self.responses.by_format.insert(format.into(), matcher);
        self
    }
}

impl CoercionStrategy for SpecCoercion {
    fn name(&self) -> &str {
        "spec"
    }

    fn matcher(&self, ctx: &CoercionContext) -> Matcher {
        match ctx.kind {
            CoercionKind::Response => self.responses.select(ctx),
            _ => request_matcher(ctx),
        }
    }

    fn extra_keys(&self) -> ExtraKeys {
        ExtraKeys::Strip
    }
}

/// Error returned for an unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown coercion `{0}`, expected one of: schema, spec")]
pub struct UnknownCoercion(pub String);

/// Resolve a strategy by name.
pub fn resolve_coercion(name: &str) -> Result<Coercion, UnknownCoercion> {
    match name {
        "schema" => Ok(Arc::new(SchemaCoercion::new())),
        "spec" => Ok(Arc::new(SpecCoercion::new())),
        other => Err(UnknownCoercion(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn plus_schema() -> Schema {
        Schema::object()
            .required("x", Schema::Integer)
            .required("y", Schema::Integer)
            .into()
    }

    #[test]
    fn resolves_known_names() {
        assert_eq!(resolve_coercion("schema").unwrap().name(), "schema");
        assert_eq!(resolve_coercion("spec").unwrap().name(), "spec");
        assert_eq!(
            resolve_coercion("malli").unwrap_err(),
            UnknownCoercion("malli".to_string())
        );
    }

    #[test]
    fn string_params_are_parsed() {
        let coercion = SchemaCoercion::new();
        let ctx = CoercionContext::new(CoercionKind::String);
        let value = coercion
            .coerce(&plus_schema(), json!({"x": "1", "y": "2"}), &ctx)
            .unwrap();
        assert_eq!(value, json!({"x": 1, "y": 2}));
    }

    #[test]
    fn json_body_does_not_parse_strings() {
        let coercion = SchemaCoercion::new();
        let ctx = CoercionContext::new(CoercionKind::Body).with_format("application/json");
        let problems = coercion
            .coerce(&plus_schema(), json!({"x": 1, "y": "2"}), &ctx)
            .unwrap_err();
        assert_eq!(problems.0[0].path, vec!["y".to_string()]);
    }

    #[test]
    fn form_body_uses_string_matcher() {
        let coercion = SchemaCoercion::new();
        let ctx = CoercionContext::new(CoercionKind::Body)
            .with_format("application/x-www-form-urlencoded");
        assert_eq!(coercion.matcher(&ctx), Matcher::String);
    }

    #[test]
    fn response_matcher_selected_by_format() {
        let coercion = SpecCoercion::new().with_response_matcher("application/json", Matcher::Json);
        let json_ctx = CoercionContext::new(CoercionKind::Response).with_format("application/json");
        let edn_ctx = CoercionContext::new(CoercionKind::Response).with_format("application/edn");
        assert_eq!(coercion.matcher(&json_ctx), Matcher::Json);
        assert_eq!(coercion.matcher(&edn_ctx), Matcher::Strict);
    }

    #[test]
    fn spec_strips_undeclared_keys() {
        let coercion = SpecCoercion::new();
        let ctx = CoercionContext::new(CoercionKind::Body);
        let value = coercion
            .coerce(&plus_schema(), json!({"x": 1, "y": 2, "z": 3}), &ctx)
            .unwrap();
        assert_eq!(value, json!({"x": 1, "y": 2}));
    }

    proptest! {
        #[test]
        fn valid_string_params_normalize_to_integers(x in any::<i64>(), y in any::<i64>()) {
            let coercion = SchemaCoercion::new();
            let ctx = CoercionContext::new(CoercionKind::String);
            let input = json!({"x": x.to_string(), "y": y.to_string()});

            let coerced = coercion.coerce(&plus_schema(), input, &ctx).unwrap();
            prop_assert_eq!(&coerced, &json!({"x": x, "y": y}));

            // coercing again changes nothing
            let again = coercion.coerce(&plus_schema(), coerced.clone(), &ctx).unwrap();
            prop_assert_eq!(again, coerced);
        }

        #[test]
        fn invalid_params_name_declared_fields(y in "[a-z]{1,8}") {
            let coercion = SchemaCoercion::new();
            let ctx = CoercionContext::new(CoercionKind::String);
            let input = json!({"x": "1", "y": y.clone()});

            let problems = coercion.coerce(&plus_schema(), input, &ctx).unwrap_err();
            prop_assert!(!problems.is_empty());
            for problem in problems.iter() {
                prop_assert_eq!(problem.field(), "y");
                prop_assert_eq!(&problem.value, &json!(y.clone()));
            }
        }
    }
}
