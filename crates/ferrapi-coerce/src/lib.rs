//! # ferrapi Coercion
//!
//! Schema coercion for the ferrapi request pipeline. A [`Schema`] describes the
//! expected shape of a value; a [`CoercionStrategy`] conforms raw input against it,
//! normalizing loosely typed data (query strings, JSON bodies) on the way.
//!
//! ## Example
//!
//! ```rust
//! use ferrapi_coerce::{resolve_coercion, CoercionContext, CoercionKind, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::object()
//!     .required("x", Schema::Integer)
//!     .optional_with_default("y", Schema::Integer, json!(0));
//!
//! let coercion = resolve_coercion("schema").unwrap();
//! let ctx = CoercionContext::new(CoercionKind::String);
//!
//! let value = coercion.coerce(&schema.into(), json!({"x": "1"}), &ctx).unwrap();
//! assert_eq!(value, json!({"x": 1, "y": 0}));
//! ```
//!
//! ## Problem Format
//!
//! Failed coercion yields [`Problems`], which serialize as a list:
//!
//! ```json
//! [
//!   {"path": ["y"], "predicate": "integer?", "value": "kaks"}
//! ]
//! ```

mod conform;
mod matcher;
mod problem;
mod schema;
mod strategy;

pub use matcher::Matcher;
pub use problem::{Problem, Problems};
pub use schema::{Field, ObjectSchema, Schema};
pub use strategy::{
    resolve_coercion, Coercion, CoercionContext, CoercionKind, CoercionStrategy, ExtraKeys,
    SchemaCoercion, SpecCoercion, UnknownCoercion,
};

/// Prelude module for coercion
pub mod prelude {
    pub use crate::problem::{Problem, Problems};
    pub use crate::schema::{ObjectSchema, Schema};
    pub use crate::strategy::{Coercion, CoercionContext, CoercionKind, CoercionStrategy};
}
