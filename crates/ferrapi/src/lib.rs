//! # ferrapi
//!
//! Data-driven request pipelines for Rust HTTP handlers.
//!
//! A route handler is an async function from [`Request`] to a response. ferrapi
//! wraps it in a fixed chain of stages built from a single [`Options`] value:
//! query and form parameter parsing, content negotiation, body decoding and
//! encoding, schema coercion, dependency injection and exception dispatch.
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrapi::prelude::*;
//! use serde_json::json;
//!
//! let plus = Endpoint::new()
//!     .query(
//!         Schema::object()
//!             .required("x", Schema::Integer)
//!             .required("y", Schema::Integer),
//!     )
//!     .handler(handler_fn(|req: Request| async move {
//!         let x = req.query_params()["x"].as_i64().unwrap_or_default();
//!         let y = req.query_params()["y"].as_i64().unwrap_or_default();
//!         Ok::<_, ApiError>(json!({ "total": x + y }))
//!     }));
//!
//! let pipeline = assemble(plus, &Options::default()).unwrap();
//! assert_eq!(pipeline.stage_names().first(), Some(&"params"));
//! ```
//!
//! ## Configuration
//!
//! Options can also be read from data. Keys left out keep their defaults and
//! `null` switches a stage off:
//!
//! ```rust
//! use ferrapi::Options;
//! use serde_json::json;
//!
//! let options = Options::from_value(json!({
//!     "coercion": "spec",
//!     "formats": {"default-format": "application/json"},
//!     "exceptions": null,
//! }))
//! .unwrap();
//! assert!(options.exceptions().is_none());
//! ```
//!
//! ## Logging
//!
//! Unhandled errors and pipeline assembly are reported through `tracing`.
//! Install any subscriber, e.g. `tracing_subscriber::fmt().init()`, to see them.
//! Disable the default `tracing` feature to compile the events out.

// Re-export core functionality
pub use ferrapi_core::*;

/// Schema coercion
pub use ferrapi_coerce as coerce;
pub use ferrapi_coerce::{
    resolve_coercion, Coercion, CoercionContext, CoercionKind, CoercionStrategy, Problem,
    Problems, Schema,
};

// Re-export commonly used crates
pub use serde_json;
pub use tracing;

/// Prelude module - import everything you need with `use ferrapi::prelude::*`
pub mod prelude {
    pub use ferrapi_core::{
        assemble,
        get_components,
        get_options,
        handler_fn,
        // Error handling
        ApiError,
        // Response types
        Body,
        // Dependency injection
        Components,
        Endpoint,
        ErrorKind,
        ErrorType,
        // Exception dispatch
        ExceptionHandler,
        ExceptionHandlers,
        FormatsConfig,
        Handler,
        HandlerKey,
        IntoResponse,
        // Configuration
        Options,
        Pipeline,
        // Request context
        Request,
        Response,
        Responses,
        Result,
    };

    // Middleware
    pub use ferrapi_core::middleware::{compose, from_fn, MiddlewareLayer, MiddlewareSpec};

    // Schemas
    pub use ferrapi_coerce::{ObjectSchema, Schema};

    pub use serde_json::{json, Value};
}
