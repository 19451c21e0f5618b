//! Middleware infrastructure for ferrapi
//!
//! Every pipeline stage is a [`MiddlewareLayer`]. User middleware is given as a
//! list of [`MiddlewareSpec`] descriptors and mounted innermost, right around the
//! route handler.
//!
//! # Example
//!
//! ```rust
//! use ferrapi_core::middleware::{compose, from_fn, MiddlewareSpec};
//!
//! let stack = compose([
//!     Some(MiddlewareSpec::layer(from_fn("audit", |req, next| next(req)))),
//!     None,
//! ]);
//! assert_eq!(stack.names(), vec!["audit"]);
//! ```

mod layer;
mod negotiation;
mod params;

pub use layer::{
    compose, from_fn, wrap, BoxedNext, FnLayer, LayerStack, MiddlewareLayer, MiddlewareSpec,
    WrapFn, WrapWithArgsFn,
};
pub use negotiation::{
    formats_info, negotiated_format, DecodeRequestLayer, EncodeResponseLayer, FormatInfoLayer,
    FormatParamsLayer, NegotiateLayer,
};
pub use params::{keywordize, nest_params, KeywordParamsLayer, NestedParamsLayer, ParamsLayer};
