//! # ferrapi Core
//!
//! The request pipeline of ferrapi: a route handler wrapped in a fixed chain of
//! stages for parameter parsing, format negotiation, body decoding and
//! encoding, dependency injection, schema coercion and exception dispatch.
//!
//! This crate is not meant to be used directly. Use `ferrapi` instead.

#[macro_use]
mod tracing_macros;

pub mod coercion;
pub mod context;
mod endpoint;
mod error;
pub mod exception;
pub mod format;
mod handler;
pub mod middleware;
pub mod options;
mod pipeline;
mod request;
mod response;

// Public API
pub use coercion::{coerce_request, coerce_response, header_params, ParamSlot, Responses};
pub use context::{
    active_coercion, get_components, get_options, is_rethrow, set_rethrow, CoercionLayer,
    Components, RequestOptions, Rethrow,
};
pub use endpoint::Endpoint;
pub use error::{
    get_environment, ApiError, ConfigError, Environment, ErrorKind, ErrorType, Result,
    TYPE_ALIASES,
};
pub use exception::{handle, ExceptionHandler, ExceptionHandlers, HandlerKey, KindHierarchy};
pub use format::{
    configure, is_encodable, Codec, CodecError, Formats, FormatsConfig, FormatsInfo,
    FormatsOption, NegotiatedFormat,
};
pub use handler::{handler_fn, BoxFuture, Handler, HandlerResult};
pub use middleware::{compose, from_fn, LayerStack, MiddlewareLayer, MiddlewareSpec};
pub use options::{Options, OptionsBuilder, OptionsConfig, Setting};
pub use pipeline::{assemble, Pipeline};
pub use request::Request;
pub use response::{Body, IntoResponse, Response};
