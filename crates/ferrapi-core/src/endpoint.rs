//! Per-endpoint coercion
//!
//! An [`Endpoint`] declares schemas for the parameters and responses of one
//! route. Wrapping a handler with it coerces each declared parameter slot,
//! writes the coerced values back into the request, runs the handler and then
//! coerces the response by status.
//!
//! # Example
//!
//! ```rust
//! use ferrapi_core::{handler_fn, ApiError, Endpoint, Request, Responses};
//! use ferrapi_coerce::Schema;
//! use http::StatusCode;
//! use serde_json::json;
//!
//! let plus = Endpoint::new()
//!     .query(Schema::object().required("x", Schema::Integer).required("y", Schema::Integer))
//!     .responses(Responses::new().status(
//!         StatusCode::OK,
//!         Schema::object().required("total", Schema::Integer),
//!     ))
//!     .handler(handler_fn(|req: Request| async move {
//!         let x = req.query_params()["x"].as_i64().unwrap_or_default();
//!         let y = req.query_params()["y"].as_i64().unwrap_or_default();
//!         Ok::<_, ApiError>(json!({ "total": x + y }))
//!     }));
//! ```

use crate::coercion::{coerce_request, coerce_response, ParamSlot, Responses};
use crate::handler::{BoxFuture, Handler, HandlerResult};
use crate::request::Request;
use ferrapi_coerce::Schema;
use std::sync::Arc;

/// Declared schemas of one route
#[derive(Clone, Default, Debug)]
pub struct Endpoint {
    params: Vec<(ParamSlot, Schema)>,
    responses: Responses,
}

impl Endpoint {
    /// Nothing declared
    pub fn new() -> Self {
        Self::default()
    }

    fn param(mut self, slot: ParamSlot, schema: Schema) -> Self {
        self.params.retain(|(existing, _)| *existing != slot);
        self.params.push((slot, schema));
        self
    }

    /// Schema of the path parameters
    pub fn path(self, schema: impl Into<Schema>) -> Self {
        self.param(ParamSlot::Path, schema.into())
    }

    /// Schema of the query parameters
    pub fn query(self, schema: impl Into<Schema>) -> Self {
        self.param(ParamSlot::Query, schema.into())
    }

    /// Schema of the headers; undeclared headers are ignored
    pub fn headers(self, schema: impl Into<Schema>) -> Self {
        self.param(ParamSlot::Header, schema.into())
    }

    /// Schema of the urlencoded form parameters
    pub fn form(self, schema: impl Into<Schema>) -> Self {
        self.param(ParamSlot::Form, schema.into())
    }

    /// Schema of the decoded body
    pub fn body(self, schema: impl Into<Schema>) -> Self {
        self.param(ParamSlot::Body, schema.into())
    }

    /// Response schemas by status
    pub fn responses(mut self, responses: Responses) -> Self {
        self.responses = responses;
        self
    }

    /// Coerce `req` in place, slot by slot
    ///
    /// Slots are processed in declaration order; the first failing slot
    /// aborts with its `request-validation` error.
    pub fn coerce(&self, req: &mut Request) -> crate::error::Result<()> {
        for (slot, schema) in &self.params {
            let value = coerce_request(schema, *slot, slot.kind(), req)?;
            slot.write(req, value);
        }
        Ok(())
    }

    /// Wrap `handler` with request and response coercion
    pub fn handler(self, handler: Handler) -> Handler {
        let endpoint = Arc::new(self);
        Arc::new(move |mut req: Request| {
            let endpoint = endpoint.clone();
            let handler = handler.clone();
            Box::pin(async move {
                endpoint.coerce(&mut req)?;
                let snapshot = req.clone();
                let response = handler(req).await?;
                coerce_response(&snapshot, response, &endpoint.responses)
            }) as BoxFuture<HandlerResult>
        })
    }
}
