//! Request and response coercion
//!
//! Runs the active [`CoercionStrategy`](ferrapi_coerce::CoercionStrategy) of a
//! request against declared schemas. The strategy comes from the request
//! options; without one, values pass through unchanged.

use crate::context::active_coercion;
use crate::error::ApiError;
use crate::middleware::negotiated_format;
use crate::request::Request;
use crate::response::{Body, Response};
use ferrapi_coerce::{CoercionContext, CoercionKind, Schema};
use http::StatusCode;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Where a set of request parameters lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSlot {
    /// Decoded body
    Body,
    /// Urlencoded form parameters
    Form,
    /// Query string parameters
    Query,
    /// Header values
    Header,
    /// Path parameters supplied by the router
    Path,
}

impl ParamSlot {
    /// Name used in the `in` entry of validation failures
    pub fn location(&self) -> &'static str {
        match self {
            ParamSlot::Body => "body-params",
            ParamSlot::Form => "form-params",
            ParamSlot::Query => "query-params",
            ParamSlot::Header => "header-params",
            ParamSlot::Path => "path-params",
        }
    }

    /// Kind of input held by the slot
    pub fn kind(&self) -> CoercionKind {
        match self {
            ParamSlot::Body => CoercionKind::Body,
            _ => CoercionKind::String,
        }
    }

    /// Current value of the slot
    pub fn read(&self, req: &Request) -> Value {
        match self {
            ParamSlot::Body => req.body_params().cloned().unwrap_or(Value::Null),
            ParamSlot::Form => Value::Object(req.form_params().clone()),
            ParamSlot::Query => Value::Object(req.query_params().clone()),
            ParamSlot::Header => Value::Object(req.header_params()),
            ParamSlot::Path => Value::Object(req.path_params_map()),
        }
    }

    /// Input of the slot as seen by coercion against `schema`
    ///
    /// Headers are an open set: only the ones `schema` declares are kept. A
    /// missing body reads as an empty object when `schema` describes one.
    fn input(&self, schema: &Schema, req: &Request) -> Value {
        match (self, schema) {
            (ParamSlot::Header, Schema::Object(object)) => {
                let mut headers = req.header_params();
                if object.is_closed() {
                    headers.retain(|name, _| object.field(name).is_some());
                }
                Value::Object(headers)
            }
            (ParamSlot::Body, Schema::Object(_)) if req.body_params().is_none() => {
                Value::Object(Map::new())
            }
            _ => self.read(req),
        }
    }

    /// Store a coerced value back into the request
    ///
    /// Path, query, form and object body values are also merged into
    /// `params`; header values are kept in [`HeaderParams`].
    pub fn write(&self, req: &mut Request, value: Value) {
        match (self, value) {
            (ParamSlot::Body, value) => {
                if let Value::Object(map) = &value {
                    req.params_mut().extend(map.clone());
                }
                req.set_body_params(Some(value));
            }
            (ParamSlot::Form, Value::Object(map)) => {
                req.params_mut().extend(map.clone());
                req.set_form_params(map);
            }
            (ParamSlot::Query, Value::Object(map)) => {
                req.params_mut().extend(map.clone());
                req.set_query_params(map);
            }
            (ParamSlot::Path, Value::Object(map)) => req.params_mut().extend(map),
            (ParamSlot::Header, Value::Object(map)) => {
                req.extensions_mut().insert(HeaderParams(map));
            }
            _ => {}
        }
    }
}

/// Coerced header values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderParams(pub Map<String, Value>);

/// Coerced header values of `req`, if a header schema was declared
pub fn header_params(req: &Request) -> Option<&Map<String, Value>> {
    req.extensions().get::<HeaderParams>().map(|params| &params.0)
}

/// Coerce the value of `slot` against `schema`
///
/// Returns the value unchanged when coercion is disabled. Failures are
/// `request-validation` errors located at `["request", "<slot>-params"]`.
pub fn coerce_request(
    schema: &Schema,
    slot: ParamSlot,
    kind: CoercionKind,
    req: &Request,
) -> Result<Value, ApiError> {
    let value = slot.input(schema, req);
    let Some(coercion) = active_coercion(req) else {
        return Ok(value);
    };

    let mut ctx = CoercionContext::new(kind);
    if let Some(format) = negotiated_format(req).and_then(|n| n.request.clone()) {
        ctx = ctx.with_format(format);
    }

    coercion
        .coerce(schema, value.clone(), &ctx)
        .map_err(|problems| {
            ApiError::request_validation(
                coercion.name(),
                &["request", slot.location()],
                schema,
                value,
                problems,
            )
        })
}

/// Declared response schemas, by status with an optional default
#[derive(Clone, Default)]
pub struct Responses {
    by_status: HashMap<StatusCode, Schema>,
    default: Option<Schema>,
}

impl Responses {
    /// No declared responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the schema of `status` responses
    pub fn status(mut self, status: StatusCode, schema: impl Into<Schema>) -> Self {
        self.by_status.insert(status, schema.into());
        self
    }

    /// Declare the schema of responses without their own entry
    pub fn default_schema(mut self, schema: impl Into<Schema>) -> Self {
        self.default = Some(schema.into());
        self
    }

    /// Schema for `status`, falling back to the default entry
    pub fn schema_for(&self, status: StatusCode) -> Option<&Schema> {
        self.by_status.get(&status).or(self.default.as_ref())
    }

    /// Whether nothing is declared
    pub fn is_empty(&self) -> bool {
        self.by_status.is_empty() && self.default.is_none()
    }
}

impl fmt::Debug for Responses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut statuses: Vec<u16> = self.by_status.keys().map(StatusCode::as_u16).collect();
        statuses.sort_unstable();
        f.debug_struct("Responses")
            .field("statuses", &statuses)
            .field("default", &self.default.is_some())
            .finish()
    }
}

/// Coerce the body of `response` against the schema declared for its status
///
/// Returns the response unchanged when coercion is disabled, nothing is
/// declared for the status, or the body is not structured. Failures are
/// `response-validation` errors.
pub fn coerce_response(
    req: &Request,
    mut response: Response,
    responses: &Responses,
) -> Result<Response, ApiError> {
    let Some(coercion) = active_coercion(req) else {
        return Ok(response);
    };
    let Some(schema) = responses.schema_for(response.status()) else {
        return Ok(response);
    };
    let Some(value) = response.body().as_value().cloned() else {
        return Ok(response);
    };
    let mut ctx = CoercionContext::new(CoercionKind::Response);
    if let Some(negotiated) = negotiated_format(req) {
        ctx = ctx.with_format(negotiated.response.clone());
    }

    match coercion.coerce(schema, value.clone(), &ctx) {
        Ok(coerced) => {
            response.set_body(Body::Value(coerced));
            Ok(response)
        }
        Err(problems) => Err(ApiError::response_validation(
            coercion.name(),
            schema,
            value,
            problems,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestOptions;
    use bytes::Bytes;
    use ferrapi_coerce::resolve_coercion;
    use serde_json::json;
    use std::sync::Arc;

    fn request(uri: &str, coercion: Option<&str>) -> Request {
        let mut req: Request = http::Request::builder()
            .uri(uri)
            .header("host", "example.com")
            .header("x-tenant", "7")
            .body(Bytes::new())
            .unwrap()
            .into();
        let options = RequestOptions {
            coercion: coercion.map(|name| resolve_coercion(name).unwrap()),
            ..Default::default()
        };
        req.extensions_mut().insert(Arc::new(options));
        req.set_query_params(
            json!({"x": "1", "y": "2"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        req
    }

    fn sum_schema() -> Schema {
        Schema::object()
            .required("x", Schema::Integer)
            .required("y", Schema::Integer)
            .into()
    }

    #[test]
    fn query_params_are_coerced() {
        let req = request("/sum?x=1&y=2", Some("schema"));
        let value = coerce_request(&sum_schema(), ParamSlot::Query, CoercionKind::String, &req).unwrap();
        assert_eq!(value, json!({"x": 1, "y": 2}));
    }

    #[test]
    fn invalid_params_raise_request_validation() {
        let mut req = request("/sum", Some("schema"));
        req.set_query_params(json!({"x": "1", "y": "kaks"}).as_object().cloned().unwrap());

        let err = coerce_request(&sum_schema(), ParamSlot::Query, CoercionKind::String, &req).unwrap_err();
        assert_eq!(err.data["type"], "request-validation");
        assert_eq!(err.data["in"], json!(["request", "query-params"]));
        assert_eq!(err.data["coercion"], "schema");
        assert_eq!(err.data["problems"][0]["path"], json!(["y"]));
        assert_eq!(err.data["problems"][0]["value"], "kaks");
    }

    #[test]
    fn disabled_coercion_passes_values_through() {
        let mut req = request("/sum", None);
        req.set_query_params(json!({"y": "kaks"}).as_object().cloned().unwrap());
        let value = coerce_request(&sum_schema(), ParamSlot::Query, CoercionKind::String, &req).unwrap();
        assert_eq!(value, json!({"y": "kaks"}));

        let responses = Responses::new().status(StatusCode::OK, Schema::Integer);
        let response = coerce_response(&req, Response::ok(json!("nope")), &responses).unwrap();
        assert_eq!(response.body(), &Body::Value(json!("nope")));
    }

    #[test]
    fn header_values_are_stored_separately() {
        for coercion in ["schema", "spec"] {
            let mut req = request("/", Some(coercion));
            let schema: Schema = Schema::object().required("x-tenant", Schema::Integer).into();
            let value = coerce_request(&schema, ParamSlot::Header, CoercionKind::String, &req).unwrap();
            assert_eq!(value, json!({"x-tenant": 7}));

            ParamSlot::Header.write(&mut req, value);
            assert_eq!(header_params(&req).unwrap()["x-tenant"], 7);
        }
    }

    #[test]
    fn open_header_schema_keeps_undeclared_headers() {
        let req = request("/", Some("schema"));
        let schema: Schema = Schema::object()
            .required("x-tenant", Schema::Integer)
            .open()
            .into();
        let value = coerce_request(&schema, ParamSlot::Header, CoercionKind::String, &req).unwrap();
        assert_eq!(value["x-tenant"], 7);
        assert_eq!(value["host"], "example.com");
    }

    #[test]
    fn missing_body_reads_as_empty_object() {
        let req = request("/", Some("schema"));
        let schema: Schema = Schema::object()
            .optional_with_default("page", Schema::Integer, json!(1))
            .into();
        let value = coerce_request(&schema, ParamSlot::Body, CoercionKind::Body, &req).unwrap();
        assert_eq!(value, json!({"page": 1}));

        let mut req = request("/", Some("schema"));
        req.set_body_params(Some(Value::Null));
        let err = coerce_request(&schema, ParamSlot::Body, CoercionKind::Body, &req).unwrap_err();
        assert_eq!(err.data["in"], json!(["request", "body-params"]));
    }

    #[test]
    fn coerced_values_are_merged_into_params() {
        let mut req = request("/sum?x=1&y=2", Some("schema"));
        let query = req.query_params().clone();
        req.params_mut().extend(query);

        let value = coerce_request(&sum_schema(), ParamSlot::Query, CoercionKind::String, &req).unwrap();
        ParamSlot::Query.write(&mut req, value);
        assert_eq!(req.params()["x"], 1);
        assert_eq!(req.query_params()["y"], 2);

        ParamSlot::Body.write(&mut req, json!({"y": 5}));
        assert_eq!(req.params()["y"], 5);
        assert_eq!(req.params()["x"], 1);
    }

    #[test]
    fn response_schema_by_status_with_default() {
        let req = request("/", Some("schema"));
        let total: Schema = Schema::object().required("total", Schema::Integer).into();
        let responses = Responses::new()
            .status(StatusCode::OK, total)
            .default_schema(Schema::object().required("message", Schema::String));

        let ok = coerce_response(&req, Response::ok(json!({"total": 3})), &responses).unwrap();
        assert_eq!(ok.body(), &Body::Value(json!({"total": 3})));

        let err = coerce_response(&req, Response::ok(json!({"total": "3"})), &responses).unwrap_err();
        assert_eq!(err.data["type"], "response-validation");
        assert_eq!(err.data["in"], json!(["response", "body"]));

        let missing = Response::json(StatusCode::NOT_FOUND, json!({}));
        let err = coerce_response(&req, missing, &responses).unwrap_err();
        assert_eq!(err.data["problems"][0]["path"], json!(["message"]));
    }

    #[test]
    fn undeclared_status_and_unstructured_bodies_pass() {
        let req = request("/", Some("schema"));
        let responses = Responses::new().status(StatusCode::OK, Schema::Integer);

        let created = Response::json(StatusCode::CREATED, json!("anything"));
        assert!(coerce_response(&req, created, &responses).is_ok());

        let text = Response::new(StatusCode::OK, Body::Text("3".into()));
        let text = coerce_response(&req, text, &responses).unwrap();
        assert_eq!(text.body(), &Body::Text("3".into()));
    }
}
