//! Exception dispatch
//!
//! Failures raised anywhere inside the pipeline reach the exception stage as an
//! [`ApiError`]. [`handle`] turns them into responses by looking up a handler in
//! [`ExceptionHandlers`]:
//!
//! 1. a handler registered for the error's symbolic type (aliases resolved first),
//! 2. a handler registered for the error's kind,
//! 3. a handler registered for the nearest ancestor kind,
//! 4. the default handler.
//!
//! Handlers never fail the request: a panicking handler degrades to a generic
//! `500` response.
//!
//! # Example
//!
//! ```rust
//! use ferrapi_core::exception::{ExceptionHandler, ExceptionHandlers, HandlerKey};
//! use ferrapi_core::{ErrorKind, Response};
//! use http::StatusCode;
//! use serde_json::json;
//!
//! let handlers = ExceptionHandlers::default().handler(
//!     ErrorKind::custom("payment"),
//!     ExceptionHandler::new(|error, _data, _req| {
//!         Response::json(StatusCode::PAYMENT_REQUIRED, json!({"message": error.message}))
//!     }),
//! );
//! assert!(handlers.get(&HandlerKey::Default).is_some());
//! ```

use crate::context::is_rethrow;
use crate::error::{get_environment, ApiError, Environment, ErrorKind, ErrorType};
use crate::handler::{BoxFuture, HandlerResult};
use crate::middleware::{BoxedNext, MiddlewareLayer};
use crate::request::Request;
use crate::response::Response;
use futures_util::FutureExt;
use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handler receiving the error, its data with the type resolved, and the request
pub type HandlerFn = Arc<dyn Fn(&ApiError, &Map<String, Value>, &Request) -> Response + Send + Sync>;

/// Handler written against the single-argument contract
pub type LegacyHandlerFn = Arc<dyn Fn(&ApiError) -> Response + Send + Sync>;

/// A registered exception handler
#[derive(Clone)]
pub enum ExceptionHandler {
    /// Three-argument handler
    Full(HandlerFn),
    /// Single-argument handler, warned about on first use
    Legacy {
        /// The wrapped handler
        handler: LegacyHandlerFn,
        /// Set once the deprecation warning was logged
        warned: Arc<AtomicBool>,
    },
}

impl ExceptionHandler {
    /// Wrap a three-argument handler
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ApiError, &Map<String, Value>, &Request) -> Response + Send + Sync + 'static,
    {
        ExceptionHandler::Full(Arc::new(f))
    }

    /// Wrap a handler that only takes the error
    pub fn legacy<F>(f: F) -> Self
    where
        F: Fn(&ApiError) -> Response + Send + Sync + 'static,
    {
        ExceptionHandler::Legacy {
            handler: Arc::new(f),
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the handler
    pub fn invoke(&self, error: &ApiError, data: &Map<String, Value>, req: &Request) -> Response {
        match self {
            ExceptionHandler::Full(handler) => handler(error, data, req),
            ExceptionHandler::Legacy { handler, warned } => {
                if !warned.swap(true, Ordering::Relaxed) {
                    trace_warn!(
                        kind = %error.kind,
                        "exception handler takes only the error; \
                         register a handler taking (error, data, request) instead"
                    );
                }
                handler(error)
            }
        }
    }

    /// Whether this handler uses the single-argument contract
    pub fn is_legacy(&self) -> bool {
        matches!(self, ExceptionHandler::Legacy { .. })
    }
}

impl fmt::Debug for ExceptionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionHandler::Full(_) => f.write_str("ExceptionHandler::Full"),
            ExceptionHandler::Legacy { .. } => f.write_str("ExceptionHandler::Legacy"),
        }
    }
}

/// Lookup key of a registered handler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    /// Symbolic error type
    Type(ErrorType),
    /// Error kind, also matching descendant kinds
    Kind(ErrorKind),
    /// Fallback for everything else
    Default,
}

impl From<ErrorType> for HandlerKey {
    fn from(error_type: ErrorType) -> Self {
        HandlerKey::Type(error_type)
    }
}

impl From<ErrorKind> for HandlerKey {
    fn from(kind: ErrorKind) -> Self {
        HandlerKey::Kind(kind)
    }
}

fn builtin_parent(kind: &ErrorKind) -> Option<ErrorKind> {
    match kind {
        ErrorKind::Root => None,
        ErrorKind::Error => Some(ErrorKind::Root),
        ErrorKind::Io | ErrorKind::Runtime => Some(ErrorKind::Error),
        ErrorKind::Parse | ErrorKind::Validation | ErrorKind::Http | ErrorKind::Custom(_) => {
            Some(ErrorKind::Runtime)
        }
    }
}

/// Parent table of the kind hierarchy
///
/// Built-in kinds have fixed parents. Custom kinds hang under
/// [`ErrorKind::Runtime`] unless registered under another parent.
#[derive(Debug, Clone, Default)]
pub struct KindHierarchy {
    parents: HashMap<ErrorKind, ErrorKind>,
}

impl KindHierarchy {
    /// The built-in hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `kind` under `parent`
    pub fn register(mut self, kind: ErrorKind, parent: ErrorKind) -> Self {
        self.parents.insert(kind, parent);
        self
    }

    /// Direct parent of `kind`
    pub fn parent(&self, kind: &ErrorKind) -> Option<ErrorKind> {
        match self.parents.get(kind) {
            Some(parent) => Some(parent.clone()),
            None => builtin_parent(kind),
        }
    }

    /// `kind` followed by its ancestors, nearest first
    pub fn lineage(&self, kind: &ErrorKind) -> Vec<ErrorKind> {
        let mut lineage = vec![kind.clone()];
        let mut current = kind.clone();
        while let Some(parent) = self.parent(&current) {
            if lineage.contains(&parent) {
                break;
            }
            lineage.push(parent.clone());
            current = parent;
        }
        lineage
    }

    fn merge(&mut self, other: KindHierarchy) {
        self.parents.extend(other.parents);
    }
}

/// Registered exception handlers
#[derive(Debug, Clone)]
pub struct ExceptionHandlers {
    handlers: HashMap<HandlerKey, ExceptionHandler>,
    hierarchy: KindHierarchy,
}

impl Default for ExceptionHandlers {
    /// Built-in handlers for the standard error types
    fn default() -> Self {
        Self::new()
            .handler(HandlerKey::Default, ExceptionHandler::new(safe_handler))
            .handler(
                ErrorType::RequestParsing,
                ExceptionHandler::new(request_parsing_handler),
            )
            .handler(
                ErrorType::RequestValidation,
                ExceptionHandler::new(request_validation_handler),
            )
            .handler(
                ErrorType::ResponseValidation,
                ExceptionHandler::new(response_validation_handler),
            )
            .handler(ErrorKind::Http, ExceptionHandler::new(http_response_handler))
    }
}

impl ExceptionHandlers {
    /// No handlers at all; every error goes to [`safe_handler`]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            hierarchy: KindHierarchy::new(),
        }
    }

    /// Register `handler` under `key`, replacing any previous one
    pub fn handler(mut self, key: impl Into<HandlerKey>, handler: ExceptionHandler) -> Self {
        self.handlers.insert(key.into(), handler);
        self
    }

    /// Place a custom kind under `parent` in the hierarchy
    pub fn kind_parent(mut self, kind: ErrorKind, parent: ErrorKind) -> Self {
        self.hierarchy = self.hierarchy.register(kind, parent);
        self
    }

    /// Handlers of `other` take precedence
    pub fn merge(mut self, other: ExceptionHandlers) -> Self {
        self.handlers.extend(other.handlers);
        self.hierarchy.merge(other.hierarchy);
        self
    }

    /// Handler registered under exactly `key`
    pub fn get(&self, key: &HandlerKey) -> Option<&ExceptionHandler> {
        self.handlers.get(key)
    }

    /// The kind hierarchy used for lookups
    pub fn hierarchy(&self) -> &KindHierarchy {
        &self.hierarchy
    }

    /// Key of the handler that answers `error`
    pub fn resolve(&self, error: &ApiError) -> Option<HandlerKey> {
        let by_type = error
            .error_type()
            .map(HandlerKey::Type)
            .filter(|key| self.handlers.contains_key(key));
        if by_type.is_some() {
            return by_type;
        }

        self.hierarchy
            .lineage(&error.kind)
            .into_iter()
            .map(HandlerKey::Kind)
            .find(|key| self.handlers.contains_key(key))
            .or_else(|| {
                self.handlers
                    .contains_key(&HandlerKey::Default)
                    .then_some(HandlerKey::Default)
            })
    }
}

/// Translate `error` into a response
pub fn handle(error: &ApiError, handlers: &ExceptionHandlers, req: &Request) -> Response {
    let data = error.resolved_data();
    let Some(key) = handlers.resolve(error) else {
        return safe_handler(error, &data, req);
    };
    let Some(handler) = handlers.get(&key) else {
        return safe_handler(error, &data, req);
    };

    match catch_unwind(AssertUnwindSafe(|| handler.invoke(error, &data, req))) {
        Ok(response) => response,
        Err(panic) => {
            trace_error!(
                handler = ?key,
                kind = %error.kind,
                message = %error.message,
                panic = %panic_message(panic.as_ref()),
                "exception handler panicked"
            );
            unknown_exception(error, get_environment())
        }
    }
}

#[derive(Serialize)]
struct UnknownException<'a> {
    #[serde(rename = "type")]
    error_type: &'static str,
    class: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

fn unknown_exception(error: &ApiError, environment: Environment) -> Response {
    let body = UnknownException {
        error_type: "unknown-exception",
        class: error.kind.name(),
        message: (!environment.is_production()).then_some(error.message.as_str()),
    };
    Response::json(
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::to_value(body).unwrap_or(Value::Null),
    )
}

/// Default handler: logs the error and answers `500`
///
/// The message is left out of the body in production.
pub fn safe_handler(error: &ApiError, data: &Map<String, Value>, req: &Request) -> Response {
    trace_error!(
        kind = %error.kind,
        message = %error.message,
        internal = ?error.internal_details(),
        data = ?data,
        method = %req.method(),
        path = %req.path(),
        "unhandled error"
    );
    unknown_exception(error, get_environment())
}

/// `400` carrying the parse failure
pub fn request_parsing_handler(error: &ApiError, data: &Map<String, Value>, _req: &Request) -> Response {
    let mut body = data.clone();
    body.insert("message".to_string(), Value::String(error.message.clone()));
    Response::json(StatusCode::BAD_REQUEST, Value::Object(body))
}

/// `400` carrying the validation data
pub fn request_validation_handler(_error: &ApiError, data: &Map<String, Value>, _req: &Request) -> Response {
    Response::json(StatusCode::BAD_REQUEST, Value::Object(data.clone()))
}

/// `500` carrying the validation data
pub fn response_validation_handler(
    _error: &ApiError,
    data: &Map<String, Value>,
    _req: &Request,
) -> Response {
    Response::json(StatusCode::INTERNAL_SERVER_ERROR, Value::Object(data.clone()))
}

/// The response carried by the error, or the default answer if there is none
pub fn http_response_handler(error: &ApiError, data: &Map<String, Value>, req: &Request) -> Response {
    match error.response() {
        Some(response) => response.clone(),
        None => safe_handler(error, data, req),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Catches failures of the wrapped stages and dispatches them
///
/// Panics inside the wrapped stages are treated as runtime errors. Requests
/// flagged with [`Rethrow`](crate::context::Rethrow) get the raw error back.
#[derive(Clone)]
pub struct ExceptionLayer {
    handlers: Arc<ExceptionHandlers>,
}

impl ExceptionLayer {
    /// Dispatch to `handlers`
    pub fn new(handlers: ExceptionHandlers) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }
}

impl MiddlewareLayer for ExceptionLayer {
    fn name(&self) -> &'static str {
        "exceptions"
    }

    fn call(&self, req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        let handlers = self.handlers.clone();
        let snapshot = req.clone();

        Box::pin(async move {
            let error = match AssertUnwindSafe(next(req)).catch_unwind().await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(error)) => error,
                Err(panic) => ApiError::internal("request handler panicked")
                    .with_internal(panic_message(panic.as_ref())),
            };

            if is_rethrow(&snapshot) {
                return Err(error);
            }
            Ok(handle(&error, &handlers, &snapshot))
        })
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Answers errors that already carry a response with that response
#[derive(Clone, Default)]
pub struct HttpResponseLayer;

impl MiddlewareLayer for HttpResponseLayer {
    fn name(&self) -> &'static str {
        "http-response"
    }

    fn call(&self, req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        Box::pin(async move {
            match next(req).await {
                Err(ApiError {
                    response: Some(response),
                    ..
                }) => Ok(*response),
                other => other,
            }
        })
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::set_rethrow;
    use crate::middleware::wrap;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn request() -> Request {
        http::Request::builder()
            .uri("/pizzas")
            .body(Bytes::new())
            .unwrap()
            .into()
    }

    fn tagged(tag: &'static str) -> ExceptionHandler {
        ExceptionHandler::new(move |_, _, _| Response::ok(json!({ "handler": tag })))
    }

    fn answered_by(handlers: &ExceptionHandlers, error: &ApiError) -> Value {
        handle(error, handlers, &request()).body().as_value().cloned().unwrap()["handler"].clone()
    }

    #[test]
    fn lineage_walks_to_root() {
        let hierarchy = KindHierarchy::new();
        assert_eq!(
            hierarchy.lineage(&ErrorKind::Validation),
            vec![
                ErrorKind::Validation,
                ErrorKind::Runtime,
                ErrorKind::Error,
                ErrorKind::Root
            ]
        );
        assert_eq!(
            hierarchy.lineage(&ErrorKind::custom("payment"))[1],
            ErrorKind::Runtime
        );
    }

    #[test]
    fn registered_parents_and_cycles() {
        let hierarchy = KindHierarchy::new()
            .register(ErrorKind::custom("card-declined"), ErrorKind::custom("payment"))
            .register(ErrorKind::custom("a"), ErrorKind::custom("b"))
            .register(ErrorKind::custom("b"), ErrorKind::custom("a"));

        assert_eq!(
            hierarchy.lineage(&ErrorKind::custom("card-declined"))[..3],
            [
                ErrorKind::custom("card-declined"),
                ErrorKind::custom("payment"),
                ErrorKind::Runtime
            ]
        );
        assert_eq!(
            hierarchy.lineage(&ErrorKind::custom("a")),
            vec![ErrorKind::custom("a"), ErrorKind::custom("b")]
        );
    }

    #[test]
    fn most_specific_kind_wins() {
        let handlers = ExceptionHandlers::new()
            .handler(ErrorKind::Runtime, tagged("runtime"))
            .handler(ErrorKind::Validation, tagged("validation"))
            .handler(HandlerKey::Default, tagged("default"));

        let validation = ApiError::new(ErrorKind::Validation, "bad");
        let parse = ApiError::new(ErrorKind::Parse, "bad");
        let io = ApiError::new(ErrorKind::Io, "disk");

        assert_eq!(answered_by(&handlers, &validation), "validation");
        assert_eq!(answered_by(&handlers, &parse), "runtime");
        assert_eq!(answered_by(&handlers, &io), "default");
    }

    #[test]
    fn type_beats_kind_and_aliases_resolve() {
        let handlers = ExceptionHandlers::new()
            .handler(ErrorKind::Validation, tagged("kind"))
            .handler(ErrorType::RequestValidation, tagged("type"));

        let error =
            ApiError::new(ErrorKind::Validation, "bad").with_data("type", json!("schema.validation"));
        assert_eq!(handlers.resolve(&error), Some(HandlerKey::Type(ErrorType::RequestValidation)));
        assert_eq!(answered_by(&handlers, &error), "type");
    }

    #[test]
    fn handlers_see_resolved_type() {
        let handlers = ExceptionHandlers::new().handler(
            HandlerKey::Default,
            ExceptionHandler::new(|_, data, _| Response::ok(Value::Object(data.clone()))),
        );
        let error = ApiError::internal("x").with_data("type", json!("middleware.request-parsing"));
        let response = handle(&error, &handlers, &request());
        assert_eq!(response.body().as_value().unwrap()["type"], "request-parsing");
    }

    #[test]
    fn unregistered_errors_fall_back_to_safe_handler() {
        let error = ApiError::new(ErrorKind::custom("payment"), "no funds");
        let response = handle(&error, &ExceptionHandlers::new(), &request());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body().as_value().unwrap()["type"], "unknown-exception");
        assert_eq!(response.body().as_value().unwrap()["class"], "payment");
    }

    #[test]
    fn production_masks_message() {
        let error = ApiError::internal("secret connection string");
        let dev = unknown_exception(&error, Environment::Development);
        let prod = unknown_exception(&error, Environment::Production);
        assert_eq!(dev.body().as_value().unwrap()["message"], "secret connection string");
        assert!(prod.body().as_value().unwrap().get("message").is_none());
    }

    #[test]
    fn panicking_handler_degrades_to_500() {
        let handlers = ExceptionHandlers::new().handler(
            HandlerKey::Default,
            ExceptionHandler::new(|_, _, _| panic!("handler bug")),
        );
        let response = handle(&ApiError::internal("x"), &handlers, &request());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body().as_value().unwrap()["type"], "unknown-exception");
    }

    #[test]
    fn legacy_handler_called_with_error_only() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let legacy = ExceptionHandler::legacy(move |error| {
            seen.fetch_add(1, Ordering::SeqCst);
            Response::ok(json!({ "message": error.message }))
        });
        assert!(legacy.is_legacy());

        let handlers = ExceptionHandlers::new().handler(HandlerKey::Default, legacy);
        for _ in 0..2 {
            let response = handle(&ApiError::internal("old style"), &handlers, &request());
            assert_eq!(response.body().as_value().unwrap()["message"], "old style");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        if let Some(ExceptionHandler::Legacy { warned, .. }) = handlers.get(&HandlerKey::Default) {
            assert!(warned.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn default_handlers_cover_standard_types() {
        let handlers = ExceptionHandlers::default();
        let parsing = ApiError::request_parsing("application/json", "EOF");
        let response = handle(&parsing, &handlers, &request());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body().as_value().unwrap()["format"], "application/json");

        let response = handle(&ApiError::forbidden("nope"), &handlers, &request());
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn merge_is_right_biased() {
        let left = ExceptionHandlers::new().handler(HandlerKey::Default, tagged("left"));
        let right = ExceptionHandlers::new().handler(HandlerKey::Default, tagged("right"));
        let merged = left.merge(right);
        assert_eq!(answered_by(&merged, &ApiError::internal("x")), "right");
    }

    fn failing(error: ApiError) -> BoxedNext {
        Arc::new(move |_req: Request| {
            let error = error.clone();
            Box::pin(async move { Err::<Response, _>(error) }) as BoxFuture<HandlerResult>
        })
    }

    #[tokio::test]
    async fn layer_translates_errors() {
        let layer = ExceptionLayer::new(ExceptionHandlers::default());
        let handler = wrap(Box::new(layer), failing(ApiError::internal("boom")));
        let response = handler(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn layer_catches_panics() {
        let layer = ExceptionLayer::new(ExceptionHandlers::default());
        fn explode() -> HandlerResult {
            panic!("route bug")
        }
        let panicking: BoxedNext =
            Arc::new(|_req: Request| Box::pin(async move { explode() }) as BoxFuture<HandlerResult>);
        let response = wrap(Box::new(layer), panicking)(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn rethrow_returns_raw_error() {
        let layer = ExceptionLayer::new(ExceptionHandlers::default());
        let handler = wrap(Box::new(layer), failing(ApiError::internal("boom")));

        let mut req = request();
        set_rethrow(&mut req);
        let error = handler(req).await.unwrap_err();
        assert_eq!(error.message, "boom");
    }

    #[tokio::test]
    async fn http_response_layer_unwraps_carried_response() {
        let handler = wrap(Box::new(HttpResponseLayer), failing(ApiError::not_found("no pizza")));
        let response = handler(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_value().unwrap()["message"], "no pizza");

        let handler = wrap(Box::new(HttpResponseLayer), failing(ApiError::internal("boom")));
        assert!(handler(request()).await.is_err());
    }
}
