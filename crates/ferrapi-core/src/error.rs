//! Error types for ferrapi
//!
//! Every failure raised inside the pipeline is an [`ApiError`]. An error has a
//! [`ErrorKind`] (what went wrong, arranged in a hierarchy) and an arbitrary JSON
//! data payload. The payload's `type` entry is the symbolic [`ErrorType`] the
//! exception dispatcher looks up first.

use crate::response::Response;
use ferrapi_coerce::{Problems, Schema, UnknownCoercion};
use http::StatusCode;
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

/// Result type alias for ferrapi operations
pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Symbolic error type carried in the `type` entry of an error's data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Request parameters or body did not match their schema
    RequestValidation,
    /// Request body could not be decoded
    RequestParsing,
    /// Response body did not match its declared schema
    ResponseValidation,
    /// Application-defined type
    Custom(Cow<'static, str>),
}

/// Legacy type identifiers and the canonical identifiers they stand for.
pub const TYPE_ALIASES: &[(&str, &str)] = &[
    ("schema.validation", "request-validation"),
    ("middleware.request-parsing", "request-parsing"),
    ("middleware.response-validation", "response-validation"),
];

impl ErrorType {
    /// Application-defined type.
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        ErrorType::Custom(name.into())
    }

    /// Canonical identifier.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorType::RequestValidation => "request-validation",
            ErrorType::RequestParsing => "request-parsing",
            ErrorType::ResponseValidation => "response-validation",
            ErrorType::Custom(name) => name,
        }
    }

    /// Parse an identifier, resolving legacy aliases to their canonical type.
    pub fn resolve(id: &str) -> Self {
        let id = TYPE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == id)
            .map_or(id, |(_, canonical)| *canonical);
        match id {
            "request-validation" => ErrorType::RequestValidation,
            "request-parsing" => ErrorType::RequestParsing,
            "response-validation" => ErrorType::ResponseValidation,
            other => ErrorType::Custom(Cow::Owned(other.to_string())),
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an error, the node it occupies in the kind hierarchy.
///
/// The built-in hierarchy is:
///
/// ```text
/// Root
/// └── Error
///     ├── Io
///     └── Runtime
///         ├── Parse
///         ├── Validation
///         ├── Http
///         └── Custom(..)   (unless registered under another parent)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Top of the hierarchy
    Root,
    /// Any failure
    Error,
    /// I/O and transport failures
    Io,
    /// Failures raised while handling a request
    Runtime,
    /// Malformed input
    Parse,
    /// Schema mismatches
    Validation,
    /// Errors that already carry the response to send
    Http,
    /// Application-defined kind
    Custom(Cow<'static, str>),
}

impl ErrorKind {
    /// Application-defined kind.
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        ErrorKind::Custom(name.into())
    }

    /// Name of the kind.
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Root => "root",
            ErrorKind::Error => "error",
            ErrorKind::Io => "io",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::Http => "http",
            ErrorKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Standard API error type
///
/// Carries a kind, a message and a structured data payload. Errors of kind
/// [`ErrorKind::Http`] also carry the response to send.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// Position in the kind hierarchy
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Structured payload, `type` holds the symbolic error type
    pub data: Map<String, Value>,
    pub(crate) response: Option<Box<Response>>,
    /// Internal details (hidden in production)
    pub(crate) internal: Option<String>,
}

impl ApiError {
    /// Create a new error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: Map::new(),
            response: None,
            internal: None,
        }
    }

    /// Create an error tagged with a symbolic type
    pub fn typed(error_type: ErrorType, message: impl Into<String>) -> Self {
        let kind = match error_type {
            ErrorType::RequestValidation | ErrorType::ResponseValidation => ErrorKind::Validation,
            ErrorType::RequestParsing => ErrorKind::Parse,
            ErrorType::Custom(_) => ErrorKind::Runtime,
        };
        Self::new(kind, message).with_type(error_type)
    }

    /// Set the `type` entry of the data payload
    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.data
            .insert("type".to_string(), Value::String(error_type.as_str().to_string()));
        self
    }

    /// Add an entry to the data payload
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Add internal details (for logging, hidden from response in prod)
    pub fn with_internal(mut self, details: impl Into<String>) -> Self {
        self.internal = Some(details.into());
        self
    }

    /// Internal details, if any
    pub fn internal_details(&self) -> Option<&str> {
        self.internal.as_deref()
    }

    /// Symbolic type of the error, with legacy aliases resolved
    pub fn error_type(&self) -> Option<ErrorType> {
        self.data
            .get("type")
            .and_then(Value::as_str)
            .map(ErrorType::resolve)
    }

    /// Data payload with the `type` entry replaced by its canonical form
    pub fn resolved_data(&self) -> Map<String, Value> {
        let mut data = self.data.clone();
        if let Some(error_type) = self.error_type() {
            data.insert("type".to_string(), Value::String(error_type.as_str().to_string()));
        }
        data
    }

    /// The response carried by an [`ErrorKind::Http`] error
    pub fn response(&self) -> Option<&Response> {
        self.response.as_deref()
    }

    /// Wrap a ready-made response; the http-response stage sends it as is
    pub fn http(response: Response) -> Self {
        Self {
            kind: ErrorKind::Http,
            message: format!("HTTP {}", response.status()),
            data: Map::new(),
            response: Some(Box::new(response)),
            internal: None,
        }
    }

    /// Response error with status and a `{"message": ..}` body
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut error = Self::http(Response::json(status, json!({ "message": message })));
        error.message = message;
        error
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::status(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 401 Unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::status(StatusCode::UNAUTHORIZED, message)
    }

    /// Create a 403 Forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::status(StatusCode::FORBIDDEN, message)
    }

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(StatusCode::NOT_FOUND, message)
    }

    /// Create a 409 Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::status(StatusCode::CONFLICT, message)
    }

    /// Generic runtime failure, answered by the default handler
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Request body could not be decoded as `format`
    pub fn request_parsing(format: &str, details: impl Into<String>) -> Self {
        Self::typed(
            ErrorType::RequestParsing,
            format!("Malformed \"{}\" request.", format),
        )
        .with_data("format", Value::String(format.to_string()))
        .with_internal(details)
    }

    /// Request parameters failed coercion
    pub fn request_validation(
        coercion: &str,
        location: &[&str],
        schema: &Schema,
        value: Value,
        problems: Problems,
    ) -> Self {
        Self::typed(ErrorType::RequestValidation, "Request validation failed")
            .with_validation_data(coercion, location, schema, value, problems)
    }

    /// Response body failed coercion
    pub fn response_validation(
        coercion: &str,
        schema: &Schema,
        value: Value,
        problems: Problems,
    ) -> Self {
        Self::typed(ErrorType::ResponseValidation, "Response validation failed")
            .with_validation_data(coercion, &["response", "body"], schema, value, problems)
    }

    fn with_validation_data(
        self,
        coercion: &str,
        location: &[&str],
        schema: &Schema,
        value: Value,
        problems: Problems,
    ) -> Self {
        self.with_data("coercion", Value::String(coercion.to_string()))
            .with_data("in", json!(location))
            .with_data("schema", schema.describe())
            .with_data("value", value)
            .with_data("problems", serde_json::to_value(problems).unwrap_or(Value::Null))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_type() {
            Some(error_type) => write!(f, "{} ({}): {}", error_type, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

// Conversion from common error types
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::new(ErrorKind::Parse, format!("Invalid JSON: {}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::new(ErrorKind::Io, "I/O error").with_internal(err.to_string())
    }
}

/// Errors raised while building options or assembling the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A key that is no longer supported was supplied.
    #[error("option `{key}` is no longer supported, use `{replacement}` instead")]
    DeprecatedKey {
        /// The deprecated key
        key: &'static str,
        /// The key to use instead
        replacement: &'static str,
    },
    /// The coercion name does not resolve to a strategy.
    #[error(transparent)]
    UnknownCoercion(#[from] UnknownCoercion),
    /// An enabled format has no registered codec.
    #[error("format `{0}` is enabled but no codec is registered for it")]
    UnknownFormat(String),
    /// The declarative configuration could not be read.
    #[error("invalid options: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Deployment profile, read from `FERRAPI_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Verbose error bodies
    Development,
    /// Error messages masked by the default handler
    Production,
}

impl Environment {
    /// Detect the environment from `FERRAPI_ENV`.
    ///
    /// `production` or `prod` selects production, anything else development.
    pub fn from_env() -> Self {
        match std::env::var("FERRAPI_ENV").as_deref() {
            Ok("production") | Ok("prod") => Self::Production,
            _ => Self::Development,
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// The process environment, detected once.
pub fn get_environment() -> Environment {
    static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();
    *ENVIRONMENT.get_or_init(Environment::from_env)
}
