//! Response types for ferrapi
//!
//! A [`Response`] keeps its body in a structured form until the encoding stage
//! of the pipeline decides how to render it. The core trait is [`IntoResponse`],
//! which allows handler return values to be converted into a response.
//!
//! # Built-in Response Types
//!
//! | Type | Status | Body |
//! |------|--------|------|
//! | `serde_json::Value` | 200 | structured, encoded by negotiation |
//! | `String` / `&str` | 200 | text, passed through untouched |
//! | `Bytes` | 200 | raw bytes, passed through untouched |
//! | `()` | 200 | empty |
//! | `StatusCode` | given | empty |
//! | `(StatusCode, R)` | given | from `R` |

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use serde_json::Value;

/// Response body
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// Pre-rendered bytes
    Bytes(Bytes),
    /// Pre-rendered text
    Text(String),
    /// Structured value, rendered by the negotiated format
    Value(Value),
}

impl Body {
    /// Whether the body is a structured value.
    pub fn is_value(&self) -> bool {
        matches!(self, Body::Value(_))
    }

    /// The structured value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Body::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// HTTP Response
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
    serializable: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK, Body::Empty)
    }
}

impl Response {
    /// Create a response
    pub fn new(status: StatusCode, body: Body) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            serializable: false,
        }
    }

    /// 200 OK with a structured body
    pub fn ok(value: Value) -> Self {
        Self::json(StatusCode::OK, value)
    }

    /// Structured body with the given status
    pub fn json(status: StatusCode, value: Value) -> Self {
        Self::new(status, Body::Value(value))
    }

    /// Get the status
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get mutable status
    pub fn status_mut(&mut self) -> &mut StatusCode {
        &mut self.status
    }

    /// Get the headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get mutable headers
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Add a header
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Get the body
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replace the body
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Take the body, leaving it empty
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Mark the body for encoding even when it is not a structured value
    pub fn serializable(mut self) -> Self {
        self.serializable = true;
        self
    }

    /// Whether the serializable marker is set
    pub fn is_serializable(&self) -> bool {
        self.serializable
    }

    /// Convert into an `http` response for the transport.
    ///
    /// Structured bodies that were never encoded fall back to JSON.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut headers = self.headers;
        let bytes = match self.body {
            Body::Empty => Bytes::new(),
            Body::Bytes(bytes) => bytes,
            Body::Text(text) => {
                headers
                    .entry(header::CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("text/plain; charset=utf-8"));
                Bytes::from(text)
            }
            Body::Value(value) => {
                headers
                    .entry(header::CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("application/json; charset=utf-8"));
                Bytes::from(serde_json::to_vec(&value).unwrap_or_default())
            }
        };

        let mut response = http::Response::new(Full::new(bytes));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

/// Trait for types that can be converted into a response
pub trait IntoResponse {
    /// Convert self into a Response
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

// () - 200 OK with empty body
impl IntoResponse for () {
    fn into_response(self) -> Response {
        Response::default()
    }
}

impl IntoResponse for Value {
    fn into_response(self) -> Response {
        Response::ok(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::new(StatusCode::OK, Body::Text(self.to_string()))
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::new(StatusCode::OK, Body::Text(self))
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Response {
        Response::new(StatusCode::OK, Body::Bytes(self))
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        Response::new(self, Body::Empty)
    }
}

// (StatusCode, impl IntoResponse)
impl<R: IntoResponse> IntoResponse for (StatusCode, R) {
    fn into_response(self) -> Response {
        let mut response = self.1.into_response();
        *response.status_mut() = self.0;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn body_bytes(response: http::Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn tuple_sets_status() {
        let response = (StatusCode::CREATED, json!({"id": 1})).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.body().is_value());
    }

    #[tokio::test]
    async fn value_body_falls_back_to_json() {
        let http = Response::ok(json!({"total": 3})).into_http();
        assert_eq!(
            http.headers()[header::CONTENT_TYPE],
            "application/json; charset=utf-8"
        );
        assert_eq!(body_bytes(http).await, Bytes::from_static(br#"{"total":3}"#));
    }

    #[tokio::test]
    async fn existing_content_type_is_kept() {
        let http = "<p>hi</p>"
            .into_response()
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/html"))
            .into_http();
        assert_eq!(http.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(body_bytes(http).await, Bytes::from_static(b"<p>hi</p>"));
    }

    #[test]
    fn serializable_marker() {
        let response = "plain".into_response();
        assert!(!response.is_serializable());
        assert!(response.serializable().is_serializable());
    }
}
