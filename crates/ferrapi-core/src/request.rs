//! Request types for ferrapi

use bytes::Bytes;
use http::{header, request::Parts, Extensions, HeaderMap, Method, Uri, Version};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// HTTP Request wrapper
///
/// Besides the raw parts of the request it carries the parameter maps filled
/// in by the pipeline (query, form, body, merged params) and the path params
/// supplied by the host router. The request extensions form the per-request
/// context zone where options, components and negotiation results live.
#[derive(Clone)]
pub struct Request {
    pub(crate) parts: Parts,
    pub(crate) body: Option<Bytes>,
    pub(crate) path_params: HashMap<String, String>,
    pub(crate) query_params: Map<String, Value>,
    pub(crate) form_params: Map<String, Value>,
    pub(crate) body_params: Option<Value>,
    pub(crate) params: Map<String, Value>,
}

impl Request {
    /// Create a new request from parts and the collected body
    pub fn new(parts: Parts, body: Bytes) -> Self {
        Self {
            parts,
            body: Some(body),
            path_params: HashMap::new(),
            query_params: Map::new(),
            form_params: Map::new(),
            body_params: None,
            params: Map::new(),
        }
    }

    /// Attach the path params produced by route matching
    pub fn with_path_params(mut self, path_params: HashMap<String, String>) -> Self {
        self.path_params = path_params;
        self
    }

    /// Get the HTTP method
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Get the URI
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Get the HTTP version
    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// Get the headers
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Get request extensions
    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    /// Get mutable extensions
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// Get the request path
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// Get the query string
    pub fn query_string(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    /// The `Content-Type` header, if present and valid
    pub fn content_type(&self) -> Option<&str> {
        self.headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// The raw body, unless already consumed
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Take the body bytes (can only be called once)
    pub fn take_body(&mut self) -> Option<Bytes> {
        self.body.take()
    }

    /// Get path parameters
    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// Get a specific path parameter
    pub fn path_param(&self, name: &str) -> Option<&String> {
        self.path_params.get(name)
    }

    /// Parsed query string parameters
    pub fn query_params(&self) -> &Map<String, Value> {
        &self.query_params
    }

    /// Replace the query parameters
    pub fn set_query_params(&mut self, params: Map<String, Value>) {
        self.query_params = params;
    }

    /// Parsed urlencoded form parameters
    pub fn form_params(&self) -> &Map<String, Value> {
        &self.form_params
    }

    /// Replace the form parameters
    pub fn set_form_params(&mut self, params: Map<String, Value>) {
        self.form_params = params;
    }

    /// Body decoded by the negotiated format
    pub fn body_params(&self) -> Option<&Value> {
        self.body_params.as_ref()
    }

    /// Replace the decoded body
    pub fn set_body_params(&mut self, body: Option<Value>) {
        self.body_params = body;
    }

    /// All parameters merged into one map
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Get mutable merged parameters
    pub fn params_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.params
    }

    /// Headers as a map with lowercase names, repeated headers joined by `,`
    pub fn header_params(&self) -> Map<String, Value> {
        let mut map: Map<String, Value> = Map::new();
        for (name, value) in self.headers() {
            let Ok(value) = value.to_str() else { continue };
            match map.get_mut(name.as_str()) {
                Some(Value::String(existing)) => {
                    existing.push(',');
                    existing.push_str(value);
                }
                _ => {
                    map.insert(name.as_str().to_string(), Value::String(value.to_string()));
                }
            }
        }
        map
    }

    /// Path params as a JSON map of strings
    pub fn path_params_map(&self) -> Map<String, Value> {
        self.path_params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts, body)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("version", &self.parts.version)
            .field("params", &self.params)
            .finish()
    }
}
