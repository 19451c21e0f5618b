//! Format negotiation
//!
//! A [`Formats`] engine knows a set of media types, each backed by a [`Codec`].
//! Per request it picks the format of the incoming body from `Content-Type` and
//! the format of the response from `Accept`, falling back to the default format.
//!
//! Only responses accepted by the engine's encodable predicate are encoded. The
//! pipeline installs [`is_encodable`], which accepts structured bodies and any
//! body carrying the serializable marker.

use crate::error::ApiError;
use crate::request::Request;
use crate::response::{Body, Response};
use bytes::Bytes;
use http::{header, HeaderValue};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// JSON media type
pub const JSON: &str = "application/json";

/// Urlencoded form media type
pub const FORM: &str = "application/x-www-form-urlencoded";

/// Failure inside a codec
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Input bytes are not valid for the format
    #[error("malformed body: {0}")]
    Decode(String),
    /// The value cannot be represented in the format
    #[error("cannot encode body: {0}")]
    Encode(String),
}

/// Decoder and encoder for one media type
pub trait Codec: Send + Sync + 'static {
    /// Decode a request body
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;

    /// Encode a response body
    fn encode(&self, value: &Value) -> Result<Bytes, CodecError>;
}

/// `application/json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}

/// `application/x-www-form-urlencoded`
///
/// Repeated keys decode into arrays. Only flat objects of scalars and arrays of
/// scalars can be encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormCodec;

impl Codec for FormCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(Value::Object(group_pairs(pairs)))
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        let Value::Object(map) = value else {
            return Err(CodecError::Encode("only objects can be form encoded".to_string()));
        };

        let mut pairs = Vec::new();
        for (key, value) in map {
            match value {
                Value::Array(items) => {
                    for item in items {
                        pairs.push((key.as_str(), form_scalar(item)?));
                    }
                }
                other => pairs.push((key.as_str(), form_scalar(other)?)),
            }
        }
        serde_urlencoded::to_string(pairs)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}

fn form_scalar(value: &Value) -> Result<String, CodecError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(_) | Value::Object(_) => {
            Err(CodecError::Encode("nested values cannot be form encoded".to_string()))
        }
    }
}

/// Group decoded key/value pairs, collecting repeated keys into arrays
pub(crate) fn group_pairs(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        let value = Value::String(value);
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
    map
}

/// A parsed `Content-Type` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Lowercase `type/subtype`
    pub essence: String,
    /// `charset` parameter, if any
    pub charset: Option<String>,
}

impl MediaType {
    /// Parse a header value such as `application/json; charset=utf-8`
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let charset = parts.find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
        });
        Self { essence, charset }
    }
}

/// A single media range from an `Accept` header
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    /// Media range, e.g. `application/json` or `text/*`
    pub media_type: String,
    /// Quality value (0.0 - 1.0), default is 1.0
    pub quality: f32,
}

impl MediaRange {
    fn matches(&self, format: &str) -> bool {
        if self.media_type == "*/*" || self.media_type == format {
            return true;
        }
        match self.media_type.strip_suffix("/*") {
            Some(kind) => format.split('/').next() == Some(kind),
            None => false,
        }
    }
}

/// Parsed `Accept` header, ranges sorted by descending quality
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptHeader {
    /// Acceptable media ranges
    pub media_ranges: Vec<MediaRange>,
}

impl AcceptHeader {
    /// Parse an Accept header value
    pub fn parse(header_value: &str) -> Self {
        let mut ranges: Vec<MediaRange> = header_value
            .split(',')
            .filter_map(|part| {
                let mut params = part.split(';');
                let media_type = params.next()?.trim().to_ascii_lowercase();
                if media_type.is_empty() {
                    return None;
                }
                let quality = params
                    .filter_map(|param| param.split_once('='))
                    .find(|(name, _)| name.trim() == "q")
                    .map(|(_, q)| q.trim().parse::<f32>().unwrap_or(1.0).clamp(0.0, 1.0))
                    .unwrap_or(1.0);
                Some(MediaRange { media_type, quality })
            })
            .collect();

        // stable, so equal qualities keep header order
        ranges.sort_by(|a, b| {
            b.quality
                .partial_cmp(&a.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Self {
            media_ranges: ranges,
        }
    }

    /// Best of `available` for this header, `None` if none is acceptable
    ///
    /// A format named explicitly with `q=0` is never picked, even through a
    /// wildcard.
    pub fn negotiate<'a>(&self, available: impl IntoIterator<Item = &'a str> + Clone) -> Option<&'a str> {
        let refused = |format: &str| {
            self.media_ranges
                .iter()
                .any(|range| range.quality <= 0.0 && range.media_type == format)
        };
        self.media_ranges
            .iter()
            .filter(|range| range.quality > 0.0)
            .find_map(|range| {
                available
                    .clone()
                    .into_iter()
                    .find(|format| range.matches(format) && !refused(format))
            })
    }
}

/// Predicate deciding whether a response gets encoded
pub type EncodablePredicate = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Whether a response body should go through the negotiated codec
pub fn is_encodable(response: &Response) -> bool {
    response.body().is_value() || response.is_serializable()
}

/// Declarative description of a [`Formats`] engine
#[derive(Clone)]
pub struct FormatsConfig {
    /// Format used when the client expresses no usable preference
    pub default_format: String,
    /// Enabled formats in preference order
    pub formats: Vec<(String, Arc<dyn Codec>)>,
    /// Charset announced on encoded responses
    pub charset: String,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            default_format: JSON.to_string(),
            formats: vec![
                (JSON.to_string(), Arc::new(JsonCodec) as Arc<dyn Codec>),
                (FORM.to_string(), Arc::new(FormCodec)),
            ],
            charset: "utf-8".to_string(),
        }
    }
}

impl FormatsConfig {
    /// Add or replace the codec of `format`
    pub fn with_format(mut self, format: impl Into<String>, codec: impl Codec) -> Self {
        let format = format.into();
        let codec: Arc<dyn Codec> = Arc::new(codec);
        match self.formats.iter_mut().find(|(name, _)| *name == format) {
            Some(entry) => entry.1 = codec,
            None => self.formats.push((format, codec)),
        }
        self
    }

    /// Set the default format
    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = format.into();
        self
    }

    /// Set the announced charset
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Codec registered for `format`
    pub fn codec(&self, format: &str) -> Option<&Arc<dyn Codec>> {
        self.formats
            .iter()
            .find(|(name, _)| name == format)
            .map(|(_, codec)| codec)
    }
}

impl fmt::Debug for FormatsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatsConfig")
            .field("default_format", &self.default_format)
            .field(
                "formats",
                &self.formats.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("charset", &self.charset)
            .finish()
    }
}

/// Formats chosen for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Format of the request body, `None` without a supported `Content-Type`
    pub request: Option<String>,
    /// Format the response is encoded in
    pub response: String,
    /// Charset announced on the response
    pub charset: String,
}

/// Formats the pipeline can consume and produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatsInfo {
    /// Decodable request formats
    pub consumes: Vec<String>,
    /// Encodable response formats
    pub produces: Vec<String>,
}

/// Negotiation engine
#[derive(Clone)]
pub struct Formats {
    config: FormatsConfig,
    encodable: EncodablePredicate,
}

impl Formats {
    /// Engine encoding only structured bodies
    pub fn new(config: FormatsConfig) -> Self {
        Self {
            config,
            encodable: Arc::new(|response: &Response| response.body().is_value()),
        }
    }

    /// Replace the encodable predicate
    pub fn with_encodable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.encodable = Arc::new(predicate);
        self
    }

    /// Same engine, predicate included, over a new configuration
    pub fn reconfigure(&self, config: FormatsConfig) -> Self {
        Self {
            config,
            encodable: self.encodable.clone(),
        }
    }

    /// The configuration this engine was built from
    pub fn config(&self) -> &FormatsConfig {
        &self.config
    }

    /// Enabled formats in preference order
    pub fn formats(&self) -> impl Iterator<Item = &str> + Clone {
        self.config.formats.iter().map(|(name, _)| name.as_str())
    }

    /// Consumed and produced formats
    pub fn info(&self) -> FormatsInfo {
        let formats: Vec<String> = self.formats().map(str::to_string).collect();
        FormatsInfo {
            consumes: formats.clone(),
            produces: formats,
        }
    }

    /// Whether `response` gets encoded
    pub fn encodes(&self, response: &Response) -> bool {
        (self.encodable)(response)
    }

    /// Format of the request body
    pub fn request_format(&self, req: &Request) -> Option<String> {
        let media_type = MediaType::parse(req.content_type()?);
        self.config
            .codec(&media_type.essence)
            .map(|_| media_type.essence)
    }

    /// Format of the response
    pub fn response_format(&self, req: &Request) -> String {
        req.headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(AcceptHeader::parse)
            .and_then(|accept| accept.negotiate(self.formats()).map(str::to_string))
            .unwrap_or_else(|| self.config.default_format.clone())
    }

    /// Both formats of `req`
    pub fn negotiate(&self, req: &Request) -> NegotiatedFormat {
        NegotiatedFormat {
            request: self.request_format(req),
            response: self.response_format(req),
            charset: self.config.charset.clone(),
        }
    }

    /// Decode a request body as `format`
    pub fn decode(&self, format: &str, bytes: &[u8]) -> Result<Value, ApiError> {
        let codec = self
            .config
            .codec(format)
            .ok_or_else(|| ApiError::request_parsing(format, "no codec for format"))?;
        codec
            .decode(bytes)
            .map_err(|e| ApiError::request_parsing(format, e.to_string()))
    }

    /// Encode `response` as `format`; responses the predicate rejects pass unchanged
    pub fn encode(&self, format: &str, mut response: Response) -> Result<Response, ApiError> {
        if !self.encodes(&response) {
            return Ok(response);
        }
        let value = match response.take_body() {
            Body::Value(value) => value,
            Body::Text(text) => Value::String(text),
            other => {
                response.set_body(other);
                return Ok(response);
            }
        };

        let codec = self.config.codec(format).ok_or_else(|| {
            ApiError::internal(format!("no codec for response format {}", format))
        })?;
        let bytes = codec
            .encode(&value)
            .map_err(|e| ApiError::internal(e.to_string()))?;

        let content_type = format!("{}; charset={}", format, self.config.charset);
        if let Ok(content_type) = HeaderValue::from_str(&content_type) {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        response.set_body(Body::Bytes(bytes));
        Ok(response)
    }
}

impl fmt::Debug for Formats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formats").field("config", &self.config).finish()
    }
}

/// Either a ready engine or a configuration to build one from
#[derive(Debug, Clone)]
pub enum FormatsOption {
    /// Configuration for a new engine
    Config(FormatsConfig),
    /// A ready engine
    Instance(Formats),
}

impl From<FormatsConfig> for FormatsOption {
    fn from(config: FormatsConfig) -> Self {
        FormatsOption::Config(config)
    }
}

impl From<Formats> for FormatsOption {
    fn from(formats: Formats) -> Self {
        FormatsOption::Instance(formats)
    }
}

/// Engine used by the pipeline, with [`is_encodable`] installed
pub fn configure(option: FormatsOption) -> Formats {
    match option {
        FormatsOption::Instance(formats) => formats.with_encodable(is_encodable),
        FormatsOption::Config(config) => Formats::new(config).with_encodable(is_encodable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::IntoResponse;
    use http::StatusCode;
    use serde_json::json;

    fn request(content_type: Option<&str>, accept: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        builder.body(Bytes::new()).unwrap().into()
    }

    #[test]
    fn accept_header_sorted_by_quality() {
        let accept = AcceptHeader::parse("text/html;q=0.5, application/json, */*;q=0.1");
        assert_eq!(accept.media_ranges[0].media_type, "application/json");
        assert_eq!(accept.media_ranges[1].quality, 0.5);
        assert_eq!(accept.media_ranges.len(), 3);
    }

    #[test]
    fn accept_negotiation() {
        let available = [JSON, FORM];
        let pick = |header: &str| AcceptHeader::parse(header).negotiate(available.iter().copied());

        assert_eq!(pick("application/x-www-form-urlencoded"), Some(FORM));
        assert_eq!(pick("text/html, application/*;q=0.8"), Some(JSON));
        assert_eq!(pick("*/*"), Some(JSON));
        assert_eq!(pick("application/json;q=0, application/*"), Some(FORM));
        assert_eq!(pick("text/html"), None);
    }

    #[test]
    fn content_type_parsing() {
        let media_type = MediaType::parse("Application/JSON; Charset=\"UTF-8\"");
        assert_eq!(media_type.essence, "application/json");
        assert_eq!(media_type.charset.as_deref(), Some("utf-8"));
        assert_eq!(MediaType::parse("text/plain").charset, None);
    }

    #[test]
    fn negotiation_falls_back_to_default() {
        let formats = configure(FormatsConfig::default().into());

        let negotiated = formats.negotiate(&request(Some("application/json; charset=utf-8"), None));
        assert_eq!(negotiated.request.as_deref(), Some(JSON));
        assert_eq!(negotiated.response, JSON);

        let negotiated = formats.negotiate(&request(Some("text/csv"), Some("text/csv")));
        assert_eq!(negotiated.request, None);
        assert_eq!(negotiated.response, JSON);
    }

    #[test]
    fn form_codec_groups_repeated_keys() {
        let value = FormCodec.decode(b"x=1&tag=a&tag=b").unwrap();
        assert_eq!(value, json!({"x": "1", "tag": ["a", "b"]}));

        let bytes = FormCodec.encode(&json!({"x": 1, "tag": ["a", "b"]})).unwrap();
        assert_eq!(bytes, Bytes::from_static(b"x=1&tag=a&tag=b"));
        assert!(FormCodec.encode(&json!([1])).is_err());
    }

    #[test]
    fn malformed_body_is_request_parsing() {
        let formats = configure(FormatsConfig::default().into());
        let err = formats.decode(JSON, b"{\"x\":").unwrap_err();
        assert_eq!(err.data["type"], "request-parsing");
        assert_eq!(err.data["format"], JSON);
    }

    #[test]
    fn encoding_respects_predicate() {
        let formats = configure(FormatsConfig::default().into());

        let encoded = formats.encode(JSON, Response::ok(json!({"total": 3}))).unwrap();
        assert_eq!(encoded.headers()[header::CONTENT_TYPE], "application/json; charset=utf-8");
        assert_eq!(encoded.body(), &Body::Bytes(Bytes::from_static(br#"{"total":3}"#)));

        let plain = formats.encode(JSON, "hello".into_response()).unwrap();
        assert_eq!(plain.body(), &Body::Text("hello".to_string()));

        let marked = formats
            .encode(JSON, "hello".into_response().serializable())
            .unwrap();
        assert_eq!(marked.body(), &Body::Bytes(Bytes::from_static(b"\"hello\"")));
    }

    #[test]
    fn configure_only_replaces_predicate_of_instance() {
        let custom = Formats::new(FormatsConfig::default().with_default_format(FORM))
            .with_encodable(|response: &Response| response.status() == StatusCode::IM_A_TEAPOT);
        assert!(!custom.encodes(&"text".into_response().serializable()));

        let configured = configure(custom.into());
        assert_eq!(configured.config().default_format, FORM);
        assert!(configured.encodes(&"text".into_response().serializable()));
    }
}
