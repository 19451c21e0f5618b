//! Format stages
//!
//! Stages that depend on a [`Formats`] engine. From the outside in:
//!
//! | Stage | Layer | Effect |
//! |-------|-------|--------|
//! | `negotiate` | [`NegotiateLayer`] | attaches [`NegotiatedFormat`] |
//! | `encode-response` | [`EncodeResponseLayer`] | encodes encodable responses |
//! | `decode-request` | [`DecodeRequestLayer`] | decodes the body into `body_params` |
//! | `format-params` | [`FormatParamsLayer`] | merges object bodies into `params` |
//! | `format-info` | [`FormatInfoLayer`] | attaches [`FormatsInfo`] |

use super::layer::{BoxedNext, MiddlewareLayer};
use crate::format::{Formats, FormatsInfo, NegotiatedFormat};
use crate::handler::{BoxFuture, HandlerResult};
use crate::request::Request;
use crate::response::Response;
use serde_json::Value;
use std::sync::Arc;

/// Formats negotiated for `req`, if the negotiate stage ran
pub fn negotiated_format(req: &Request) -> Option<&NegotiatedFormat> {
    req.extensions().get::<NegotiatedFormat>()
}

/// Formats info attached to `req`, if the format-info stage ran
pub fn formats_info(req: &Request) -> Option<&FormatsInfo> {
    req.extensions().get::<FormatsInfo>()
}

/// Picks request and response formats
#[derive(Clone)]
pub struct NegotiateLayer {
    formats: Arc<Formats>,
}

impl NegotiateLayer {
    /// Negotiate with `formats`
    pub fn new(formats: Arc<Formats>) -> Self {
        Self { formats }
    }
}

impl MiddlewareLayer for NegotiateLayer {
    fn name(&self) -> &'static str {
        "negotiate"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        let negotiated = self.formats.negotiate(&req);
        trace_debug!(
            request = ?negotiated.request,
            response = %negotiated.response,
            "negotiated formats"
        );
        req.extensions_mut().insert(negotiated);
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Encodes successful responses in the negotiated format
///
/// Errors pass through untouched.
#[derive(Clone)]
pub struct EncodeResponseLayer {
    formats: Arc<Formats>,
}

impl EncodeResponseLayer {
    /// Encode with `formats`
    pub fn new(formats: Arc<Formats>) -> Self {
        Self { formats }
    }
}

impl MiddlewareLayer for EncodeResponseLayer {
    fn name(&self) -> &'static str {
        "encode-response"
    }

    fn call(&self, req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        let formats = self.formats.clone();
        let format = negotiated_format(&req)
            .map(|negotiated| negotiated.response.clone())
            .unwrap_or_else(|| formats.response_format(&req));

        Box::pin(async move {
            let response = next(req).await?;
            formats.encode(&format, response)
        })
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Decodes the request body into `body_params`
///
/// Bodies without a supported `Content-Type` are left alone. Malformed
/// bodies fail with a `request-parsing` error.
#[derive(Clone)]
pub struct DecodeRequestLayer {
    formats: Arc<Formats>,
}

impl DecodeRequestLayer {
    /// Decode with `formats`
    pub fn new(formats: Arc<Formats>) -> Self {
        Self { formats }
    }
}

impl MiddlewareLayer for DecodeRequestLayer {
    fn name(&self) -> &'static str {
        "decode-request"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        let format = match negotiated_format(&req) {
            Some(negotiated) => negotiated.request.clone(),
            None => self.formats.request_format(&req),
        };

        if let Some(format) = format {
            let decoded = match req.body() {
                Some(body) if !body.is_empty() => Some(self.formats.decode(&format, body)),
                _ => None,
            };
            match decoded {
                Some(Ok(value)) => req.set_body_params(Some(value)),
                Some(Err(error)) => return Box::pin(async move { Err::<Response, _>(error) }),
                None => {}
            }
        }
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Merges object bodies into the request's `params`, body keys winning
#[derive(Clone, Default)]
pub struct FormatParamsLayer;

impl MiddlewareLayer for FormatParamsLayer {
    fn name(&self) -> &'static str {
        "format-params"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        if let Some(Value::Object(body)) = req.body_params().cloned() {
            req.params_mut().extend(body);
        }
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Attaches the consumed and produced formats
#[derive(Clone)]
pub struct FormatInfoLayer {
    info: FormatsInfo,
}

impl FormatInfoLayer {
    /// Describe `formats`
    pub fn new(formats: &Formats) -> Self {
        Self {
            info: formats.info(),
        }
    }
}

impl MiddlewareLayer for FormatInfoLayer {
    fn name(&self) -> &'static str {
        "format-info"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        req.extensions_mut().insert(self.info.clone());
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}
