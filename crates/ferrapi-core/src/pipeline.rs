//! Pipeline assembly
//!
//! [`assemble`] wraps a route handler with the standard stages, in a fixed
//! order. Listed from the outside in:
//!
//! | Stage | Mounted when |
//! |-------|--------------|
//! | `params` | always |
//! | `nested-params` | always |
//! | `keyword-params` | always |
//! | `negotiate` | formats enabled |
//! | `encode-response` | formats enabled |
//! | `exceptions` | exceptions enabled |
//! | `decode-request` | formats enabled |
//! | `format-params` | formats enabled |
//! | `options` | always |
//! | `format-info` | formats enabled |
//! | `http-response` | always |
//! | `components` | components given |
//! | user middleware | as listed |
//!
//! The resulting [`Pipeline`] can be driven in three ways: awaited directly
//! with [`Pipeline::call`], with callbacks through [`Pipeline::call_with`], or as
//! a `tower` service.

use crate::context::{ComponentsLayer, OptionsLayer};
use crate::error::{ApiError, ConfigError};
use crate::exception::{ExceptionLayer, HttpResponseLayer};
use crate::format::configure;
use crate::handler::{BoxFuture, Handler, HandlerResult};
use crate::middleware::{
    compose, DecodeRequestLayer, EncodeResponseLayer, FormatInfoLayer, FormatParamsLayer,
    KeywordParamsLayer, LayerStack, NegotiateLayer, NestedParamsLayer, ParamsLayer,
};
use crate::options::Options;
use crate::request::Request;
use crate::response::Response;
use futures_util::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

/// An assembled request pipeline
#[derive(Clone)]
pub struct Pipeline {
    handler: Handler,
    stages: Vec<&'static str>,
}

/// Wrap `base` with the stages enabled in `options`
///
/// Fails if the options carry the removed `format` key.
pub fn assemble(base: Handler, options: &Options) -> Result<Pipeline, ConfigError> {
    if options.has_deprecated_format() {
        return Err(ConfigError::DeprecatedKey {
            key: "format",
            replacement: "formats",
        });
    }

    let formats = options.formats().cloned().map(configure).map(Arc::new);
    let user = compose(options.middleware().iter().cloned());

    let mut stack = LayerStack::new();
    stack.push(ParamsLayer);
    stack.push(NestedParamsLayer);
    stack.push(KeywordParamsLayer);
    if let Some(formats) = &formats {
        stack.push(NegotiateLayer::new(formats.clone()));
        stack.push(EncodeResponseLayer::new(formats.clone()));
    }
    if let Some(handlers) = options.exceptions() {
        stack.push(ExceptionLayer::new(handlers.clone()));
    }
    if let Some(formats) = &formats {
        stack.push(DecodeRequestLayer::new(formats.clone()));
        stack.push(FormatParamsLayer);
    }
    stack.push(OptionsLayer::new(options.request_options()));
    if let Some(formats) = &formats {
        stack.push(FormatInfoLayer::new(formats));
    }
    stack.push(HttpResponseLayer);
    if let Some(components) = options.components() {
        stack.push(ComponentsLayer::new(components.clone()));
    }

    let mut stages = stack.names();
    stages.extend(user.names());
    trace_debug!(stages = ?stages, "assembled pipeline");

    Ok(Pipeline {
        handler: stack.apply(user.apply(base)),
        stages,
    })
}

impl Pipeline {
    /// Mounted stages, outermost first
    pub fn stage_names(&self) -> &[&'static str] {
        &self.stages
    }

    /// The assembled chain as a plain handler
    pub fn handler(&self) -> Handler {
        self.handler.clone()
    }

    /// Run a request through the pipeline
    pub async fn call(&self, req: Request) -> HandlerResult {
        (self.handler)(req).await
    }

    /// Run a request, reporting the outcome to one of two callbacks
    ///
    /// Exactly one of `respond` and `raise` is called. A panic inside the chain
    /// reaches `raise` as a runtime error.
    pub async fn call_with<R, E>(&self, req: Request, respond: R, raise: E)
    where
        R: FnOnce(Response),
        E: FnOnce(ApiError),
    {
        let outcome = AssertUnwindSafe((self.handler)(req)).catch_unwind().await;
        match outcome {
            Ok(Ok(response)) => respond(response),
            Ok(Err(error)) => raise(error),
            Err(_panic) => {
                trace_error!("request pipeline panicked");
                raise(ApiError::internal("request pipeline panicked"))
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages).finish()
    }
}

impl tower_service::Service<Request> for Pipeline {
    type Response = Response;
    type Error = ApiError;
    type Future = BoxFuture<HandlerResult>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        (self.handler)(req)
    }
}
