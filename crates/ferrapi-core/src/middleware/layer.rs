//! Middleware layers and their composition
//!
//! A middleware turns one handler into another. It can be written as a
//! [`MiddlewareLayer`] (called with the request and the next handler), as a
//! plain wrapper function, or as a wrapper function taking preset arguments.
//! [`compose`] folds a list of such descriptors into a [`LayerStack`].

use crate::handler::{BoxFuture, Handler, HandlerResult};
use crate::request::Request;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// The next handler in a middleware chain
pub type BoxedNext = Handler;

/// Trait for middleware that can be mounted in the pipeline
pub trait MiddlewareLayer: Send + Sync + 'static {
    /// Name used in stage listings and logs
    fn name(&self) -> &'static str {
        "middleware"
    }

    /// Apply this middleware to a request, calling `next` to continue the chain
    fn call(&self, req: Request, next: BoxedNext) -> BoxFuture<HandlerResult>;

    /// Clone this middleware into a boxed trait object
    fn clone_box(&self) -> Box<dyn MiddlewareLayer>;
}

impl Clone for Box<dyn MiddlewareLayer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Wrap `next` with `layer`, producing a new handler.
pub fn wrap(layer: Box<dyn MiddlewareLayer>, next: BoxedNext) -> BoxedNext {
    let layer: Arc<dyn MiddlewareLayer> = Arc::from(layer);
    Arc::new(move |req: Request| layer.call(req, next.clone()))
}

/// Middleware built from an async closure
pub struct FnLayer<F> {
    name: &'static str,
    f: Arc<F>,
}

impl<F> Clone for FnLayer<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            f: self.f.clone(),
        }
    }
}

/// Create a middleware from an async closure
///
/// # Example
///
/// ```rust
/// use ferrapi_core::middleware::from_fn;
/// use http::HeaderValue;
///
/// let layer = from_fn("server-header", |req, next| async move {
///     next(req).await.map(|mut response| {
///         response
///             .headers_mut()
///             .insert("x-server", HeaderValue::from_static("ferrapi"));
///         response
///     })
/// });
/// ```
pub fn from_fn<F, Fut>(name: &'static str, f: F) -> FnLayer<F>
where
    F: Fn(Request, BoxedNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnLayer { name, f: Arc::new(f) }
}

impl<F, Fut> MiddlewareLayer for FnLayer<F>
where
    F: Fn(Request, BoxedNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn call(&self, req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        Box::pin((self.f)(req, next))
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// A wrapper function from handler to handler
pub type WrapFn = Arc<dyn Fn(BoxedNext) -> BoxedNext + Send + Sync>;

/// A wrapper function taking preset arguments after the handler
pub type WrapWithArgsFn = Arc<dyn Fn(BoxedNext, &[Value]) -> BoxedNext + Send + Sync>;

/// Middleware descriptor
#[derive(Clone)]
pub enum MiddlewareSpec {
    /// A middleware layer
    Layer(Box<dyn MiddlewareLayer>),
    /// A wrapper function
    Wrap(WrapFn),
    /// A wrapper function with its preset arguments
    WithArgs(WrapWithArgsFn, Vec<Value>),
}

impl MiddlewareSpec {
    /// Descriptor for a layer
    pub fn layer(layer: impl MiddlewareLayer) -> Self {
        MiddlewareSpec::Layer(Box::new(layer))
    }

    /// Descriptor for a wrapper function
    pub fn wrap<F>(f: F) -> Self
    where
        F: Fn(BoxedNext) -> BoxedNext + Send + Sync + 'static,
    {
        MiddlewareSpec::Wrap(Arc::new(f))
    }

    /// Descriptor for a wrapper function with preset arguments
    pub fn with_args<F>(f: F, args: Vec<Value>) -> Self
    where
        F: Fn(BoxedNext, &[Value]) -> BoxedNext + Send + Sync + 'static,
    {
        MiddlewareSpec::WithArgs(Arc::new(f), args)
    }

    /// Name used in stage listings
    pub fn name(&self) -> &'static str {
        match self {
            MiddlewareSpec::Layer(layer) => layer.name(),
            MiddlewareSpec::Wrap(_) | MiddlewareSpec::WithArgs(..) => "wrapper",
        }
    }

    /// Wrap `handler` with this descriptor
    pub fn apply(&self, handler: BoxedNext) -> BoxedNext {
        match self {
            MiddlewareSpec::Layer(layer) => wrap(layer.clone_box(), handler),
            MiddlewareSpec::Wrap(f) => f(handler),
            MiddlewareSpec::WithArgs(f, args) => f(handler, args),
        }
    }
}

impl<L: MiddlewareLayer> From<L> for MiddlewareSpec {
    fn from(layer: L) -> Self {
        MiddlewareSpec::layer(layer)
    }
}

/// An ordered stack of middleware descriptors
///
/// The first descriptor is the outermost: `[A, B]` applied to `h` behaves as
/// `A(B(h))`.
#[derive(Clone, Default)]
pub struct LayerStack {
    layers: Vec<MiddlewareSpec>,
}

impl LayerStack {
    /// Create a new empty layer stack
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a descriptor as the innermost entry
    pub fn push(&mut self, spec: impl Into<MiddlewareSpec>) {
        self.layers.push(spec.into());
    }

    /// Add a descriptor as the outermost entry
    pub fn prepend(&mut self, spec: impl Into<MiddlewareSpec>) {
        self.layers.insert(0, spec.into());
    }

    /// Check if the stack is empty
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Get the number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Names of the descriptors, outermost first
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(MiddlewareSpec::name).collect()
    }

    /// Wrap `handler` with every descriptor
    pub fn apply(&self, handler: BoxedNext) -> BoxedNext {
        // Build the chain from inside out
        self.layers
            .iter()
            .rev()
            .fold(handler, |next, spec| spec.apply(next))
    }
}

/// Fold descriptors into a stack; `None` entries are skipped.
pub fn compose<I>(specs: I) -> LayerStack
where
    I: IntoIterator<Item = Option<MiddlewareSpec>>,
{
    LayerStack {
        layers: specs.into_iter().flatten().collect(),
    }
}
