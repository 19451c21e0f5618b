//! Per-request context
//!
//! The pipeline attaches configuration to each request's extensions so that
//! inner layers, the coercion engine and route handlers can read it:
//!
//! | Key | Attached by | Read with |
//! |-----|-------------|-----------|
//! | [`RequestOptions`] | options stage, [`CoercionLayer`] | [`get_options`] |
//! | [`Components`] | components stage | [`get_components`] |
//! | [`Rethrow`] | internal callers | [`is_rethrow`] |

use crate::handler::{BoxFuture, HandlerResult};
use crate::middleware::{BoxedNext, MiddlewareLayer};
use crate::request::Request;
use ferrapi_coerce::Coercion;
use http::Extensions;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Options visible to inner layers and handlers
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Active coercion strategy, `None` when coercion is disabled
    pub coercion: Option<Coercion>,
    /// Documentation passthrough settings
    pub swagger: Value,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("coercion", &self.coercion.as_ref().map(|c| c.name().to_string()))
            .field("swagger", &self.swagger)
            .finish()
    }
}

/// Injected dependencies, keyed by type
///
/// # Example
///
/// ```rust
/// use ferrapi_core::Components;
///
/// #[derive(Clone)]
/// struct Db(&'static str);
///
/// let components = Components::new().with(Db("postgres://"));
/// assert_eq!(components.get::<Db>().unwrap().0, "postgres://");
/// ```
#[derive(Clone, Default)]
pub struct Components(Arc<Extensions>);

impl Components {
    /// An empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component, replacing any previous one of the same type
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, component: T) -> Self {
        Arc::make_mut(&mut self.0).insert(component);
        self
    }

    /// Look up a component by type
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.0.get::<T>()
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bag is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Components({})", self.0.len())
    }
}

/// Marker asking the exception stage to return failures untranslated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rethrow;

/// Options attached to the request
pub fn get_options(req: &Request) -> Option<&RequestOptions> {
    req.extensions().get::<Arc<RequestOptions>>().map(Arc::as_ref)
}

/// Components attached to the request
pub fn get_components(req: &Request) -> Option<&Components> {
    req.extensions().get::<Components>()
}

/// The coercion strategy active for this request
pub fn active_coercion(req: &Request) -> Option<Coercion> {
    get_options(req).and_then(|options| options.coercion.clone())
}

/// Ask the exception stage to pass failures of this request through untranslated
pub fn set_rethrow(req: &mut Request) {
    req.extensions_mut().insert(Rethrow);
}

/// Whether failures of this request bypass exception dispatch
pub fn is_rethrow(req: &Request) -> bool {
    req.extensions().get::<Rethrow>().is_some()
}

/// Attaches the component bag
#[derive(Clone)]
pub struct ComponentsLayer {
    components: Components,
}

impl ComponentsLayer {
    /// Inject `components` into every request
    pub fn new(components: Components) -> Self {
        Self { components }
    }
}

impl MiddlewareLayer for ComponentsLayer {
    fn name(&self) -> &'static str {
        "components"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        req.extensions_mut().insert(self.components.clone());
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Attaches the request options
#[derive(Clone)]
pub struct OptionsLayer {
    options: Arc<RequestOptions>,
}

impl OptionsLayer {
    /// Attach `options` to every request
    pub fn new(options: RequestOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

impl MiddlewareLayer for OptionsLayer {
    fn name(&self) -> &'static str {
        "options"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        req.extensions_mut().insert(self.options.clone());
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Overrides the coercion strategy for the requests it wraps
///
/// Mount it around a single route to coerce that route with a different
/// strategy, or with `None` to turn coercion off for it. Other options are
/// kept as attached by the pipeline.
#[derive(Clone)]
pub struct CoercionLayer {
    coercion: Option<Coercion>,
}

impl CoercionLayer {
    /// Use `coercion` for wrapped requests
    pub fn new(coercion: Option<Coercion>) -> Self {
        Self { coercion }
    }
}

impl MiddlewareLayer for CoercionLayer {
    fn name(&self) -> &'static str {
        "coercion"
    }

    fn call(&self, mut req: Request, next: BoxedNext) -> BoxFuture<HandlerResult> {
        let mut options = get_options(&req).cloned().unwrap_or_default();
        options.coercion = self.coercion.clone();
        req.extensions_mut().insert(Arc::new(options));
        next(req)
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}
