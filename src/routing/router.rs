//! # Router Module
//!
//! Route table, handler trait and the [`Router`] aggregate that ties the middleware chain
//! and the route table together behind a single entry point.
//!
//! ## Dispatch Order
//!
//! 1. Global middleware whose prefix matches the path, in registration order.
//! 2. Route lookup: the first route whose method is equal to the request method and whose
//!    pattern matches the whole path. Later routes with the same method and template are
//!    kept but never reached.
//! 3. The matched route's own middleware, in the order given at registration.
//! 4. The route handler.
//!
//! Parameters captured at each step are layered onto the request context before the next
//! step sees the request. A miss at step 2 yields an empty 404.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<Pipeline>` shares the frozen tables with every in-flight request; registration goes
//!   through `Arc::make_mut`, so a router that is already being served keeps its tables
//!   unchanged
//! - Blanket `impl Handler for F` lets plain async closures and functions be registered

use async_trait::async_trait;
use axum::http::Method;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::error::{RouterError, RouterResult};
use crate::core::types::{IncomingRequest, ServiceResponse};
use crate::middleware::chain::{Middleware, MiddlewareChain, Next};
use crate::routing::pattern::PathPattern;

/// Request handler at the end of the chain
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Produce the response for a matched request
    async fn call(&self, request: IncomingRequest) -> ServiceResponse;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(IncomingRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServiceResponse> + Send + 'static,
{
    async fn call(&self, request: IncomingRequest) -> ServiceResponse {
        (self)(request).await
    }
}

/// A single dispatch entry
pub struct Route {
    method: Method,
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Route {
    /// HTTP method this route answers
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Compiled path pattern
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Number of route-level middleware
    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// Whether this route answers `method` on `path`
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method == *method && self.pattern.is_match(path)
    }

    /// Run route middleware from `position`, then the handler
    pub(crate) async fn resume(
        route: Arc<Route>,
        position: usize,
        request: IncomingRequest,
    ) -> ServiceResponse {
        match route.middleware.get(position) {
            Some(middleware) => {
                let middleware = Arc::clone(middleware);
                debug!(
                    middleware = middleware.name(),
                    route = route.pattern.template(),
                    "Entering route middleware"
                );
                let next = Next::route(route, position + 1);
                middleware.handle(request, next).await
            }
            None => route.handler.call(request).await,
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.template())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Result of a route lookup
#[derive(Debug)]
pub struct RouteMatch<'a> {
    /// Position of the route in the table
    pub index: usize,

    /// The matched route
    pub route: &'a Arc<Route>,

    /// Captured parameters, in template order
    pub params: Vec<(String, String)>,
}

/// Outcome of dispatching a request against the route table
#[derive(Debug)]
pub enum Dispatch {
    /// A route matched and produced this response
    Handled(ServiceResponse),
    /// No route matched the method and path
    NotFound(RouterError),
}

impl Dispatch {
    /// Response to send, turning a miss into an empty 404
    pub fn into_response(self) -> ServiceResponse {
        match self {
            Self::Handled(response) => response,
            Self::NotFound(_) => ServiceResponse::not_found(),
        }
    }

    /// Whether no route matched
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Ordered (method, pattern, handler) entries with first-match-wins lookup
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `template` and append a route
    pub fn add_route<H: Handler>(
        &mut self,
        method: Method,
        template: &str,
        handler: H,
    ) -> RouterResult<()> {
        self.add_route_with(method, template, handler, Vec::new())
    }

    /// Compile `template` and append a route guarded by its own middleware
    pub fn add_route_with<H: Handler>(
        &mut self,
        method: Method,
        template: &str,
        handler: H,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> RouterResult<()> {
        self.add_shared(method, template, Arc::new(handler), middleware)
    }

    /// Append a route whose handler instance may be shared with other routes
    pub fn add_shared(
        &mut self,
        method: Method,
        template: &str,
        handler: Arc<dyn Handler>,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> RouterResult<()> {
        let pattern = PathPattern::route(template)?;

        if self
            .routes
            .iter()
            .any(|route| route.method == method && route.pattern.template() == template)
        {
            debug!(
                method = %method,
                template = template,
                "Route shadowed by an earlier registration"
            );
        }

        debug!(method = %method, template = template, "Registered route");
        self.routes.push(Arc::new(Route {
            method,
            pattern,
            handler,
            middleware,
        }));
        Ok(())
    }

    /// Find the first route answering `method` on `path`
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .enumerate()
            .filter(|(_, route)| route.method == *method)
            .find_map(|(index, route)| {
                route.pattern.captures(path).map(|params| RouteMatch {
                    index,
                    route,
                    params,
                })
            })
    }

    /// Dispatch `request` to the first matching route
    ///
    /// Captured parameters are bound into a new context layer before the route's middleware
    /// and handler run.
    pub async fn dispatch(&self, request: IncomingRequest) -> Dispatch {
        let (route, params) = match self.lookup(&request.method, request.path()) {
            Some(matched) => (Arc::clone(matched.route), matched.params),
            None => {
                return Dispatch::NotFound(RouterError::route_not_found(
                    request.method.as_str(),
                    request.path(),
                ))
            }
        };

        let request = request.with_params(params);
        Dispatch::Handled(Route::resume(route, 0, request).await)
    }

    /// Registered routes in registration order
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().map(|route| route.as_ref())
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Methods registered by [`Router::all`]
pub const ALL_METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::CONNECT,
    Method::HEAD,
    Method::OPTIONS,
    Method::TRACE,
];

/// Frozen middleware chain and route table shared by in-flight requests
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    middleware: MiddlewareChain,
    routes: RouteTable,
}

impl Pipeline {
    /// Run global middleware from entry `from`, then dispatch
    pub(crate) async fn resume(
        pipeline: Arc<Pipeline>,
        from: usize,
        request: IncomingRequest,
    ) -> ServiceResponse {
        let found = pipeline
            .middleware
            .next_match(request.path(), from)
            .map(|(index, entry, bindings)| (index, entry.name().to_string(), bindings));

        if let Some((index, name, bindings)) = found {
            debug!(middleware = %name, position = index, "Entering middleware");
            let request = request.with_params(bindings);
            let middleware = pipeline.middleware_at(index);
            let next = Next::chain(Arc::clone(&pipeline), index + 1);
            return middleware.handle(request, next).await;
        }

        match pipeline.routes.dispatch(request).await {
            Dispatch::Handled(response) => response,
            Dispatch::NotFound(miss) => {
                debug!(reason = %miss, "No route matched");
                metrics::counter!("router_not_found_total").increment(1);
                ServiceResponse::not_found()
            }
        }
    }

    fn middleware_at(&self, index: usize) -> Arc<dyn Middleware> {
        self.middleware.shared_at(index)
    }
}

/// HTTP router: middleware chain plus route table behind one entry point
///
/// Build it during startup with the registration methods, then clone it into the serving
/// loop. Clones share the same tables.
///
/// # Example
/// ```rust
/// use service_router::{IncomingRequest, Router, ServiceResponse};
///
/// let mut router = Router::new();
/// router
///     .get("/books/:bookId", |request: IncomingRequest| async move {
///         let id = request.param("bookId").unwrap_or_default().to_string();
///         ServiceResponse::text(axum::http::StatusCode::OK, id)
///     })
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Router {
    pipeline: Arc<Pipeline>,
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    fn pipeline_mut(&mut self) -> &mut Pipeline {
        Arc::make_mut(&mut self.pipeline)
    }

    /// Register a route for `method`
    pub fn route<H: Handler>(
        &mut self,
        method: Method,
        template: &str,
        handler: H,
    ) -> RouterResult<&mut Self> {
        self.pipeline_mut()
            .routes
            .add_route(method, template, handler)?;
        Ok(self)
    }

    /// Register a route with route-level middleware
    ///
    /// The middleware runs after the global chain and after the route's parameters are
    /// bound, in the order given.
    pub fn route_with<H: Handler>(
        &mut self,
        method: Method,
        template: &str,
        handler: H,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> RouterResult<&mut Self> {
        self.pipeline_mut()
            .routes
            .add_route_with(method, template, handler, middleware)?;
        Ok(self)
    }

    /// Register a GET route
    pub fn get<H: Handler>(&mut self, template: &str, handler: H) -> RouterResult<&mut Self> {
        self.route(Method::GET, template, handler)
    }

    /// Register a POST route
    pub fn post<H: Handler>(&mut self, template: &str, handler: H) -> RouterResult<&mut Self> {
        self.route(Method::POST, template, handler)
    }

    /// Register a PUT route
    pub fn put<H: Handler>(&mut self, template: &str, handler: H) -> RouterResult<&mut Self> {
        self.route(Method::PUT, template, handler)
    }

    /// Register a PATCH route
    pub fn patch<H: Handler>(&mut self, template: &str, handler: H) -> RouterResult<&mut Self> {
        self.route(Method::PATCH, template, handler)
    }

    /// Register a DELETE route
    pub fn delete<H: Handler>(&mut self, template: &str, handler: H) -> RouterResult<&mut Self> {
        self.route(Method::DELETE, template, handler)
    }

    /// Register a HEAD route
    pub fn head<H: Handler>(&mut self, template: &str, handler: H) -> RouterResult<&mut Self> {
        self.route(Method::HEAD, template, handler)
    }

    /// Register an OPTIONS route
    pub fn options<H: Handler>(&mut self, template: &str, handler: H) -> RouterResult<&mut Self> {
        self.route(Method::OPTIONS, template, handler)
    }

    /// Register one handler for every method in [`ALL_METHODS`]
    ///
    /// One route is appended per method, so each keeps its own position in the table.
    pub fn all<H: Handler>(&mut self, template: &str, handler: H) -> RouterResult<&mut Self> {
        PathPattern::route(template)?;

        let handler: Arc<dyn Handler> = Arc::new(handler);
        let routes = &mut self.pipeline_mut().routes;
        for method in ALL_METHODS {
            routes.add_shared(method, template, Arc::clone(&handler), Vec::new())?;
        }
        Ok(self)
    }

    /// Register middleware for every path starting with `prefix`
    pub fn use_middleware<M: Middleware>(
        &mut self,
        prefix: &str,
        middleware: M,
    ) -> RouterResult<&mut Self> {
        self.pipeline_mut().middleware.add(prefix, middleware)?;
        Ok(self)
    }

    /// Register an already shared middleware instance for `prefix`
    pub fn use_shared(
        &mut self,
        prefix: &str,
        middleware: Arc<dyn Middleware>,
    ) -> RouterResult<&mut Self> {
        self.pipeline_mut().middleware.add_shared(prefix, middleware)?;
        Ok(self)
    }

    /// Handle one request through middleware, routing and handler
    #[instrument(
        name = "router.handle",
        skip(self, request),
        fields(request_id = %request.id, method = %request.method, path = %request.path())
    )]
    pub async fn handle(&self, request: IncomingRequest) -> ServiceResponse {
        metrics::counter!("router_requests_total", "method" => request.method.to_string())
            .increment(1);

        let response = Pipeline::resume(Arc::clone(&self.pipeline), 0, request).await;

        debug!(status = response.status.as_u16(), "Request completed");
        response
    }

    /// The route table
    pub fn routes(&self) -> &RouteTable {
        &self.pipeline.routes
    }

    /// The global middleware chain
    pub fn middleware(&self) -> &MiddlewareChain {
        &self.pipeline.middleware
    }
}

/// By-value builder for a [`Router`]
///
/// Registration errors are held until [`RouterBuilder::build`], which reports the first one.
#[derive(Default)]
pub struct RouterBuilder {
    router: Router,
    error: Option<RouterError>,
}

impl RouterBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    fn apply<F>(mut self, register: F) -> Self
    where
        F: FnOnce(&mut Router) -> RouterResult<()>,
    {
        if self.error.is_none() {
            if let Err(err) = register(&mut self.router) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Add a route for `method`
    pub fn route<H: Handler>(self, method: Method, template: &str, handler: H) -> Self {
        self.apply(|router| router.route(method, template, handler).map(|_| ()))
    }

    /// Add a route with route-level middleware
    pub fn route_with<H: Handler>(
        self,
        method: Method,
        template: &str,
        handler: H,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        self.apply(|router| {
            router
                .route_with(method, template, handler, middleware)
                .map(|_| ())
        })
    }

    /// Add a GET route
    pub fn get<H: Handler>(self, template: &str, handler: H) -> Self {
        self.route(Method::GET, template, handler)
    }

    /// Add a POST route
    pub fn post<H: Handler>(self, template: &str, handler: H) -> Self {
        self.route(Method::POST, template, handler)
    }

    /// Add a PUT route
    pub fn put<H: Handler>(self, template: &str, handler: H) -> Self {
        self.route(Method::PUT, template, handler)
    }

    /// Add a PATCH route
    pub fn patch<H: Handler>(self, template: &str, handler: H) -> Self {
        self.route(Method::PATCH, template, handler)
    }

    /// Add a DELETE route
    pub fn delete<H: Handler>(self, template: &str, handler: H) -> Self {
        self.route(Method::DELETE, template, handler)
    }

    /// Add a HEAD route
    pub fn head<H: Handler>(self, template: &str, handler: H) -> Self {
        self.route(Method::HEAD, template, handler)
    }

    /// Add an OPTIONS route
    pub fn options<H: Handler>(self, template: &str, handler: H) -> Self {
        self.route(Method::OPTIONS, template, handler)
    }

    /// Add a route for every method in [`ALL_METHODS`]
    pub fn all<H: Handler>(self, template: &str, handler: H) -> Self {
        self.apply(|router| router.all(template, handler).map(|_| ()))
    }

    /// Add middleware for `prefix`
    pub fn middleware<M: Middleware>(self, prefix: &str, middleware: M) -> Self {
        self.apply(|router| router.use_middleware(prefix, middleware).map(|_| ()))
    }

    /// Build the router, failing on the first registration error
    pub fn build(self) -> RouterResult<Router> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.router),
        }
    }
}
