//! # Middleware Chain
//!
//! Ordered list of (prefix pattern, middleware) entries with explicit continuations.
//!
//! For each request the chain visits its entries in registration order. Every entry whose
//! prefix pattern matches the current request path is invoked with a [`Next`] continuation:
//!
//! - calling `next.run(request).await` proceeds to the next matching entry and, once the chain
//!   is exhausted, to route dispatch;
//! - returning without calling it short-circuits the request. The returned response is final
//!   and no later middleware or handler runs.
//!
//! `Next::run` takes `self` by value, so a continuation can be invoked at most once.
//!
//! There is no specificity ordering. A middleware on `/api` registered before one on
//! `/api/v1/books` runs first for `/api/v1/books/1`, and both run.
//!
//! ## Rust Concepts Used
//! - `async_trait` for the async `handle` method on trait objects
//! - `Pin<Box<dyn Future>>` as the continuation's return type, which lets the chain recurse
//!   through middleware, route middleware and handlers without an infinitely sized future

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::core::error::RouterResult;
use crate::core::types::{IncomingRequest, ServiceResponse};
use crate::routing::pattern::PathPattern;
use crate::routing::router::{Pipeline, Route};

/// Boxed future resolving to the final response of a chain stage
pub type ResponseFuture = Pin<Box<dyn Future<Output = ServiceResponse> + Send + 'static>>;

/// A chain stage that may inspect, rewrite, forward or answer a request
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Handle the request, optionally forwarding it through `next`
    async fn handle(&self, request: IncomingRequest, next: Next) -> ServiceResponse;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(IncomingRequest, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServiceResponse> + Send + 'static,
{
    async fn handle(&self, request: IncomingRequest, next: Next) -> ServiceResponse {
        (self)(request, next).await
    }
}

/// One registered middleware with its prefix pattern
pub struct MiddlewareEntry {
    pattern: PathPattern,
    middleware: Arc<dyn Middleware>,
}

impl MiddlewareEntry {
    /// Prefix pattern this entry matches against
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Name of the wrapped middleware
    pub fn name(&self) -> &str {
        self.middleware.name()
    }
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("pattern", &self.pattern.template())
            .field("middleware", &self.name())
            .finish()
    }
}

/// Ordered middleware entries
#[derive(Debug, Clone, Default)]
pub struct MiddlewareChain {
    entries: Vec<Arc<MiddlewareEntry>>,
}

impl MiddlewareChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `prefix` and append a middleware entry
    pub fn add<M: Middleware>(&mut self, prefix: &str, middleware: M) -> RouterResult<()> {
        self.add_shared(prefix, Arc::new(middleware))
    }

    /// Append an already shared middleware instance
    pub fn add_shared(&mut self, prefix: &str, middleware: Arc<dyn Middleware>) -> RouterResult<()> {
        let pattern = PathPattern::prefix(prefix)?;
        debug!(prefix = prefix, middleware = middleware.name(), "Registered middleware");
        self.entries.push(Arc::new(MiddlewareEntry {
            pattern,
            middleware,
        }));
        Ok(())
    }

    /// First entry at or after `from` matching `path`, with its captured bindings
    pub fn next_match(
        &self,
        path: &str,
        from: usize,
    ) -> Option<(usize, &MiddlewareEntry, Vec<(String, String)>)> {
        self.entries
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(index, entry)| {
                entry
                    .pattern
                    .captures(path)
                    .map(|bindings| (index, entry.as_ref(), bindings))
            })
    }

    pub(crate) fn shared_at(&self, index: usize) -> Arc<dyn Middleware> {
        Arc::clone(&self.entries[index].middleware)
    }

    /// All entries matching `path`, in the order they would run
    pub fn matching<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a MiddlewareEntry> + 'a {
        self.entries
            .iter()
            .map(|entry| entry.as_ref())
            .filter(move |entry| entry.pattern.is_match(path))
    }

    /// Registered entries in registration order
    pub fn entries(&self) -> impl Iterator<Item = &MiddlewareEntry> {
        self.entries.iter().map(|entry| entry.as_ref())
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no middleware is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum Stage {
    /// Global chain, resuming at entry `from`
    Chain { pipeline: Arc<Pipeline>, from: usize },
    /// Route-level middleware of a matched route, resuming at `position`
    Route { route: Arc<Route>, position: usize },
}

/// Continuation handed to a middleware
///
/// Consuming it with [`Next::run`] forwards the request to the rest of the chain. Dropping
/// it instead ends the request with the middleware's own response.
pub struct Next {
    stage: Stage,
}

impl Next {
    pub(crate) fn chain(pipeline: Arc<Pipeline>, from: usize) -> Self {
        Self {
            stage: Stage::Chain { pipeline, from },
        }
    }

    pub(crate) fn route(route: Arc<Route>, position: usize) -> Self {
        Self {
            stage: Stage::Route { route, position },
        }
    }

    /// Forward `request` to the next stage and resolve to the final response
    pub fn run(self, request: IncomingRequest) -> ResponseFuture {
        match self.stage {
            Stage::Chain { pipeline, from } => Box::pin(async move {
                Pipeline::resume(pipeline, from, request).await
            }),
            Stage::Route { route, position } => Box::pin(async move {
                Route::resume(route, position, request).await
            }),
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Stage::Chain { from, .. } => f.debug_struct("Next").field("chain_from", from).finish(),
            Stage::Route { route, position } => f
                .debug_struct("Next")
                .field("route", &route.pattern().template())
                .field("position", position)
                .finish(),
        }
    }
}
