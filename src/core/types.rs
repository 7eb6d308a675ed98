//! # Core Types Module
//!
//! Request, response and context types shared by the router, the middleware chain and the
//! handlers registered by each service.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` links context layers together so extending a context never copies or mutates
//!   the layers below it
//! - `dyn Any + Send + Sync` with `downcast_ref` gives typed access to values attached by
//!   middleware (an authenticated identity, a loaded record)
//! - `Bytes` keeps request and response bodies cheap to clone, which matters when one
//!   response is fanned out to several coalesced callers

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Inbound request as seen by middleware and handlers
///
/// The request carries its own [`RequestContext`], so a middleware that rewrites the request
/// before calling the continuation (attaching an identity, binding a parameter) hands the
/// extended context to every later stage.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// Unique identifier for this request (for tracing and logging)
    pub id: String,

    /// HTTP method
    pub method: Method,

    /// Request URI including path and query
    pub uri: Uri,

    /// Request headers
    pub headers: HeaderMap,

    /// Request body
    pub body: Bytes,

    /// Client's remote address, when the transport knows it
    pub remote_addr: Option<SocketAddr>,

    /// Timestamp when the request was received
    pub received_at: Instant,

    /// Parameters and values bound while the request moves through the router
    pub context: RequestContext,
}

impl IncomingRequest {
    /// Create a new request with a generated ID and an empty context
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            uri,
            headers,
            body,
            remote_addr: None,
            received_at: Instant::now(),
            context: RequestContext::new(),
        }
    }

    /// Build a bodiless request for `method` and `uri`
    ///
    /// Fails when `uri` cannot be parsed.
    pub fn from_parts(method: Method, uri: &str) -> Result<Self, axum::http::uri::InvalidUri> {
        Ok(Self::new(method, uri.parse()?, HeaderMap::new(), Bytes::new()))
    }

    /// Set the client's remote address
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Get the request path without query parameters
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Get query parameters as a string
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Get a decoded query parameter by name (first occurrence wins)
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Get a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Read a bound path parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.context.param(name)
    }

    /// Read a typed value attached by an earlier stage
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.value::<T>()
    }

    /// Bind a single parameter in a new context layer
    pub fn with_param<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.context = self.context.with_params([(name.into(), value.into())]);
        self
    }

    /// Bind several parameters in one new context layer
    pub fn with_params<I>(mut self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.context = self.context.with_params(bindings);
        self
    }

    /// Attach a typed value in a new context layer
    pub fn with_value<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.context = self.context.with_value(value);
        self
    }

    /// Time spent since the request was received
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Outbound response produced by a handler or a short-circuiting middleware
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// Response headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,
}

impl ServiceResponse {
    /// Create a new response
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Response with the given status and no body
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }

    /// Empty 200 response
    pub fn ok() -> Self {
        Self::empty(StatusCode::OK)
    }

    /// Empty 404 response returned when nothing matched
    pub fn not_found() -> Self {
        Self::empty(StatusCode::NOT_FOUND)
    }

    /// Create a simple text response
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::new(status, headers, text.into())
    }

    /// Create a JSON response
    pub fn json<T: Serialize>(status: StatusCode, data: &T) -> Result<Self, serde_json::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = serde_json::to_vec(data)?;
        Ok(Self::new(status, headers, body))
    }

    /// Add or replace a header
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Body as UTF-8 text, lossily decoded
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl IntoResponse for ServiceResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(axum::body::Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

enum Layer {
    Params(Vec<(String, String)>),
    Value(Arc<dyn Any + Send + Sync>),
}

struct Scope {
    layer: Layer,
    parent: Option<Arc<Scope>>,
}

/// Per-request scope of parameter bindings and typed values
///
/// A context is an immutable stack of layers. `with_params` and `with_value` return a new
/// context whose top layer holds the new bindings and whose parent is the previous context,
/// which is left untouched. Lookups walk from the newest layer down, so when a name is bound
/// twice (once by a middleware's prefix capture, once by the route) the latest binding wins.
#[derive(Clone, Default)]
pub struct RequestContext {
    top: Option<Arc<Scope>>,
}

impl RequestContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self { top: None }
    }

    fn push(&self, layer: Layer) -> Self {
        Self {
            top: Some(Arc::new(Scope {
                layer,
                parent: self.top.clone(),
            })),
        }
    }

    fn scopes(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(self.top.as_deref(), |scope| scope.parent.as_deref())
    }

    /// Layer a batch of parameter bindings on top of this context
    pub fn with_params<I>(&self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let bindings: Vec<(String, String)> = bindings.into_iter().collect();
        if bindings.is_empty() {
            return self.clone();
        }
        self.push(Layer::Params(bindings))
    }

    /// Layer a typed value on top of this context
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        self.push(Layer::Value(Arc::new(value)))
    }

    /// Most recent binding for `name`, or `None` when it was never bound
    pub fn param(&self, name: &str) -> Option<&str> {
        self.scopes().find_map(|scope| match &scope.layer {
            // Within one layer the later binding wins as well.
            Layer::Params(bindings) => bindings
                .iter()
                .rev()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            Layer::Value(_) => None,
        })
    }

    /// Most recently attached value of type `T`
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.scopes().find_map(|scope| match &scope.layer {
            Layer::Value(value) => value.downcast_ref::<T>(),
            Layer::Params(_) => None,
        })
    }

    /// All visible parameter bindings, newest binding per name
    pub fn params(&self) -> HashMap<String, String> {
        let mut visible = HashMap::new();
        for scope in self.scopes() {
            if let Layer::Params(bindings) = &scope.layer {
                for (key, value) in bindings.iter().rev() {
                    visible
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        visible
    }

    /// Number of layers in this context
    pub fn depth(&self) -> usize {
        self.scopes().count()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("depth", &self.depth())
            .field("params", &self.params())
            .finish()
    }
}

/// Read a path parameter from a context
pub fn param<'a>(context: &'a RequestContext, name: &str) -> Option<&'a str> {
    context.param(name)
}
