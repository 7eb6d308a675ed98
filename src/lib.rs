//! # Service Router - Core Library Crate
//!
//! Shared HTTP routing infrastructure for the CRUD microservices: a pattern-based router
//! with ordered, short-circuiting middleware chains and context-borne path parameters, plus
//! a single-flight coalescing layer that deduplicates concurrent identical reads.
//!
//! ## Request Flow
//!
//! ```text
//! RouterServer (axum fallback)
//!   -> [CoalescingRouter]            identical concurrent requests share one execution
//!   -> Router::handle
//!        -> MiddlewareChain           every matching prefix, registration order
//!        -> RouteTable                first (method, pattern) match wins
//!        -> route middleware
//!        -> Handler
//! ```
//!
//! Services register their routes and middleware during startup, then hand the router to
//! the server. Tables are read-only once serving starts.
//!
//! ## Module Layout
//!
//! - `core`: errors, configuration, request/response/context types
//! - `routing`: pattern compiler, route table and the [`Router`] aggregate
//! - `middleware`: middleware trait, continuation and built-in request logging
//! - `caching`: [`CoalescingGroup`] and whole-request coalescing
//! - `observability`: tracing subscriber setup
//! - `gateway`: the HTTP server adapter

/// Error types, configuration and the request/response/context data model
pub mod core;

/// HTTP server adapter that feeds requests into a [`Router`]
pub mod gateway;

/// Middleware trait, continuation and built-in middleware
pub mod middleware;

/// Path pattern compiler, route table and router
pub mod routing;

/// Structured logging setup
pub mod observability;

/// Single-flight coalescing of concurrent identical work
pub mod caching;

pub use caching::{CoalescingGroup, CoalescingRouter};
pub use core::config::ServiceConfig;
pub use core::error::{CoalesceError, RouterError, RouterResult};
pub use core::types::{param, IncomingRequest, RequestContext, ServiceResponse};
pub use gateway::RouterServer;
pub use middleware::{Middleware, Next};
pub use routing::{Handler, Router, RouterBuilder};
