//! # Error Handling Module
//!
//! This module defines the error types used by the router, the middleware chain and the
//! configuration layer, built with the `thiserror` crate.
//!
//! ## Error Taxonomy
//!
//! - Registration-time errors (`InvalidPattern`) are returned while routes and middleware are
//!   being registered, so a bad template stops the service at startup instead of making every
//!   request fall through.
//! - `RouteNotFound` is the only failure the router itself produces while serving. It maps to
//!   a bodiless 404 and is expected traffic, not an application error.
//! - Failures of a coalesced computation are modelled separately by [`CoalesceError`], which
//!   wraps the caller's own error type without translating it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the crate
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors produced by the routing core and its ambient layers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// A route or middleware template could not be compiled
    #[error("Invalid path template '{template}': {reason}")]
    InvalidPattern { template: String, reason: String },

    /// No route matched the request method and path
    #[error("No route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// Configuration-related errors (invalid values, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Request body exceeded the configured limit
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// Internal errors for unexpected failures
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RouterError {
    /// Create an invalid pattern error for the given template
    pub fn invalid_pattern<T: Into<String>, R: Into<String>>(template: T, reason: R) -> Self {
        Self::InvalidPattern {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Create a route not found error
    pub fn route_not_found<M: Into<String>, P: Into<String>>(method: M, path: P) -> Self {
        Self::RouteNotFound {
            method: method.into(),
            path: path.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code that corresponds to this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidPattern { .. }
            | Self::Configuration { .. }
            | Self::Io { .. }
            | Self::Yaml { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error was caused by the client rather than the service
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Stable machine-readable identifier for the error kind
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Configuration { .. } => "configuration_error",
            Self::BodyTooLarge { .. } => "body_too_large",
            Self::Io { .. } => "io_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RouterError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // A miss is a plain 404 with no body.
        if let Self::RouteNotFound { .. } = self {
            return status.into_response();
        }

        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

/// Failure delivered to every caller of a coalesced computation
///
/// `Compute` carries the computation's own error verbatim. The remaining variants describe
/// ways the shared computation ended without producing a value; every waiter on the key
/// receives the same variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoalesceError<E> {
    /// The computation returned an error
    #[error("{0}")]
    Compute(E),

    /// The computation exceeded the group's timeout
    #[error("Computation for key '{key}' timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    /// The computation panicked
    #[error("Computation for key '{key}' panicked")]
    Panicked { key: String },

    /// The computation was cancelled before completing (runtime shutdown)
    #[error("Computation for key '{key}' was cancelled")]
    Cancelled { key: String },
}

impl<E> CoalesceError<E> {
    /// Borrow the computation's own error, if that is what failed
    pub fn compute_error(&self) -> Option<&E> {
        match self {
            Self::Compute(err) => Some(err),
            _ => None,
        }
    }

    /// Take the computation's own error, if that is what failed
    pub fn into_compute_error(self) -> Option<E> {
        match self {
            Self::Compute(err) => Some(err),
            _ => None,
        }
    }
}
