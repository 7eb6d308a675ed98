//! # Whole-Request Coalescing
//!
//! [`CoalescingRouter`] sits in front of a [`Router`] and lets identical concurrent requests
//! share one trip through the middleware chain and handler. Identity is a SHA-256 digest of
//! the method, the full URI, the configured headers and the body.
//!
//! Only methods listed in the configuration are coalesced (GET and HEAD by default). The
//! `authorization` header is part of the identity by default, so two users never share a
//! response.

use axum::http::Method;
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use tracing::debug;

use crate::caching::coalescing::CoalescingGroup;
use crate::core::config::{CoalescingConfig, RequestCoalescingConfig};
use crate::core::types::{IncomingRequest, ServiceResponse};
use crate::routing::router::Router;

/// Router wrapper that deduplicates identical in-flight requests
#[derive(Debug, Clone)]
pub struct CoalescingRouter {
    router: Router,
    group: CoalescingGroup<ServiceResponse, Infallible>,
    methods: Vec<Method>,
    include_headers: Vec<String>,
}

impl CoalescingRouter {
    /// Wrap `router` using the default request coalescing settings
    pub fn new(router: Router) -> Self {
        Self::with_config(router, &CoalescingConfig::default())
    }

    /// Wrap `router` using `config`
    ///
    /// Methods that do not parse are skipped; `ServiceConfig::validate` reports them.
    pub fn with_config(router: Router, config: &CoalescingConfig) -> Self {
        let RequestCoalescingConfig {
            methods,
            include_headers,
            ..
        } = &config.request;

        Self {
            router,
            group: CoalescingGroup::from_config("requests", config),
            methods: methods
                .iter()
                .filter_map(|m| m.parse::<Method>().ok())
                .collect(),
            include_headers: include_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }

    /// The wrapped router
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Whether requests with `method` are coalesced
    pub fn coalesces(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Handle `request`, sharing the response with identical concurrent requests
    pub async fn handle(&self, request: IncomingRequest) -> ServiceResponse {
        if !self.coalesces(&request.method) {
            return self.router.handle(request).await;
        }

        let key = self.request_key(&request);
        let router = self.router.clone();
        let outcome = self
            .group
            .execute(key, move || async move {
                Ok::<_, Infallible>(router.handle(request).await)
            })
            .await;

        if outcome.shared {
            debug!("Served response from coalesced request");
        }

        match outcome.result {
            Ok(response) => response,
            // Timeout, panic or cancellation of the shared request.
            Err(err) => {
                debug!(error = %err, "Coalesced request failed");
                ServiceResponse::empty(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Identity key for `request`
    pub fn request_key(&self, request: &IncomingRequest) -> String {
        let mut hasher = Sha256::new();

        hasher.update(request.method.as_str());
        hasher.update(b"\n");
        hasher.update(request.uri.to_string());
        hasher.update(b"\n");

        for name in &self.include_headers {
            if let Some(value) = request.headers.get(name.as_str()) {
                hasher.update(name.as_bytes());
                hasher.update(b":");
                hasher.update(value.as_bytes());
                hasher.update(b"\n");
            }
        }

        hasher.update(&request.body);

        format!("request:{}", hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn request(method: Method, uri: &str) -> IncomingRequest {
        IncomingRequest::from_parts(method, uri).unwrap()
    }

    fn coalescer() -> CoalescingRouter {
        let mut router = Router::new();
        router
            .get("/books", |_r: IncomingRequest| async {
                ServiceResponse::text(StatusCode::OK, "books")
            })
            .unwrap();
        CoalescingRouter::new(router)
    }

    #[test]
    fn test_key_is_deterministic() {
        let coalescer = coalescer();
        let a = coalescer.request_key(&request(Method::GET, "/books?page=1"));
        let b = coalescer.request_key(&request(Method::GET, "/books?page=1"));
        let c = coalescer.request_key(&request(Method::GET, "/books?page=2"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("request:"));
    }

    #[test]
    fn test_key_includes_authorization() {
        let coalescer = coalescer();
        let anonymous = request(Method::GET, "/books");
        let mut alice = request(Method::GET, "/books");
        alice
            .headers
            .insert("authorization", HeaderValue::from_static("Bearer alice"));
        let mut bob = request(Method::GET, "/books");
        bob.headers
            .insert("authorization", HeaderValue::from_static("Bearer bob"));

        let keys = [
            coalescer.request_key(&anonymous),
            coalescer.request_key(&alice),
            coalescer.request_key(&bob),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
    }

    #[test]
    fn test_default_methods() {
        let coalescer = coalescer();
        assert!(coalescer.coalesces(&Method::GET));
        assert!(coalescer.coalesces(&Method::HEAD));
        assert!(!coalescer.coalesces(&Method::POST));
    }

    #[tokio::test]
    async fn test_passes_through_to_router() {
        let coalescer = coalescer();
        let response = coalescer.handle(request(Method::GET, "/books")).await;
        assert_eq!(response.body_text(), "books");

        let miss = coalescer.handle(request(Method::POST, "/books")).await;
        assert_eq!(miss.status, StatusCode::NOT_FOUND);
    }
}
