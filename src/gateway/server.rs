//! # HTTP Server Module
//!
//! Adapts the router to a listening socket using the Axum framework. Every request is
//! collected into an [`IncomingRequest`] (body read up to the configured limit) and handed
//! to [`Router::handle`], or to a [`CoalescingRouter`] in front of it when request
//! coalescing is enabled.
//!
//! Axum only provides the transport here: all routing happens in the crate's own router
//! through a catch-all fallback.
//!
//! ## Rust Concepts Used
//!
//! - `axum::serve` with `into_make_service_with_connect_info` to expose the peer address
//! - `with_graceful_shutdown` driven by `tokio::signal::ctrl_c`

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router as AxumRouter,
};
use http_body_util::LengthLimitError;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use crate::caching::request_coalescer::CoalescingRouter;
use crate::core::config::ServiceConfig;
use crate::core::error::{RouterError, RouterResult};
use crate::core::types::{IncomingRequest, ServiceResponse};
use crate::routing::router::Router;

/// Where collected requests are sent
#[derive(Debug, Clone)]
enum Dispatcher {
    Direct(Router),
    Coalescing(CoalescingRouter),
}

impl Dispatcher {
    async fn handle(&self, request: IncomingRequest) -> ServiceResponse {
        match self {
            Self::Direct(router) => router.handle(request).await,
            Self::Coalescing(coalescer) => coalescer.handle(request).await,
        }
    }
}

/// Shared server state
#[derive(Debug, Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    max_body_size: usize,
}

/// HTTP front end for a [`Router`]
#[derive(Debug)]
pub struct RouterServer {
    bind_addr: String,
    app: AxumRouter,
}

impl RouterServer {
    /// Create a server for `router` using `config`
    pub fn new(router: Router, config: &ServiceConfig) -> Self {
        let dispatcher = if config.coalescing.request.enabled {
            info!(
                methods = ?config.coalescing.request.methods,
                "Request coalescing enabled"
            );
            Dispatcher::Coalescing(CoalescingRouter::with_config(router, &config.coalescing))
        } else {
            Dispatcher::Direct(router)
        };

        let state = ServerState {
            dispatcher,
            max_body_size: config.server.max_body_size,
        };

        let app = AxumRouter::new()
            .fallback(handle_request)
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        Self {
            bind_addr: config.bind_addr(),
            app,
        }
    }

    /// Address the server binds to
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// The underlying Axum application
    pub fn app(&self) -> AxumRouter {
        self.app.clone()
    }

    /// Bind the configured address and serve until Ctrl-C
    #[instrument(skip(self), fields(bind_addr = %self.bind_addr))]
    pub async fn serve(self) -> RouterResult<()> {
        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            RouterError::internal(format!("Failed to bind server to {}: {}", self.bind_addr, e))
        })?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already bound listener until Ctrl-C
    pub async fn serve_with_listener(self, listener: TcpListener) -> RouterResult<()> {
        let local_addr = listener.local_addr()?;
        info!("HTTP server listening on {}", local_addr);

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RouterError::internal(format!("Server error: {}", e)))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
    }
}

/// Catch-all handler: collect the request and hand it to the router
async fn handle_request(State(state): State<ServerState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) if exceeds_limit(&e) => {
            warn!(
                path = %parts.uri.path(),
                limit = state.max_body_size,
                "Request body exceeds maximum size"
            );
            return RouterError::BodyTooLarge {
                limit: state.max_body_size,
            }
            .into_response();
        }
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let mut request = IncomingRequest::new(parts.method, parts.uri, parts.headers, body);
    if let Some(addr) = remote_addr {
        request = request.with_remote_addr(addr);
    }

    debug!(
        request_id = %request.id,
        method = %request.method,
        path = %request.path(),
        "Processing incoming request"
    );

    state.dispatcher.handle(request).await.into_response()
}

fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.is::<LengthLimitError>() {
            return true;
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr_from_config() {
        let mut config = ServiceConfig::default();
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = 9090;

        let server = RouterServer::new(Router::new(), &config);
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_coalescing_dispatcher_reaches_router() {
        let request = IncomingRequest::from_parts(axum::http::Method::GET, "/missing").unwrap();
        let response = Dispatcher::Coalescing(CoalescingRouter::new(Router::new()))
            .handle(request)
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(response.body.is_empty());
    }
}
