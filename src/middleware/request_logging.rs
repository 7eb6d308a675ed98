use async_trait::async_trait;
use axum::http::HeaderMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::core::types::{IncomingRequest, ServiceResponse};
use crate::middleware::chain::{Middleware, Next};

/// Logs method, path, status and latency of every request passing through it
///
/// Register it first on `/` so the logged latency covers the rest of the chain.
#[derive(Debug, Clone)]
pub struct RequestLoggingMiddleware {
    log_headers: bool,
    excluded_headers: Vec<String>,
}

impl Default for RequestLoggingMiddleware {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RequestLoggingMiddleware {
    pub fn new(log_headers: bool) -> Self {
        Self {
            log_headers,
            excluded_headers: vec!["authorization".to_string(), "cookie".to_string()],
        }
    }

    /// Header names never written to the log
    pub fn with_excluded_headers(mut self, headers: Vec<String>) -> Self {
        self.excluded_headers = headers
            .into_iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        self
    }

    fn loggable_headers(&self, headers: &HeaderMap) -> Vec<String> {
        headers
            .iter()
            .filter(|(name, _)| !self.excluded_headers.iter().any(|h| h == name.as_str()))
            .map(|(name, value)| format!("{}={}", name, value.to_str().unwrap_or("<binary>")))
            .collect()
    }
}

#[async_trait]
impl Middleware for RequestLoggingMiddleware {
    fn name(&self) -> &str {
        "request_logging"
    }

    async fn handle(&self, request: IncomingRequest, next: Next) -> ServiceResponse {
        let start_time = Instant::now();
        let method = request.method.clone();
        let path = request.path().to_string();
        let request_id = request.id.clone();

        if self.log_headers {
            debug!(
                request_id = %request_id,
                headers = ?self.loggable_headers(&request.headers),
                "Request headers"
            );
        }

        let response = next.run(request).await;
        let duration = start_time.elapsed();

        if response.status.is_server_error() {
            warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = response.status.as_u16(),
                duration_ms = duration.as_millis() as u64,
                "Request failed"
            );
        } else {
            info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = response.status.as_u16(),
                duration_ms = duration.as_millis() as u64,
                "Request processed"
            );
        }

        response
    }
}
