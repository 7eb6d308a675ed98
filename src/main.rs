//! # Service Router - Main Entry Point
//!
//! Runs a router with request logging and a health endpoint. Services embed the library
//! and register their own routes; this binary is the minimal deployment of the same stack.
//!
//! Configuration is read from the YAML file named by the first argument or by
//! `SERVICE_ROUTER_CONFIG`. Without either, defaults plus `SERVICE_ROUTER_*` environment
//! overrides are used.

use anyhow::Context;
use axum::http::StatusCode;
use serde_json::json;
use tracing::info;

use service_router::middleware::RequestLoggingMiddleware;
use service_router::observability::init_logging;
use service_router::{IncomingRequest, Router, RouterServer, ServiceConfig, ServiceResponse};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!("Starting service router");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let router = build_router().context("Failed to build router")?;
    let server = RouterServer::new(router, &config);
    server.serve().await.context("Server terminated with an error")?;

    info!("Service router shutdown complete");
    Ok(())
}

async fn load_config() -> anyhow::Result<ServiceConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SERVICE_ROUTER_CONFIG").ok());

    match path {
        Some(path) => ServiceConfig::load_from_file(&path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path)),
        None => {
            let mut config = ServiceConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }
}

fn build_router() -> service_router::RouterResult<Router> {
    let mut router = Router::new();
    router
        .use_middleware("/", RequestLoggingMiddleware::default())?
        .get("/health", |_request: IncomingRequest| async {
            ServiceResponse::json(StatusCode::OK, &json!({ "status": "healthy" }))
                .unwrap_or_else(|_| ServiceResponse::empty(StatusCode::INTERNAL_SERVER_ERROR))
        })?;
    Ok(router)
}
