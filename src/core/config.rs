//! # Configuration Module
//!
//! Configuration for a service built on the router: listener settings, request coalescing
//! and logging.
//!
//! ## Key Features
//! - YAML configuration parsing with serde, with defaults for every field
//! - Environment variable overrides (`SERVICE_ROUTER_<SECTION>_<FIELD>`)
//! - Validation with all problems reported at once
//!
//! Route and middleware tables are not part of the configuration: they are registered in
//! code by each service during startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{RouterError, RouterResult};

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener configuration
    pub server: ServerConfig,

    /// Request coalescing configuration
    pub coalescing: CoalescingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from a YAML file, apply environment overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> RouterResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| {
                RouterError::config(format!(
                    "Failed to read config file {}: {}",
                    path.as_ref().display(),
                    e
                ))
            })?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document without applying overrides
    pub fn from_yaml_str(content: &str) -> RouterResult<Self> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(content)
            .map_err(|e| RouterError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Recognized variables: `SERVICE_ROUTER_BIND_ADDRESS`, `SERVICE_ROUTER_PORT`,
    /// `SERVICE_ROUTER_MAX_BODY_SIZE`, `SERVICE_ROUTER_COALESCING_TIMEOUT` (humantime, e.g.
    /// `500ms`), `SERVICE_ROUTER_LOG_LEVEL` and `SERVICE_ROUTER_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) -> RouterResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup` instead of the process environment
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> RouterResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SERVICE_ROUTER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(port) = lookup("SERVICE_ROUTER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| RouterError::config(format!("Invalid SERVICE_ROUTER_PORT: {}", e)))?;
        }

        if let Some(size) = lookup("SERVICE_ROUTER_MAX_BODY_SIZE") {
            self.server.max_body_size = size.parse().map_err(|e| {
                RouterError::config(format!("Invalid SERVICE_ROUTER_MAX_BODY_SIZE: {}", e))
            })?;
        }

        if let Some(timeout) = lookup("SERVICE_ROUTER_COALESCING_TIMEOUT") {
            self.coalescing.timeout = Some(humantime::parse_duration(&timeout).map_err(|e| {
                RouterError::config(format!("Invalid SERVICE_ROUTER_COALESCING_TIMEOUT: {}", e))
            })?);
        }

        if let Some(level) = lookup("SERVICE_ROUTER_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("SERVICE_ROUTER_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem found
    pub fn validate(&self) -> RouterResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.trim().is_empty() {
            errors.push("server.bind_address must not be empty".to_string());
        }

        if self.server.max_body_size == 0 {
            errors.push("server.max_body_size must be greater than zero".to_string());
        }

        if let Some(timeout) = self.coalescing.timeout {
            if timeout.is_zero() {
                errors.push("coalescing.timeout must be greater than zero".to_string());
            }
        }

        for method in &self.coalescing.request.methods {
            if method.parse::<axum::http::Method>().is_err() {
                errors.push(format!("coalescing.request.methods: invalid method '{}'", method));
            }
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            errors.push(format!("logging.level: invalid level '{}'", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RouterError::config(errors.join("; ")))
        }
    }

    /// Socket address string the server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Request coalescing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescingConfig {
    /// Upper bound on a single coalesced computation; `None` waits indefinitely
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Whole-request coalescing in front of the router
    pub request: RequestCoalescingConfig,
}

/// Whole-request coalescing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestCoalescingConfig {
    /// Enable coalescing of identical concurrent requests
    pub enabled: bool,

    /// Methods eligible for coalescing
    pub methods: Vec<String>,

    /// Headers that are part of the request identity
    pub include_headers: Vec<String>,
}

impl Default for RequestCoalescingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            include_headers: vec!["authorization".to_string()],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is not set
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(RouterError::config(format!("Unknown log format '{}'", other))),
        }
    }
}
