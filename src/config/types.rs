//! Configuration type definitions for labgate
//!
//! All sections implement serde traits for JSON serialization and fall back
//! to defaults for any field that is missing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration struct for labgate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP/WebSocket listener
    pub server: ServerConfig,
    /// How the Docker engine is reached
    pub runtime: RuntimeConfig,
    /// Timeouts and process limits
    pub executor: ExecutorConfig,
    /// Validator extensions
    pub security: SecurityConfig,
    /// Per-connection session behaviour
    pub session: SessionConfig,
    /// REST rate limiting
    pub rate_limit: RateLimitConfig,
    /// Log output
    pub logging: LoggingConfig,
}

// ============================================================================
// Server Configuration
// ============================================================================

/// Default origins of the learning app (static site and dev server)
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost:8000", "http://localhost:3000"];

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Browser origins allowed for CORS and WebSocket upgrades
    pub allowed_origins: Vec<String>,
    /// Maximum request body for REST endpoints, in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_body_bytes: 64 * 1024,
        }
    }
}

// ============================================================================
// Runtime Configuration
// ============================================================================

/// Container runtime used for container-targeted commands and status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Native Docker Engine API connection
    #[default]
    Daemon,
    /// Passthrough to a docker CLI binary
    Cli,
}

impl std::str::FromStr for RuntimeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daemon" | "native" => Ok(RuntimeType::Daemon),
            "cli" | "wsl" => Ok(RuntimeType::Cli),
            other => Err(format!("unknown runtime '{}' (expected daemon or cli)", other)),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub runtime_type: RuntimeType,
    /// Binary used by the CLI runtime (e.g. `docker.exe` under WSL)
    pub docker_cmd: String,
    /// Extra or replacement logical targets, merged over the week defaults
    pub targets: HashMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_type: RuntimeType::Daemon,
            docker_cmd: "docker".to_string(),
            targets: HashMap::new(),
        }
    }
}

// ============================================================================
// Executor Configuration
// ============================================================================

/// Process executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Deadline when a request does not ask for one
    pub default_timeout_secs: u64,
    /// Upper bound for requested deadlines
    pub max_timeout_secs: u64,
    /// Heartbeat period for running commands (0 disables)
    pub progress_interval_secs: u64,
    /// Lab directory host commands run in
    pub working_dir: String,
    /// Events buffered per command before the process side waits
    pub output_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            max_timeout_secs: 600,
            progress_interval_secs: 10,
            working_dir: ".".to_string(),
            output_buffer: 64,
        }
    }
}

// ============================================================================
// Security / Session Configuration
// ============================================================================

/// Validator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Base commands accepted without grammar checks, in addition to `kubectl`
    pub extra_base_commands: Vec<String>,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Refuse `execute` until the client has sent `authenticate`
    pub require_authentication: bool,
    /// Permissions granted on `authenticate`
    pub permissions: Vec<String>,
    /// Outbound messages buffered per connection
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            require_authentication: true,
            permissions: vec!["execute_docker_commands".to_string()],
            outbound_buffer: 256,
        }
    }
}

// ============================================================================
// Rate Limit Configuration
// ============================================================================

/// Per-IP request budget for the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window (0 disables limiting)
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 15 * 60,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Compact single-line output with a `component` field
    #[default]
    Component,
    /// JSON lines
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "component" => Ok(LogFormat::Component),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Append logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
