//! Configuration management for labgate
//!
//! Configuration is loaded from `~/.labgate/config.json` (or an explicit
//! path) and then overridden by environment variables. A `.env` file in the
//! working directory is read first by the CLI, so its values take part in
//! the overrides.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{GateError, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

impl Config {
    /// Returns the labgate configuration directory path (~/.labgate)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".labgate")
    }

    /// Returns the path to the config file (~/.labgate/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// A missing file yields the default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let raw: serde_json::Value = serde_json::from_str(&content)?;
            for diagnostic in validate::validate_config(&raw) {
                if diagnostic.level != validate::DiagnosticLevel::Ok {
                    warn!(path = %path.display(), "{}", diagnostic);
                }
            }
            serde_json::from_value(raw)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup`.
    ///
    /// Recognised variables: `PORT`, `ALLOWED_ORIGINS` (comma separated),
    /// `DOCKER_CMD` (also selects the CLI runtime), `LABGATE_HOST`,
    /// `LABGATE_RUNTIME`, `LABGATE_COMMAND_TIMEOUT_SECS`,
    /// `LABGATE_LOG_LEVEL`, `LABGATE_LOG_FORMAT`. Unparsable numbers are
    /// ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("PORT") {
            match val.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %val, "Ignoring invalid PORT"),
            }
        }
        if let Some(val) = lookup("LABGATE_HOST") {
            self.server.host = val.trim().to_string();
        }
        if let Some(val) = lookup("ALLOWED_ORIGINS") {
            self.server.allowed_origins = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(val) = lookup("DOCKER_CMD") {
            let val = val.trim();
            if !val.is_empty() {
                self.runtime.docker_cmd = val.to_string();
                self.runtime.runtime_type = RuntimeType::Cli;
            }
        }
        if let Some(val) = lookup("LABGATE_RUNTIME") {
            match val.parse() {
                Ok(runtime_type) => self.runtime.runtime_type = runtime_type,
                Err(e) => warn!("Ignoring LABGATE_RUNTIME: {}", e),
            }
        }
        if let Some(val) = lookup("LABGATE_COMMAND_TIMEOUT_SECS") {
            match val.trim().parse() {
                Ok(secs) => self.executor.default_timeout_secs = secs,
                Err(_) => warn!(value = %val, "Ignoring invalid LABGATE_COMMAND_TIMEOUT_SECS"),
            }
        }
        if let Some(val) = lookup("LABGATE_LOG_LEVEL") {
            self.logging.level = val.trim().to_string();
        }
        if let Some(val) = lookup("LABGATE_LOG_FORMAT") {
            match val.parse() {
                Ok(format) => self.logging.format = format,
                Err(e) => warn!("Ignoring LABGATE_LOG_FORMAT: {}", e),
            }
        }
    }

    /// Check values that would make the gateway misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let exec = &self.executor;
        if exec.default_timeout_secs == 0 {
            return Err(GateError::Config(
                "executor.default_timeout_secs must be greater than 0".into(),
            ));
        }
        if exec.max_timeout_secs < exec.default_timeout_secs {
            return Err(GateError::Config(format!(
                "executor.max_timeout_secs ({}) is below default_timeout_secs ({})",
                exec.max_timeout_secs, exec.default_timeout_secs
            )));
        }
        if exec.output_buffer == 0 {
            return Err(GateError::Config(
                "executor.output_buffer must be greater than 0".into(),
            ));
        }
        if self.session.outbound_buffer == 0 {
            return Err(GateError::Config(
                "session.outbound_buffer must be greater than 0".into(),
            ));
        }
        if self.rate_limit.max_requests > 0 && self.rate_limit.window_secs == 0 {
            return Err(GateError::Config(
                "rate_limit.window_secs must be greater than 0".into(),
            ));
        }
        if self.runtime.runtime_type == RuntimeType::Cli && self.runtime.docker_cmd.trim().is_empty()
        {
            return Err(GateError::Config(
                "runtime.docker_cmd must be set for the cli runtime".into(),
            ));
        }
        for origin in &self.server.allowed_origins {
            if axum::http::HeaderValue::from_str(origin).is_err()
                || !(origin.starts_with("http://") || origin.starts_with("https://"))
            {
                return Err(GateError::Config(format!(
                    "server.allowed_origins: '{}' is not a valid origin",
                    origin
                )));
            }
        }
        Ok(())
    }
}
