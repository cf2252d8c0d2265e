mod broadcast;
mod camera;
mod observability;
mod printer;
mod server;

pub use broadcast::*;
pub use camera::*;
pub use observability::*;
pub use printer::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Apply `PR_*` environment overrides on top of the file values.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production; tests pass a
    /// closure over a map.  Values that fail to parse are logged and
    /// ignored so a typo never prevents startup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup("PR_PRINTER_ADDRESS").filter(|a| !a.trim().is_empty()) {
            self.printer.address = Some(address.trim().to_owned());
        }
        override_parsed(&lookup, "PR_BROADCAST_INTERVAL_MS", &mut self.broadcast.interval_ms);
        override_parsed(&lookup, "PR_MAX_FPS", &mut self.camera.max_fps);
        override_parsed(&lookup, "PR_COMMAND_TIMEOUT_MS", &mut self.printer.command_timeout_ms);
        override_parsed(&lookup, "PR_STATUS_POLL_MS", &mut self.printer.status_poll_interval_ms);
        override_parsed(&lookup, "PR_CAMERA_FAILURE_THRESHOLD", &mut self.camera.failure_threshold);
        override_parsed(&lookup, "PR_CANDIDATE_RETRIES", &mut self.printer.retries_per_candidate);
        override_parsed(&lookup, "PR_PORT", &mut self.server.port);
        if let Some(endpoint) = lookup("PR_OTLP_ENDPOINT") {
            self.observability.otlp_endpoint = Some(endpoint);
        }
        override_parsed(&lookup, "PR_OTLP_SAMPLE_RATE", &mut self.observability.sample_rate);
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable env override"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.broadcast.interval_ms == 0 {
            errors.push(ConfigError::error(
                "broadcast.interval_ms",
                "interval must be greater than 0",
            ));
        }

        if self.camera.max_fps == 0 {
            errors.push(ConfigError::error("camera.max_fps", "max_fps must be greater than 0"));
        } else if self.camera.max_fps > 60 {
            errors.push(ConfigError::warning(
                "camera.max_fps",
                "more than 60 fps multiplies bandwidth per viewer",
            ));
        }
        if self.camera.failure_threshold == 0 {
            errors.push(ConfigError::error(
                "camera.failure_threshold",
                "threshold must be at least 1",
            ));
        }
        if self.camera.max_buffer_bytes < 64 * 1024 {
            errors.push(ConfigError::error(
                "camera.max_buffer_bytes",
                "buffer must hold at least 64 KiB",
            ));
        }

        if self.printer.command_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "printer.command_timeout_ms",
                "timeout must be greater than 0",
            ));
        }
        if self.printer.status_poll_interval_ms == 0 {
            errors.push(ConfigError::error(
                "printer.status_poll_interval_ms",
                "poll interval must be greater than 0",
            ));
        }
        if self.printer.retries_per_candidate == 0 {
            errors.push(ConfigError::error(
                "printer.retries_per_candidate",
                "at least one attempt per candidate is required",
            ));
        }
        if let Some(address) = &self.printer.address {
            if address.trim().is_empty() {
                errors.push(ConfigError::error(
                    "printer.address",
                    "address must not be blank (omit it to auto-discover)",
                ));
            }
        }

        if !self.observability.sample_rate_in_range() {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                format!("{} is outside 0.0..=1.0", self.observability.sample_rate),
            ));
        }
        if let Some(endpoint) = self.observability.export_endpoint() {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                errors.push(ConfigError::error(
                    "observability.otlp_endpoint",
                    "endpoint must be an http:// or https:// URL",
                ));
            }
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
