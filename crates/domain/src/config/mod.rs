mod observability;
mod server;
mod sessions;

pub use observability::*;
pub use server::*;
pub use sessions::*;

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
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
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

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Server port must be non-zero.
        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        // Server host must not be empty.
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        // Capacity ceilings and timer cadences must all be non-zero.
        for (field, value) in [
            ("sessions.max_sessions", self.sessions.max_sessions as u64),
            ("sessions.max_channels", self.sessions.max_channels as u64),
            ("sessions.idle_timeout_secs", self.sessions.idle_timeout_secs),
            (
                "sessions.channel_lifetime_secs",
                self.sessions.channel_lifetime_secs,
            ),
            (
                "sessions.heartbeat_interval_secs",
                self.sessions.heartbeat_interval_secs,
            ),
            ("sessions.reap_interval_secs", self.sessions.reap_interval_secs),
            (
                "sessions.max_heartbeat_failures",
                self.sessions.max_heartbeat_failures as u64,
            ),
            ("sessions.channel_buffer", self.sessions.channel_buffer as u64),
        ] {
            if value == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        }

        // Heartbeats exist to beat reverse-proxy idle timeouts, which are
        // conventionally 30s. Warn when the interval will not fit.
        if self.sessions.heartbeat_interval_secs >= 30 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "sessions.heartbeat_interval_secs".into(),
                message: "intervals of 30s or more will not keep a conventional \
                          30s proxy idle timeout from firing"
                    .into(),
            });
        }

        // A lifetime shorter than one heartbeat means channels die before
        // their first beat.
        if self.sessions.channel_lifetime_secs < self.sessions.heartbeat_interval_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "sessions.channel_lifetime_secs".into(),
                message: "shorter than one heartbeat interval; channels will be \
                          reaped before their first heartbeat"
                    .into(),
            });
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_clean() {
        let cfg = Config::default();
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "server.port"));
    }

    #[test]
    fn zero_max_sessions_is_an_error() {
        let mut cfg = Config::default();
        cfg.sessions.max_sessions = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error
                && i.field == "sessions.max_sessions"));
    }

    #[test]
    fn slow_heartbeat_is_a_warning() {
        let mut cfg = Config::default();
        cfg.sessions.heartbeat_interval_secs = 45;
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Warning
            && i.field == "sessions.heartbeat_interval_secs"));
    }

    #[test]
    fn wildcard_cors_is_a_warning() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning
                && i.field == "server.cors.allowed_origins"));
    }
}
