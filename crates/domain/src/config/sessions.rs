use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capacity ceilings and timer cadences for the session layer.
///
/// Two independent ceilings apply: `max_sessions` bounds concurrently held
/// sessions, `max_channels` bounds concurrently open push channels. The
/// admission controller evicts before either ceiling can be exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Maximum concurrently held sessions.
    #[serde(default = "d_max_sessions")]
    pub max_sessions: usize,
    /// Maximum concurrently open push channels.
    #[serde(default = "d_max_channels")]
    pub max_channels: usize,
    /// A session with no activity for this long is reaped.
    #[serde(default = "d_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Unconditional cap on how long any push channel may stay open,
    /// regardless of heartbeat health.
    #[serde(default = "d_channel_lifetime")]
    pub channel_lifetime_secs: u64,
    /// Heartbeat cadence on push channels. Keep under 30s so reverse
    /// proxies with conventional idle timeouts do not cut the stream.
    #[serde(default = "d_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Stale-sweep cadence.
    #[serde(default = "d_reap_interval")]
    pub reap_interval_secs: u64,
    /// Consecutive heartbeat write failures tolerated before the channel
    /// is torn down.
    #[serde(default = "d_max_heartbeat_failures")]
    pub max_heartbeat_failures: u32,
    /// Frame buffer depth per push channel. A full buffer counts as a
    /// recoverable heartbeat failure.
    #[serde(default = "d_channel_buffer")]
    pub channel_buffer: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: d_max_sessions(),
            max_channels: d_max_channels(),
            idle_timeout_secs: d_idle_timeout(),
            channel_lifetime_secs: d_channel_lifetime(),
            heartbeat_interval_secs: d_heartbeat_interval(),
            reap_interval_secs: d_reap_interval(),
            max_heartbeat_failures: d_max_heartbeat_failures(),
            channel_buffer: d_channel_buffer(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_sessions() -> usize {
    100
}
fn d_max_channels() -> usize {
    50
}
fn d_idle_timeout() -> u64 {
    1800
}
fn d_channel_lifetime() -> u64 {
    1800
}
fn d_heartbeat_interval() -> u64 {
    25
}
fn d_reap_interval() -> u64 {
    60
}
fn d_max_heartbeat_failures() -> u32 {
    3
}
fn d_channel_buffer() -> usize {
    16
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_config_empty_toml_uses_all_defaults() {
        let cfg: SessionsConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.max_sessions, 100);
        assert_eq!(cfg.max_channels, 50);
        assert_eq!(cfg.idle_timeout_secs, 1800);
        assert_eq!(cfg.channel_lifetime_secs, 1800);
        assert_eq!(cfg.heartbeat_interval_secs, 25);
        assert_eq!(cfg.reap_interval_secs, 60);
        assert_eq!(cfg.max_heartbeat_failures, 3);
        assert_eq!(cfg.channel_buffer, 16);
    }

    #[test]
    fn sessions_config_partial_override() {
        let toml_str = r#"
            max_sessions = 5
            heartbeat_interval_secs = 10
        "#;
        let cfg: SessionsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.max_sessions, 5);
        assert_eq!(cfg.heartbeat_interval_secs, 10);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.max_channels, 50);
        assert_eq!(cfg.max_heartbeat_failures, 3);
    }
}
