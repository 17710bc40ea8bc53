use serde::Serialize;

/// Structured trace events emitted across all Portico crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
    },
    SessionTornDown {
        session_id: String,
        reason: String,
    },
    SessionEvicted {
        session_id: String,
        idle_secs: i64,
    },
    CallRouted {
        session_id: String,
        method: String,
        ok: bool,
        duration_ms: u64,
    },
    ChannelStarted {
        session_id: String,
    },
    ChannelStopped {
        session_id: String,
        reason: String,
        uptime_secs: i64,
    },
    HeartbeatFailure {
        session_id: String,
        consecutive: u32,
        recoverable: bool,
    },
    ReaperSweep {
        sessions_reaped: usize,
        channels_reaped: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "portico_event");
    }
}
