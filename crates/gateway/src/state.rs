use std::sync::Arc;

use chrono::{DateTime, Utc};

use portico_domain::config::Config;
use portico_sessions::{ChannelMap, Dispatcher, SessionLockMap, SessionReaper, SessionRegistry};

/// Shared application state passed to all API handlers.
///
/// Handlers go through the dispatcher for anything that mutates a session;
/// the registry and channel map are exposed read-only for health reporting.
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,

    // ── Session lifecycle ─────────────────────────────────────────────
    pub registry: Arc<SessionRegistry>,
    pub channels: Arc<ChannelMap>,
    pub dispatcher: Arc<Dispatcher>,
    pub reaper: Arc<SessionReaper>,
    pub session_locks: Arc<SessionLockMap>,
}
