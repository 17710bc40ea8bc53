//! Push channels — the server→client halves of subscribe streams.
//!
//! Storage only, like the session registry: the keep-alive scheduler and the
//! reaper decide when entries live or die. The sender half of a bounded mpsc
//! channel stands in for the HTTP response stream; `Sender::is_closed`
//! doubles as the stream-closed signal once the client goes away.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use portico_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A frame written to a push channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    /// Periodic keep-alive; carries no payload.
    Heartbeat,
    /// A server-initiated message for the client.
    Message { payload: Value },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Push channel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One live push channel. At most one exists per session id.
#[derive(Debug, Clone)]
pub struct PushChannel {
    pub session_id: String,
    pub sender: mpsc::Sender<PushFrame>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub consecutive_errors: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel map
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory map of open push channels, keyed by session id.
pub struct ChannelMap {
    channels: RwLock<HashMap<String, PushChannel>>,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMap {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a channel for `session_id`, replacing any existing entry.
    pub fn insert(&self, session_id: &str, sender: mpsc::Sender<PushFrame>) -> PushChannel {
        let now = Utc::now();
        let channel = PushChannel {
            session_id: session_id.to_owned(),
            sender,
            started_at: now,
            last_heartbeat: now,
            consecutive_errors: 0,
        };
        self.channels
            .write()
            .insert(session_id.to_owned(), channel.clone());
        channel
    }

    pub fn get(&self, session_id: &str) -> Option<PushChannel> {
        self.channels.read().get(session_id).cloned()
    }

    /// Remove a channel. Dropping the stored sender is what lets the
    /// subscribe stream terminate.
    pub fn remove(&self, session_id: &str) -> Option<PushChannel> {
        self.channels.write().remove(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.channels.read().contains_key(session_id)
    }

    pub fn list(&self) -> Vec<PushChannel> {
        self.channels.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.channels.read().len()
    }

    /// The channel open longest, by `started_at`. Ties are broken by map
    /// iteration order.
    pub fn oldest(&self) -> Option<PushChannel> {
        self.channels
            .read()
            .values()
            .min_by_key(|c| c.started_at)
            .cloned()
    }

    /// Record a successful heartbeat write: reset the error counter and
    /// refresh `last_heartbeat`.
    pub fn record_heartbeat(&self, session_id: &str) {
        let mut channels = self.channels.write();
        if let Some(channel) = channels.get_mut(session_id) {
            channel.consecutive_errors = 0;
            channel.last_heartbeat = Utc::now();
        }
    }

    /// Record a failed heartbeat write and return the new consecutive
    /// count. Returns 0 when the channel is no longer tracked.
    pub fn record_failure(&self, session_id: &str) -> u32 {
        let mut channels = self.channels.write();
        match channels.get_mut(session_id) {
            Some(channel) => {
                channel.consecutive_errors += 1;
                channel.consecutive_errors
            }
            None => 0,
        }
    }

    /// Backdate a channel's start time so lifetime behavior can be tested
    /// without waiting.
    #[cfg(test)]
    pub(crate) fn set_started_at(&self, session_id: &str, when: DateTime<Utc>) {
        let mut channels = self.channels.write();
        if let Some(channel) = channels.get_mut(session_id) {
            channel.started_at = when;
        }
    }

    /// Send a server-initiated message to the session's channel, if one is
    /// open. Does not block: a full buffer is reported as busy.
    pub fn push(&self, session_id: &str, payload: Value) -> Result<()> {
        let channel = self
            .get(session_id)
            .ok_or_else(|| Error::InvalidSession(format!("no push channel for {session_id}")))?;
        match channel.sender.try_send(PushFrame::Message { payload }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(Error::Other(format!("push channel for {session_id} is busy")))
            }
            Err(TrySendError::Closed(_)) => Err(Error::TransportClosed),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
