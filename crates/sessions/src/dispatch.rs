//! Request dispatcher — the state machine in front of the session layer.
//!
//! Every inbound call lands here with at most a session id attached, and
//! the dispatcher decides what that means: a fresh `initialize` mints a
//! session, a routed call resolves one and forwards through its transport,
//! a subscribe opens the push channel, a terminate destroys everything.
//! Calls against the same session are serialized through [`SessionLockMap`]
//! so transports never see interleaved requests.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use portico_domain::config::SessionsConfig;
use portico_domain::error::{Error, Result};
use portico_domain::rpc::{RpcCall, RpcResponse};
use portico_domain::trace::TraceEvent;

use crate::admission::AdmissionController;
use crate::channel::{ChannelMap, PushFrame};
use crate::keepalive::KeepAliveScheduler;
use crate::lifecycle::{teardown, TeardownReason};
use crate::lock::SessionLockMap;
use crate::store::{Session, SessionRegistry, SessionState};
use crate::transport::TransportFactory;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    channels: Arc<ChannelMap>,
    scheduler: Arc<KeepAliveScheduler>,
    admission: Arc<AdmissionController>,
    locks: Arc<SessionLockMap>,
    factory: Arc<dyn TransportFactory>,
    config: SessionsConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SessionRegistry>,
        channels: Arc<ChannelMap>,
        scheduler: Arc<KeepAliveScheduler>,
        admission: Arc<AdmissionController>,
        locks: Arc<SessionLockMap>,
        factory: Arc<dyn TransportFactory>,
        config: SessionsConfig,
    ) -> Self {
        Self {
            registry,
            channels,
            scheduler,
            admission,
            locks,
            factory,
            config,
        }
    }

    /// Handle a call that arrived without a session id. Only `initialize`
    /// is allowed to; everything else was routed to the wrong place.
    ///
    /// Mints a fresh id, admits it (evicting if at the ceiling), builds the
    /// transport, and routes the call through it. On transport failure the
    /// half-built session is torn down before the error propagates.
    pub async fn initialize(&self, call: RpcCall) -> Result<(String, Option<RpcResponse>)> {
        call.validate()?;
        if !call.is_initialize() {
            return Err(Error::InvalidRequest(format!(
                "method {:?} requires a session id",
                call.method
            )));
        }

        self.admission.admit_session()?;

        let session_id = Uuid::new_v4().to_string();
        let transport = self.factory.create(&session_id)?;
        self.registry.create(&session_id, transport.clone());

        let started = Instant::now();
        match transport.handle(call).await {
            Ok(response) => {
                self.registry.touch(&session_id);
                TraceEvent::CallRouted {
                    session_id: session_id.clone(),
                    method: "initialize".into(),
                    ok: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
                .emit();
                Ok((session_id, response))
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %err,
                    "initialize failed at the transport; rolling the session back"
                );
                teardown(
                    &self.registry,
                    &self.scheduler,
                    &session_id,
                    TeardownReason::TransportFailed,
                );
                Err(err)
            }
        }
    }

    /// Route a call to an existing session.
    ///
    /// The session is resolved twice: once before queueing on the call
    /// lock (cheap fast-fail) and again after acquiring it, because the
    /// session can be evicted or terminated while the call waits its turn.
    pub async fn dispatch(&self, session_id: &str, call: RpcCall) -> Result<Option<RpcResponse>> {
        call.validate()?;
        let method = call.method.clone();

        self.resolve(session_id)?;
        let _permit = self.locks.acquire(session_id).await?;
        let session = self.resolve(session_id)?;

        let started = Instant::now();
        match session.transport.handle(call).await {
            Ok(response) => {
                self.registry.touch(session_id);
                TraceEvent::CallRouted {
                    session_id: session_id.to_owned(),
                    method,
                    ok: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
                .emit();
                Ok(response)
            }
            Err(err) => {
                TraceEvent::CallRouted {
                    session_id: session_id.to_owned(),
                    method,
                    ok: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
                .emit();
                tracing::warn!(
                    session_id = %session_id,
                    error = %err,
                    "transport failed mid-call; tearing the session down"
                );
                teardown(
                    &self.registry,
                    &self.scheduler,
                    session_id,
                    TeardownReason::TransportFailed,
                );
                Err(err)
            }
        }
    }

    /// Open a push channel for a session and return the receiving half for
    /// the response stream. Replaces the session's previous channel if one
    /// is still open.
    pub fn subscribe(&self, session_id: &str) -> Result<mpsc::Receiver<PushFrame>> {
        self.resolve(session_id)?;

        // Replace before admitting so the session's own old channel frees
        // its slot instead of forcing an eviction.
        if self.channels.contains(session_id) {
            self.scheduler.stop(session_id, "replaced");
        }
        self.admission.admit_channel()?;

        let (tx, rx) = mpsc::channel(self.config.channel_buffer);
        if !self.scheduler.start(session_id, tx) {
            // Saturated between admit and start; the sender just dropped,
            // so the stream below will end immediately.
            tracing::debug!(session_id = %session_id, "keep-alive refused after admission");
        }
        self.registry.touch(session_id);
        Ok(rx)
    }

    /// Destroy a session explicitly. Unknown ids are an error so the caller
    /// can distinguish "deleted" from "never existed"; repeating the call
    /// for an id that was just torn down reports the same.
    pub fn terminate(&self, session_id: &str) -> Result<()> {
        if self.registry.get(session_id).is_none() {
            return Err(Error::InvalidSession(format!(
                "unknown session {session_id}"
            )));
        }
        teardown(
            &self.registry,
            &self.scheduler,
            session_id,
            TeardownReason::Terminated,
        );
        Ok(())
    }

    /// Push a server-initiated message to a session's open channel.
    pub fn push(&self, session_id: &str, payload: Value) -> Result<()> {
        self.resolve(session_id)?;
        self.channels.push(session_id, payload)
    }

    /// Look up a session fit to take calls. Unknown, closed, and
    /// transport-dead sessions all resolve to [`Error::InvalidSession`].
    fn resolve(&self, session_id: &str) -> Result<Session> {
        let session = self.registry.get(session_id).ok_or_else(|| {
            Error::InvalidSession(format!("unknown session {session_id}"))
        })?;
        if session.state == SessionState::Closed {
            return Err(Error::InvalidSession(format!(
                "session {session_id} is closed"
            )));
        }
        if session.transport.is_closed() {
            return Err(Error::InvalidSession(format!(
                "transport for session {session_id} is closed"
            )));
        }
        Ok(session)
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        self.diagnostics_at(Utc::now())
    }

    /// Snapshot the session and channel tables as of `now`.
    pub fn diagnostics_at(&self, now: DateTime<Utc>) -> DiagnosticsReport {
        let mut sessions = self.registry.list();
        sessions.sort_by_key(|s| s.created_at);
        let session_summaries = sessions
            .iter()
            .map(|s| SessionSummary {
                id_prefix: short_id(&s.id),
                state: s.state,
                created_at: s.created_at,
                idle_minutes: now.signed_duration_since(s.last_activity).num_minutes(),
                transport_closed: s.transport.is_closed(),
            })
            .collect();

        let mut channels = self.channels.list();
        channels.sort_by_key(|c| c.started_at);
        let healthy_window = 2 * self.config.heartbeat_interval_secs as i64;
        let channel_summaries = channels
            .iter()
            .map(|c| {
                let last_heartbeat_secs =
                    now.signed_duration_since(c.last_heartbeat).num_seconds();
                ChannelSummary {
                    session_id_prefix: short_id(&c.session_id),
                    uptime_secs: now.signed_duration_since(c.started_at).num_seconds(),
                    last_heartbeat_secs,
                    consecutive_errors: c.consecutive_errors,
                    healthy: !c.sender.is_closed() && last_heartbeat_secs <= healthy_window,
                }
            })
            .collect();

        DiagnosticsReport {
            sessions: sessions.len(),
            max_sessions: self.config.max_sessions,
            channels: channels.len(),
            max_channels: self.config.max_channels,
            session_summaries,
            channel_summaries,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Diagnostics report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub sessions: usize,
    pub max_sessions: usize,
    pub channels: usize,
    pub max_channels: usize,
    pub session_summaries: Vec<SessionSummary>,
    pub channel_summaries: Vec<ChannelSummary>,
}

/// One registry row, with the id truncated for logs and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id_prefix: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub idle_minutes: i64,
    pub transport_closed: bool,
}

/// One channel row. A channel is healthy while its stream is open and the
/// last heartbeat landed within two intervals.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub session_id_prefix: String,
    pub uptime_secs: i64,
    pub last_heartbeat_secs: i64,
    pub consecutive_errors: u32,
    pub healthy: bool,
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
