//! Session teardown and the stale-session reaper.
//!
//! Every path that destroys a session (explicit terminate, transport
//! failure, idle timeout, admission eviction) funnels through the one
//! [`teardown`] routine, so the sequence is always the same: stop the
//! channel, mark the session closed, remove it, close its transport.
//!
//! The reaper is the safety net behind the faster paths. It sweeps on a
//! fixed cadence against a caller-supplied clock, which keeps the sweep
//! logic testable without waiting out real timeouts.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use portico_domain::config::SessionsConfig;
use portico_domain::trace::TraceEvent;

use crate::channel::ChannelMap;
use crate::keepalive::KeepAliveScheduler;
use crate::store::SessionRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Teardown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a session was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Explicit terminate call from the client.
    Terminated,
    /// The transport failed mid-call.
    TransportFailed,
    /// The reaper found the transport closed.
    TransportClosed,
    /// No activity within the idle window.
    IdleTimeout,
    /// Evicted to admit a new session.
    Evicted,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Terminated => "terminated",
            Self::TransportFailed => "transport failed",
            Self::TransportClosed => "transport closed",
            Self::IdleTimeout => "idle timeout",
            Self::Evicted => "evicted",
        };
        f.write_str(s)
    }
}

/// Destroy a session: stop its channel, mark it closed, remove it from the
/// registry, close its transport. Idempotent; returns whether a live
/// session was actually removed.
pub fn teardown(
    registry: &SessionRegistry,
    scheduler: &KeepAliveScheduler,
    session_id: &str,
    reason: TeardownReason,
) -> bool {
    scheduler.stop(session_id, &reason.to_string());
    registry.mark_closed(session_id);

    match registry.remove(session_id) {
        Some(session) => {
            session.transport.close();
            TraceEvent::SessionTornDown {
                session_id: session_id.to_owned(),
                reason: reason.to_string(),
            }
            .emit();
            true
        }
        None => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reaper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What one reaper sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub sessions_reaped: usize,
    pub channels_reaped: usize,
}

/// Periodic sweep over sessions and channels.
///
/// Sessions go first: a session with a closed transport, or one idle past
/// the timeout, is torn down (which also stops its channel). Channels go
/// second to catch strays: orphaned entries, closed streams, and channels
/// past their absolute lifetime.
pub struct SessionReaper {
    registry: Arc<SessionRegistry>,
    channels: Arc<ChannelMap>,
    scheduler: Arc<KeepAliveScheduler>,
    config: SessionsConfig,
}

impl SessionReaper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        channels: Arc<ChannelMap>,
        scheduler: Arc<KeepAliveScheduler>,
        config: SessionsConfig,
    ) -> Self {
        Self {
            registry,
            channels,
            scheduler,
            config,
        }
    }

    /// Run one sweep as of `now`. The background loop passes the real
    /// clock; tests pass whatever instant they need.
    pub fn reap_at(&self, now: DateTime<Utc>) -> ReapStats {
        let mut stats = ReapStats::default();

        for session in self.registry.list() {
            if session.transport.is_closed() {
                if teardown(
                    &self.registry,
                    &self.scheduler,
                    &session.id,
                    TeardownReason::TransportClosed,
                ) {
                    stats.sessions_reaped += 1;
                }
                continue;
            }

            let idle_secs = now.signed_duration_since(session.last_activity).num_seconds();
            if idle_secs > self.config.idle_timeout_secs as i64 {
                tracing::info!(
                    session_id = %session.id,
                    idle_secs,
                    "reaping idle session"
                );
                if teardown(
                    &self.registry,
                    &self.scheduler,
                    &session.id,
                    TeardownReason::IdleTimeout,
                ) {
                    stats.sessions_reaped += 1;
                }
            }
        }

        for channel in self.channels.list() {
            let orphaned = self.registry.get(&channel.session_id).is_none();
            let closed = channel.sender.is_closed();
            let uptime_secs = now.signed_duration_since(channel.started_at).num_seconds();
            let over_lifetime = uptime_secs > self.config.channel_lifetime_secs as i64;

            if orphaned || closed || over_lifetime {
                let reason = if orphaned {
                    "orphaned"
                } else if closed {
                    "stream closed"
                } else {
                    "lifetime cap"
                };
                if self.scheduler.stop(&channel.session_id, reason) {
                    stats.channels_reaped += 1;
                }
            }
        }

        if stats.sessions_reaped > 0 || stats.channels_reaped > 0 {
            TraceEvent::ReaperSweep {
                sessions_reaped: stats.sessions_reaped,
                channels_reaped: stats.channels_reaped,
            }
            .emit();
        }

        stats
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CallTransport, LoopbackTransport};
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        channels: Arc<ChannelMap>,
        scheduler: Arc<KeepAliveScheduler>,
        reaper: SessionReaper,
    }

    fn fixture() -> Fixture {
        let config = SessionsConfig {
            idle_timeout_secs: 1800,
            channel_lifetime_secs: 1800,
            ..Default::default()
        };
        let registry = Arc::new(SessionRegistry::new());
        let channels = Arc::new(ChannelMap::new());
        let scheduler = Arc::new(KeepAliveScheduler::new(
            registry.clone(),
            channels.clone(),
            config.clone(),
        ));
        let reaper = SessionReaper::new(
            registry.clone(),
            channels.clone(),
            scheduler.clone(),
            config,
        );
        Fixture {
            registry,
            channels,
            scheduler,
            reaper,
        }
    }

    fn add_session(fx: &Fixture, id: &str) -> Arc<LoopbackTransport> {
        let transport = Arc::new(LoopbackTransport::new());
        fx.registry.create(id, transport.clone());
        transport
    }

    #[tokio::test]
    async fn fresh_sessions_survive_a_sweep() {
        let fx = fixture();
        add_session(&fx, "s1");
        let stats = fx.reaper.reap_at(Utc::now());
        assert_eq!(stats, ReapStats::default());
        assert_eq!(fx.registry.count(), 1);
    }

    #[tokio::test]
    async fn idle_session_is_reaped_with_its_channel() {
        let fx = fixture();
        add_session(&fx, "s1");
        let (tx, _rx) = mpsc::channel(4);
        fx.scheduler.start("s1", tx);

        // Reap "in the future": idle exceeds 1800s.
        let later = Utc::now() + chrono::Duration::seconds(1801);
        let stats = fx.reaper.reap_at(later);

        assert_eq!(stats.sessions_reaped, 1);
        assert_eq!(fx.registry.count(), 0);
        assert_eq!(fx.channels.count(), 0);
        assert_eq!(fx.scheduler.ticker_count(), 0);
    }

    #[tokio::test]
    async fn closed_transport_is_reaped_regardless_of_activity() {
        let fx = fixture();
        let transport = add_session(&fx, "s1");
        transport.close();

        let stats = fx.reaper.reap_at(Utc::now());
        assert_eq!(stats.sessions_reaped, 1);
        assert_eq!(fx.registry.count(), 0);
    }

    #[tokio::test]
    async fn orphaned_channel_is_swept_within_one_cycle() {
        let fx = fixture();
        // A channel whose session never existed in the registry.
        let (tx, _rx) = mpsc::channel(4);
        fx.channels.insert("ghost", tx);

        let stats = fx.reaper.reap_at(Utc::now());
        assert_eq!(stats.channels_reaped, 1);
        assert_eq!(fx.channels.count(), 0);
    }

    #[tokio::test]
    async fn channel_with_dropped_receiver_is_swept() {
        let fx = fixture();
        add_session(&fx, "s1");
        let (tx, rx) = mpsc::channel(4);
        fx.scheduler.start("s1", tx);
        drop(rx);

        let stats = fx.reaper.reap_at(Utc::now());
        assert_eq!(stats.channels_reaped, 1);
        assert_eq!(fx.channels.count(), 0);
        // The session itself stays; only its stream died.
        assert_eq!(fx.registry.count(), 1);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let fx = fixture();
        add_session(&fx, "s1");
        let (tx, _rx) = mpsc::channel(4);
        fx.scheduler.start("s1", tx);

        assert!(teardown(
            &fx.registry,
            &fx.scheduler,
            "s1",
            TeardownReason::Terminated
        ));
        assert!(!teardown(
            &fx.registry,
            &fx.scheduler,
            "s1",
            TeardownReason::Terminated
        ));
        assert_eq!(fx.registry.count(), 0);
        assert_eq!(fx.channels.count(), 0);
    }

    #[tokio::test]
    async fn teardown_closes_the_transport() {
        let fx = fixture();
        let transport = add_session(&fx, "s1");
        assert!(!transport.is_closed());
        teardown(
            &fx.registry,
            &fx.scheduler,
            "s1",
            TeardownReason::Evicted,
        );
        assert!(transport.is_closed());
    }

    #[test]
    fn reasons_render_for_logs() {
        assert_eq!(TeardownReason::IdleTimeout.to_string(), "idle timeout");
        assert_eq!(TeardownReason::Evicted.to_string(), "evicted");
    }
}
