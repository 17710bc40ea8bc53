//! Keep-alive scheduler — one repeating timer per push channel.
//!
//! Every open channel gets a spawned ticker that writes a heartbeat frame
//! each interval. The tick itself is synchronous bookkeeping around a
//! non-blocking `try_send`: a full buffer is transient backpressure and
//! retried, a dropped receiver is fatal. Terminal conditions (lifetime cap,
//! missing session, closed stream, exhausted retry budget) remove the
//! channel and cancel the timer from inside the tick; `stop` does the same
//! from outside via the stored `JoinHandle`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use portico_domain::config::SessionsConfig;
use portico_domain::trace::TraceEvent;

use crate::channel::{ChannelMap, PushFrame};
use crate::store::SessionRegistry;

/// Owns the per-channel heartbeat tickers.
pub struct KeepAliveScheduler {
    registry: Arc<SessionRegistry>,
    channels: Arc<ChannelMap>,
    config: SessionsConfig,
    tickers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl KeepAliveScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        channels: Arc<ChannelMap>,
        config: SessionsConfig,
    ) -> Self {
        Self {
            registry,
            channels,
            config,
            tickers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a channel for `session_id` and start its heartbeat ticker.
    ///
    /// Refuses (returns `false`, no effect) when the channel ceiling is
    /// already saturated; the caller proceeds without a keep-alive rather
    /// than failing the subscribe.
    pub fn start(self: &Arc<Self>, session_id: &str, sender: mpsc::Sender<PushFrame>) -> bool {
        if self.channels.count() >= self.config.max_channels {
            tracing::warn!(
                session_id = %session_id,
                open = self.channels.count(),
                max = self.config.max_channels,
                "push channel capacity saturated; proceeding without keep-alive"
            );
            return false;
        }

        // One channel per session: replace any leftover entry and its timer.
        self.drop_channel(session_id, "replaced", true);

        self.channels.insert(session_id, sender);

        let handle = tokio::spawn(Arc::clone(self).run_ticker(session_id.to_owned()));
        if let Some(previous) = self.tickers.lock().insert(session_id.to_owned(), handle) {
            previous.abort();
        }

        TraceEvent::ChannelStarted {
            session_id: session_id.to_owned(),
        }
        .emit();
        true
    }

    /// Cancel the ticker and remove the channel entry. Safe to call when no
    /// channel exists. Returns whether a channel was actually stopped.
    pub fn stop(&self, session_id: &str, reason: &str) -> bool {
        self.drop_channel(session_id, reason, true)
    }

    /// Number of live tickers (for diagnostics and tests).
    pub fn ticker_count(&self) -> usize {
        self.tickers.lock().len()
    }

    async fn run_ticker(self: Arc<Self>, session_id: String) {
        let period = Duration::from_secs(self.config.heartbeat_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first heartbeat should
        // land one full period after subscribe.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !self.tick(&session_id) {
                break;
            }
        }
    }

    /// One heartbeat attempt. Returns `false` when the ticker should stop.
    fn tick(&self, session_id: &str) -> bool {
        let Some(channel) = self.channels.get(session_id) else {
            // Channel no longer tracked; another path already removed it.
            self.tickers.lock().remove(session_id);
            return false;
        };

        let now = Utc::now();
        let uptime_secs = now.signed_duration_since(channel.started_at).num_seconds();
        if uptime_secs > self.config.channel_lifetime_secs as i64 {
            self.drop_channel(session_id, "lifetime cap", false);
            return false;
        }
        if self.registry.get(session_id).is_none() {
            self.drop_channel(session_id, "session gone", false);
            return false;
        }
        if channel.sender.is_closed() {
            self.drop_channel(session_id, "stream closed", false);
            return false;
        }

        match channel.sender.try_send(PushFrame::Heartbeat) {
            Ok(()) => {
                self.channels.record_heartbeat(session_id);
                self.registry.touch(session_id);
                true
            }
            Err(TrySendError::Full(_)) => {
                let consecutive = self.channels.record_failure(session_id);
                TraceEvent::HeartbeatFailure {
                    session_id: session_id.to_owned(),
                    consecutive,
                    recoverable: true,
                }
                .emit();
                if consecutive >= self.config.max_heartbeat_failures {
                    self.drop_channel(session_id, "heartbeat failures", false);
                    false
                } else {
                    tracing::debug!(
                        session_id = %session_id,
                        consecutive,
                        "heartbeat backpressure; retrying next tick"
                    );
                    true
                }
            }
            Err(TrySendError::Closed(_)) => {
                let consecutive = self.channels.record_failure(session_id);
                TraceEvent::HeartbeatFailure {
                    session_id: session_id.to_owned(),
                    consecutive,
                    recoverable: false,
                }
                .emit();
                self.drop_channel(session_id, "receiver dropped", false);
                false
            }
        }
    }

    /// Remove the channel entry and its ticker handle. `abort` is false when
    /// called from inside the ticker itself, which exits by returning.
    fn drop_channel(&self, session_id: &str, reason: &str, abort: bool) -> bool {
        if let Some(handle) = self.tickers.lock().remove(session_id) {
            if abort {
                handle.abort();
            }
        }

        match self.channels.remove(session_id) {
            Some(channel) => {
                let uptime_secs = Utc::now()
                    .signed_duration_since(channel.started_at)
                    .num_seconds();
                TraceEvent::ChannelStopped {
                    session_id: session_id.to_owned(),
                    reason: reason.to_owned(),
                    uptime_secs,
                }
                .emit();
                true
            }
            None => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn test_config() -> SessionsConfig {
        SessionsConfig {
            max_sessions: 10,
            max_channels: 10,
            idle_timeout_secs: 1800,
            channel_lifetime_secs: 1800,
            heartbeat_interval_secs: 25,
            reap_interval_secs: 60,
            max_heartbeat_failures: 3,
            channel_buffer: 4,
        }
    }

    fn scheduler_with(config: SessionsConfig) -> (Arc<KeepAliveScheduler>, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let channels = Arc::new(ChannelMap::new());
        let scheduler = Arc::new(KeepAliveScheduler::new(
            registry.clone(),
            channels,
            config,
        ));
        (scheduler, registry)
    }

    fn add_session(registry: &SessionRegistry, id: &str) {
        registry.create(id, Arc::new(LoopbackTransport::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_arrive_on_schedule() {
        let (scheduler, registry) = scheduler_with(test_config());
        add_session(&registry, "s1");

        let (tx, mut rx) = mpsc::channel(4);
        assert!(scheduler.start("s1", tx));

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, PushFrame::Heartbeat));

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, PushFrame::Heartbeat));

        assert_eq!(scheduler.ticker_count(), 1);
        scheduler.stop("s1", "test over");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_refreshes_session_activity() {
        let (scheduler, registry) = scheduler_with(test_config());
        add_session(&registry, "s1");
        let stale = Utc::now() - chrono::Duration::minutes(20);
        registry.touch_at("s1", stale);

        let (tx, mut rx) = mpsc::channel(4);
        scheduler.start("s1", tx);
        rx.recv().await.unwrap();

        assert!(registry.get("s1").unwrap().last_activity > stale);
        scheduler.stop("s1", "test over");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_receiver_tears_the_channel_down() {
        let (scheduler, registry) = scheduler_with(test_config());
        add_session(&registry, "s1");

        let (tx, rx) = mpsc::channel(4);
        scheduler.start("s1", tx);
        drop(rx);

        // One tick is enough to notice the closed stream.
        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(scheduler.ticker_count(), 0);
        assert_eq!(scheduler.channels.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backpressure_budget_exhausts_after_three_failures() {
        let (scheduler, registry) = scheduler_with(test_config());
        add_session(&registry, "s1");

        // Capacity 1 and never drained: the first heartbeat fills the
        // buffer, every following try_send reports Full.
        let (tx, mut rx) = mpsc::channel(1);
        scheduler.start("s1", tx);

        // Tick 1 succeeds, ticks 2-4 fail, the channel dies on failure 3.
        tokio::time::sleep(Duration::from_secs(25 * 4 + 1)).await;
        assert_eq!(scheduler.channels.count(), 0);
        assert_eq!(scheduler.ticker_count(), 0);

        // The buffered heartbeat is still deliverable, then the stream ends
        // because the stored sender was dropped.
        assert!(matches!(rx.recv().await, Some(PushFrame::Heartbeat)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn intermittent_backpressure_recovers() {
        let (scheduler, registry) = scheduler_with(test_config());
        add_session(&registry, "s1");

        let (tx, mut rx) = mpsc::channel(1);
        scheduler.start("s1", tx);

        // Fill (tick 1), fail twice (ticks 2-3)...
        tokio::time::sleep(Duration::from_secs(25 * 3 + 1)).await;
        assert_eq!(
            scheduler.channels.get("s1").unwrap().consecutive_errors,
            2
        );

        // ...then drain before the budget is spent. The next success
        // resets the counter.
        assert!(matches!(rx.recv().await, Some(PushFrame::Heartbeat)));
        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(
            scheduler.channels.get("s1").unwrap().consecutive_errors,
            0
        );
        scheduler.stop("s1", "test over");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_session_stops_the_ticker() {
        let (scheduler, _registry) = scheduler_with(test_config());
        // No session registered at all.
        let (tx, _rx) = mpsc::channel(4);
        scheduler.start("ghost", tx);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(scheduler.ticker_count(), 0);
        assert_eq!(scheduler.channels.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_cap_stops_a_healthy_channel() {
        let (scheduler, registry) = scheduler_with(test_config());
        add_session(&registry, "s1");

        let (tx, mut rx) = mpsc::channel(64);
        scheduler.start("s1", tx);
        rx.recv().await.unwrap();

        // Pretend the channel has been open for longer than the cap.
        scheduler
            .channels
            .set_started_at("s1", Utc::now() - chrono::Duration::seconds(1801));

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(scheduler.channels.count(), 0);
        assert_eq!(scheduler.ticker_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_refuses_when_saturated() {
        let mut config = test_config();
        config.max_channels = 1;
        let (scheduler, registry) = scheduler_with(config);
        add_session(&registry, "s1");
        add_session(&registry, "s2");

        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        assert!(scheduler.start("s1", tx1));
        assert!(!scheduler.start("s2", tx2));
        assert_eq!(scheduler.channels.count(), 1);
        assert_eq!(scheduler.ticker_count(), 1);
        scheduler.stop("s1", "test over");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (scheduler, registry) = scheduler_with(test_config());
        add_session(&registry, "s1");

        let (tx, _rx) = mpsc::channel(4);
        scheduler.start("s1", tx);
        assert!(scheduler.stop("s1", "first"));
        assert!(!scheduler.stop("s1", "second"));
        assert!(!scheduler.stop("never-started", "noop"));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_previous_channel() {
        let (scheduler, registry) = scheduler_with(test_config());
        add_session(&registry, "s1");

        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        scheduler.start("s1", tx1);
        scheduler.start("s1", tx2);

        assert_eq!(scheduler.channels.count(), 1);
        assert_eq!(scheduler.ticker_count(), 1);

        // The first stream ended when its sender was dropped.
        assert!(rx1.recv().await.is_none());
        // The replacement is the live one.
        assert!(matches!(rx2.recv().await, Some(PushFrame::Heartbeat)));
        scheduler.stop("s1", "test over");
    }
}
