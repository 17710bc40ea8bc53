//! Admission control — eviction-before-create for both ceilings.
//!
//! Sessions and push channels have independent capacity caps. Rather than
//! refusing new work at the ceiling, the controller evicts: sessions by
//! least recent activity (an idle session is the best candidate), channels
//! by age (the channel open longest has had the most opportunity to go
//! stale; channels carry no per-message activity signal beyond heartbeats).

use std::sync::Arc;

use chrono::Utc;

use portico_domain::config::SessionsConfig;
use portico_domain::error::{Error, Result};
use portico_domain::trace::TraceEvent;

use crate::channel::ChannelMap;
use crate::keepalive::KeepAliveScheduler;
use crate::lifecycle::{teardown, TeardownReason};
use crate::store::SessionRegistry;

pub struct AdmissionController {
    registry: Arc<SessionRegistry>,
    channels: Arc<ChannelMap>,
    scheduler: Arc<KeepAliveScheduler>,
    config: SessionsConfig,
}

impl AdmissionController {
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

    /// Make room for one new session, evicting the least recently active
    /// while the ceiling is reached. The ceiling holds once this returns.
    pub fn admit_session(&self) -> Result<()> {
        while self.registry.count() >= self.config.max_sessions {
            let Some(victim) = self.registry.least_recently_active() else {
                // Ceiling reached with nothing to evict: only possible if
                // the ceiling is 0 or the registry is mutating underneath
                // us. Refuse rather than overshoot.
                return Err(Error::AdmissionRejected(
                    "session ceiling reached with no eviction candidate".into(),
                ));
            };

            let idle_secs = Utc::now()
                .signed_duration_since(victim.last_activity)
                .num_seconds();
            tracing::info!(
                session_id = %victim.id,
                idle_secs,
                "evicting least recently active session to admit a new one"
            );
            TraceEvent::SessionEvicted {
                session_id: victim.id.clone(),
                idle_secs,
            }
            .emit();

            teardown(
                &self.registry,
                &self.scheduler,
                &victim.id,
                TeardownReason::Evicted,
            );
        }
        Ok(())
    }

    /// Make room for one new push channel, evicting the oldest-created
    /// while the ceiling is reached.
    pub fn admit_channel(&self) -> Result<()> {
        while self.channels.count() >= self.config.max_channels {
            let Some(victim) = self.channels.oldest() else {
                return Err(Error::AdmissionRejected(
                    "channel ceiling reached with no eviction candidate".into(),
                ));
            };

            tracing::info!(
                session_id = %victim.session_id,
                "evicting oldest push channel to admit a new one"
            );
            self.scheduler.stop(&victim.session_id, "evicted");
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
