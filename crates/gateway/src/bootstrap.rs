//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;

use chrono::Utc;

use portico_domain::config::{Config, ConfigSeverity};
use portico_sessions::{
    AdmissionController, ChannelMap, Dispatcher, KeepAliveScheduler, SessionLockMap,
    SessionReaper, SessionRegistry,
};

use crate::rpc::{build_default_toolset, RpcTransportFactory};
use crate::state::AppState;

/// Validate config, wire up every subsystem and return a fully-built
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let sessions_config = config.sessions.clone();

    // ── Session registry + channel map ───────────────────────────────
    let registry = Arc::new(SessionRegistry::new());
    let channels = Arc::new(ChannelMap::new());
    tracing::info!(
        max_sessions = sessions_config.max_sessions,
        max_channels = sessions_config.max_channels,
        "session registry ready"
    );

    // ── Keep-alive scheduler ─────────────────────────────────────────
    let scheduler = Arc::new(KeepAliveScheduler::new(
        registry.clone(),
        channels.clone(),
        sessions_config.clone(),
    ));
    tracing::info!(
        heartbeat_interval_secs = sessions_config.heartbeat_interval_secs,
        "keep-alive scheduler ready"
    );

    // ── Admission controller ─────────────────────────────────────────
    let admission = Arc::new(AdmissionController::new(
        registry.clone(),
        channels.clone(),
        scheduler.clone(),
        sessions_config.clone(),
    ));
    tracing::info!("admission controller ready");

    // ── Stale-session reaper ─────────────────────────────────────────
    let reaper = Arc::new(SessionReaper::new(
        registry.clone(),
        channels.clone(),
        scheduler.clone(),
        sessions_config.clone(),
    ));
    tracing::info!(
        reap_interval_secs = sessions_config.reap_interval_secs,
        idle_timeout_secs = sessions_config.idle_timeout_secs,
        "session reaper ready"
    );

    // ── Method table + transport factory ─────────────────────────────
    let tools = Arc::new(build_default_toolset());
    tracing::info!(tools = tools.len(), "method table ready");
    let factory = Arc::new(RpcTransportFactory::new(tools));

    // ── Session locks (per-session call serialization) ───────────────
    let session_locks = Arc::new(SessionLockMap::new());
    tracing::info!("session lock map ready");

    // ── Dispatcher ───────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        channels.clone(),
        scheduler,
        admission,
        session_locks.clone(),
        factory,
        sessions_config,
    ));
    tracing::info!("dispatcher ready");

    Ok(AppState {
        config,
        started_at: Utc::now(),
        registry,
        channels,
        dispatcher,
        reaper,
        session_locks,
    })
}

/// Spawn the periodic maintenance loops. Runs for the life of the process.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Periodic reaper sweep ────────────────────────────────────────
    {
        let reaper = state.reaper.clone();
        let interval_secs = state.config.sessions.reap_interval_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let stats = reaper.reap_at(Utc::now());
                if stats.sessions_reaped > 0 || stats.channels_reaped > 0 {
                    tracing::info!(
                        sessions = stats.sessions_reaped,
                        channels = stats.channels_reaped,
                        "reaper sweep removed stale state"
                    );
                }
            }
        });
    }

    // ── Periodic session lock pruning ────────────────────────────────
    {
        let session_locks = state.session_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                session_locks.prune_idle();
            }
        });
    }
}
