//! End-to-end lifecycle coverage across the dispatcher, admission control,
//! keep-alive scheduler, and reaper wired together the way the gateway
//! wires them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use portico_domain::config::SessionsConfig;
use portico_domain::error::Error;
use portico_domain::rpc::RpcCall;
use portico_sessions::{
    AdmissionController, ChannelMap, Dispatcher, KeepAliveScheduler, LoopbackFactory, PushFrame,
    SessionLockMap, SessionReaper, SessionRegistry,
};

struct Gateway {
    registry: Arc<SessionRegistry>,
    channels: Arc<ChannelMap>,
    scheduler: Arc<KeepAliveScheduler>,
    reaper: SessionReaper,
    dispatcher: Dispatcher,
}

fn gateway(config: SessionsConfig) -> Gateway {
    let registry = Arc::new(SessionRegistry::new());
    let channels = Arc::new(ChannelMap::new());
    let scheduler = Arc::new(KeepAliveScheduler::new(
        registry.clone(),
        channels.clone(),
        config.clone(),
    ));
    let admission = Arc::new(AdmissionController::new(
        registry.clone(),
        channels.clone(),
        scheduler.clone(),
        config.clone(),
    ));
    let reaper = SessionReaper::new(
        registry.clone(),
        channels.clone(),
        scheduler.clone(),
        config.clone(),
    );
    let dispatcher = Dispatcher::new(
        registry.clone(),
        channels.clone(),
        scheduler.clone(),
        admission,
        Arc::new(SessionLockMap::new()),
        Arc::new(LoopbackFactory),
        config,
    );
    Gateway {
        registry,
        channels,
        scheduler,
        reaper,
        dispatcher,
    }
}

fn initialize_call() -> RpcCall {
    RpcCall::new(1, "initialize", Some(json!({"clientInfo": {"name": "it"}})))
}

async fn new_session(gw: &Gateway) -> String {
    let (id, _) = gw.dispatcher.initialize(initialize_call()).await.unwrap();
    id
}

#[tokio::test]
async fn ceiling_eviction_keeps_capacity_and_serves_the_rest() {
    let gw = gateway(SessionsConfig {
        max_sessions: 3,
        ..Default::default()
    });

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(new_session(&gw).await);
    }

    // Stagger activity so the eviction candidate is unambiguous.
    let now = Utc::now();
    gw.registry.touch_at(&ids[0], now - chrono::Duration::minutes(30));
    gw.registry.touch_at(&ids[1], now - chrono::Duration::minutes(5));
    gw.registry.touch_at(&ids[2], now - chrono::Duration::minutes(1));

    let newest = new_session(&gw).await;

    assert!(gw.registry.get(&ids[0]).is_none(), "stalest session evicted");
    assert_eq!(gw.registry.count(), 3);

    // The survivors and the newcomer still take calls.
    for id in [&ids[1], &ids[2], &newest] {
        gw.dispatcher
            .dispatch(id, RpcCall::new(2, "ping", None))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn idle_sessions_are_reaped_with_their_channels() {
    let gw = gateway(SessionsConfig {
        idle_timeout_secs: 1800,
        ..Default::default()
    });

    let id = new_session(&gw).await;
    let mut rx = gw.dispatcher.subscribe(&id).unwrap();

    let later = Utc::now() + chrono::Duration::seconds(1801);
    let stats = gw.reaper.reap_at(later);

    assert_eq!(stats.sessions_reaped, 1);
    assert_eq!(gw.registry.count(), 0);
    assert_eq!(gw.channels.count(), 0);
    assert_eq!(gw.scheduler.ticker_count(), 0);

    // The stream ended when the channel's sender was dropped.
    assert!(rx.recv().await.is_none());

    let err = gw
        .dispatcher
        .dispatch(&id, RpcCall::new(2, "ping", None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSession(_)));
}

#[tokio::test(start_paused = true)]
async fn undrained_streams_exhaust_the_heartbeat_budget() {
    let gw = gateway(SessionsConfig {
        heartbeat_interval_secs: 25,
        max_heartbeat_failures: 3,
        channel_buffer: 1,
        ..Default::default()
    });

    let id = new_session(&gw).await;
    let mut rx = gw.dispatcher.subscribe(&id).unwrap();

    // First heartbeat fills the 1-slot buffer; the next three writes fail
    // and the third failure kills the channel.
    tokio::time::sleep(Duration::from_secs(125)).await;

    assert_eq!(gw.channels.count(), 0);
    assert_eq!(gw.scheduler.ticker_count(), 0);
    // Only the channel died; the session still takes calls.
    assert_eq!(gw.registry.count(), 1);
    gw.dispatcher
        .dispatch(&id, RpcCall::new(2, "ping", None))
        .await
        .unwrap();

    // The one buffered heartbeat drains, then the stream ends.
    assert!(matches!(rx.recv().await, Some(PushFrame::Heartbeat)));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn subscribe_against_unknown_session_changes_nothing() {
    let gw = gateway(SessionsConfig::default());

    let err = gw.dispatcher.subscribe("never-created").unwrap_err();
    assert!(matches!(err, Error::InvalidSession(_)));
    assert_eq!(gw.channels.count(), 0);
    assert_eq!(gw.scheduler.ticker_count(), 0);

    let err = gw.dispatcher.terminate("never-created").unwrap_err();
    assert!(matches!(err, Error::InvalidSession(_)));
}

#[tokio::test]
async fn channel_ceiling_evicts_the_oldest_stream() {
    let gw = gateway(SessionsConfig {
        max_channels: 2,
        ..Default::default()
    });

    let s1 = new_session(&gw).await;
    let s2 = new_session(&gw).await;
    let s3 = new_session(&gw).await;

    let mut rx1 = gw.dispatcher.subscribe(&s1).unwrap();
    // Real-time gaps keep the start order unambiguous.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _rx2 = gw.dispatcher.subscribe(&s2).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _rx3 = gw.dispatcher.subscribe(&s3).unwrap();

    assert_eq!(gw.channels.count(), 2);
    assert!(gw.channels.get(&s1).is_none(), "oldest stream evicted");
    assert!(gw.channels.get(&s2).is_some());
    assert!(gw.channels.get(&s3).is_some());
    assert!(rx1.recv().await.is_none());

    // Channel eviction does not touch the session itself.
    assert_eq!(gw.registry.count(), 3);
    gw.dispatcher
        .dispatch(&s1, RpcCall::new(2, "ping", None))
        .await
        .unwrap();
}

#[tokio::test]
async fn terminate_stops_heartbeats_and_frees_the_id() {
    let gw = gateway(SessionsConfig::default());

    let id = new_session(&gw).await;
    let mut rx = gw.dispatcher.subscribe(&id).unwrap();

    gw.dispatcher.terminate(&id).unwrap();

    assert_eq!(gw.registry.count(), 0);
    assert_eq!(gw.channels.count(), 0);
    assert_eq!(gw.scheduler.ticker_count(), 0);
    assert!(rx.recv().await.is_none());

    let err = gw
        .dispatcher
        .dispatch(&id, RpcCall::new(2, "ping", None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSession(_)));
}
