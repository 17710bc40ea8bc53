//! Transport seam between the session layer and whatever resolves calls.
//!
//! The session layer never inspects method semantics. It hands an opaque
//! call to the session's transport and reacts to the outcome: success
//! refreshes activity, failure tears the session down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use portico_domain::error::{Error, Result};
use portico_domain::rpc::{RpcCall, RpcResponse};

/// One transport per session, exclusively owned by it.
///
/// `is_closed` must be cheap and synchronous; the reaper polls it on every
/// sweep. `close` must be idempotent.
#[async_trait]
pub trait CallTransport: Send + Sync {
    /// Resolve one call. Returns `None` for notifications.
    async fn handle(&self, call: RpcCall) -> Result<Option<RpcResponse>>;

    /// Whether the transport has failed or been closed.
    fn is_closed(&self) -> bool;

    /// Mark the transport closed. Idempotent.
    fn close(&self);
}

/// Mints one transport per admitted session.
pub trait TransportFactory: Send + Sync {
    fn create(&self, session_id: &str) -> Result<Arc<dyn CallTransport>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loopback transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A transport that echoes calls back, with injectable failures.
///
/// Used by tests and as a stand-in during local development when no real
/// method table is wired up.
#[derive(Default)]
pub struct LoopbackTransport {
    closed: AtomicBool,
    fail_next: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `handle` call fail with a transport error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CallTransport for LoopbackTransport {
    async fn handle(&self, call: RpcCall) -> Result<Option<RpcResponse>> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Transport("injected failure".into()));
        }
        if call.is_notification() {
            return Ok(None);
        }
        Ok(Some(RpcResponse::result(
            call.id,
            json!({ "echo": { "method": call.method, "params": call.params } }),
        )))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory for [`LoopbackTransport`].
#[derive(Default)]
pub struct LoopbackFactory;

impl TransportFactory for LoopbackFactory {
    fn create(&self, _session_id: &str) -> Result<Arc<dyn CallTransport>> {
        Ok(Arc::new(LoopbackTransport::new()))
    }
}
