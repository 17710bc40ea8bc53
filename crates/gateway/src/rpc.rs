//! JSON-RPC method table and the in-process transport bound to it.
//!
//! The session layer treats transports as opaque call sinks; this module is
//! the gateway's concrete one. Methods resolve against a trait-based tool
//! registry, so wiring a new capability in means registering one handler,
//! not touching the lifecycle code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use portico_domain::error::{Error, Result};
use portico_domain::rpc::{RpcCall, RpcError, RpcResponse};
use portico_sessions::{CallTransport, TransportFactory};

/// Protocol revision reported to clients during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Metadata describing a callable tool, in the shape `tools/list` returns.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// Registry of callable tools, keyed by name.
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Returns self for chaining.
    pub fn register(mut self, tool: Arc<dyn ToolHandler>) -> Self {
        let name = tool.spec().name.clone();
        self.tools.insert(name, tool);
        self
    }

    /// List all registered tool specs (sorted by name).
    pub fn list(&self) -> Vec<ToolSpec> {
        let mut v: Vec<_> = self.tools.values().map(|t| t.spec()).collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// Get a single tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.tools.get(name)
    }

    /// How many tools are registered.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Build the default tool set with all built-in tools.
pub fn build_default_toolset() -> ToolSet {
    ToolSet::new().register(Arc::new(EchoTool))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Diagnostic tool that returns its arguments untouched. Useful for
/// verifying the full request path without any backend wired up.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "echo".into(),
            description: "Echo the provided arguments back to the caller.".into(),
            input_schema: json!({
                "type": "object",
                "additionalProperties": true
            }),
        }
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        Ok(args)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RpcTransport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-process transport resolving calls against a shared [`ToolSet`].
///
/// Client mistakes (unknown method, bad params, failing tool) come back as
/// embedded JSON-RPC errors, not `Err`: only a genuinely broken transport
/// should trip the session-teardown path.
pub struct RpcTransport {
    session_id: String,
    tools: Arc<ToolSet>,
    closed: AtomicBool,
}

#[async_trait]
impl CallTransport for RpcTransport {
    async fn handle(&self, call: RpcCall) -> Result<Option<RpcResponse>> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let id = call.id.clone();
        let response = match call.method.as_str() {
            "initialize" => RpcResponse::result(id, self.initialize_result()),
            "ping" => RpcResponse::result(id, json!({})),
            "tools/list" => RpcResponse::result(id, json!({ "tools": self.tools.list() })),
            "tools/call" => self.tools_call(id, call.params.clone()).await,
            "notifications/initialized" => return Ok(None),
            other => RpcResponse::error(id, RpcError::method_not_found(other)),
        };

        if call.is_notification() {
            return Ok(None);
        }
        Ok(Some(response))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl RpcTransport {
    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "portico",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": {},
            },
        })
    }

    async fn tools_call(&self, id: Option<Value>, params: Option<Value>) -> RpcResponse {
        let params = params.unwrap_or(Value::Null);
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return RpcResponse::error(
                id,
                RpcError::invalid_params("tools/call requires a tool name"),
            );
        };
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let Some(tool) = self.tools.get(name) else {
            return RpcResponse::error(id, RpcError::invalid_params(format!("unknown tool: {name}")));
        };

        match tool.call(args).await {
            Ok(output) => RpcResponse::result(
                id,
                json!({
                    "content": [{ "type": "text", "text": output.to_string() }],
                    "isError": false,
                }),
            ),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    tool = name,
                    error = %e,
                    "tool call failed"
                );
                RpcResponse::error(id, RpcError::internal(e.to_string()))
            }
        }
    }
}

/// Mints one [`RpcTransport`] per admitted session, all sharing the same
/// tool set.
pub struct RpcTransportFactory {
    tools: Arc<ToolSet>,
}

impl RpcTransportFactory {
    pub fn new(tools: Arc<ToolSet>) -> Self {
        Self { tools }
    }
}

impl TransportFactory for RpcTransportFactory {
    fn create(&self, session_id: &str) -> Result<Arc<dyn CallTransport>> {
        Ok(Arc::new(RpcTransport {
            session_id: session_id.to_owned(),
            tools: self.tools.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
