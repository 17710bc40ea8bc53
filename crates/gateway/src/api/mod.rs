pub mod diagnostics;
pub mod mcp;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full API router.
///
/// `/mcp` is the whole JSON-RPC surface: one route, three verbs. The `/v1`
/// routes are read-only operational endpoints for probes and dashboards.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/mcp",
            get(mcp::subscribe).post(mcp::rpc).delete(mcp::terminate),
        )
        .route("/v1/diagnostics", get(diagnostics::diagnostics))
        .route("/v1/health", get(diagnostics::health))
        .layer(TraceLayer::new_for_http())
}
