//! The streamable-HTTP JSON-RPC endpoint.
//!
//! `POST /mcp` routes calls (minting a session when none is named),
//! `GET /mcp` opens the SSE push stream, `DELETE /mcp` terminates the
//! session. The session id travels in the `Mcp-Session-Id` header both
//! ways.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde_json::Value;

use portico_domain::error::Error;
use portico_domain::rpc::{RpcCall, RpcError, RpcResponse};
use portico_sessions::PushFrame;

use crate::state::AppState;

/// Session id header, exposed through CORS so browser clients can read it.
pub const MCP_SESSION_HEADER: &str = "mcp-session-id";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mcp — initialize or routed call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(call): Json<RpcCall>,
) -> Response {
    let call_id = call.id.clone();

    match session_header(&headers) {
        // No session named: this must be an initialize call.
        None => match state.dispatcher.initialize(call).await {
            Ok((session_id, response)) => {
                let body = match response {
                    Some(r) => Json(r).into_response(),
                    None => StatusCode::ACCEPTED.into_response(),
                };
                with_session_header(body, &session_id)
            }
            Err(err) => error_response(&err, call_id, status_for(&err, false)),
        },

        Some(session_id) => match state.dispatcher.dispatch(&session_id, call).await {
            Ok(Some(response)) => Json(response).into_response(),
            Ok(None) => StatusCode::ACCEPTED.into_response(),
            Err(err) => error_response(&err, call_id, status_for(&err, true)),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /mcp — subscribe (SSE push stream)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn subscribe(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        let err = Error::InvalidRequest("subscribe requires a session id header".into());
        return error_response(&err, None, StatusCode::BAD_REQUEST);
    };

    match state.dispatcher.subscribe(&session_id) {
        Ok(rx) => Sse::new(push_stream(rx)).into_response(),
        Err(err) => {
            let status = status_for(&err, false);
            error_response(&err, None, status)
        }
    }
}

/// Forward push frames as SSE until the channel's sender side is dropped.
/// Heartbeats become comment lines, so clients see traffic without events.
fn push_stream(
    mut rx: tokio::sync::mpsc::Receiver<PushFrame>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            match frame {
                PushFrame::Heartbeat => {
                    yield Ok(Event::default().comment("ping"));
                }
                PushFrame::Message { payload } => {
                    yield Ok(Event::default().event("message").data(payload.to_string()));
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /mcp — terminate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn terminate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        let err = Error::InvalidRequest("terminate requires a session id header".into());
        return error_response(&err, None, StatusCode::BAD_REQUEST);
    };

    match state.dispatcher.terminate(&session_id) {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(err) => {
            let status = status_for(&err, false);
            error_response(&err, None, status)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_HEADER), value);
    }
    response
}

/// HTTP status for a lifecycle error. A dead session is `410 Gone` on
/// routed calls (the id once existed as far as the client knows) but a
/// plain `400` on subscribe/terminate.
fn status_for(err: &Error, routed: bool) -> StatusCode {
    match err {
        Error::InvalidSession(_) => {
            if routed {
                StatusCode::GONE
            } else {
                StatusCode::BAD_REQUEST
            }
        }
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::AdmissionRejected(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error, id: Option<Value>, status: StatusCode) -> Response {
    let body = RpcResponse::error(id, RpcError::from(err));
    (status, Json(body)).into_response()
}
