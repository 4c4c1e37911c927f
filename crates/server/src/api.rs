//! HTTP front door.
//!
//! - `POST /api` takes `{"command", "args"}`
//! - `POST /api/{command}` takes the single argument as the body
//! - `GET /healthz` answers `ok`
//! - everything else is served from the UI build

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::rpc::{RpcError, RpcRequest};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api", post(rpc_call))
        .route("/api/{command}", post(rpc_command))
        .route("/healthz", get(|| async { "ok" }))
        .fallback(static_fallback)
        .with_state(state)
}

async fn rpc_call(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match serde_json::from_slice::<RpcRequest>(&body) {
        Ok(request) => request,
        Err(e) => return error_response(RpcError::MalformedRequest(e.to_string())),
    };
    respond(&state, request).await
}

async fn rpc_command(
    State(state): State<Arc<AppState>>,
    Path(command): Path<String>,
    body: Bytes,
) -> Response {
    let args = if body.iter().all(u8::is_ascii_whitespace) {
        Vec::new()
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(arg) => vec![arg],
            Err(e) => return error_response(RpcError::MalformedRequest(e.to_string())),
        }
    };
    respond(&state, RpcRequest { command, args }).await
}

async fn respond(state: &AppState, request: RpcRequest) -> Response {
    let command = request.command.clone();
    match state.dispatcher.dispatch(request).await {
        Ok(result) => {
            info!(command = %command, "RPC call succeeded");
            Json(json!({ "result": result })).into_response()
        }
        Err(e) => {
            warn!(command = %command, kind = e.kind(), error = %e, "RPC call failed");
            error_response(e)
        }
    }
}

fn error_response(error: RpcError) -> Response {
    (error.status(), Json(json!({ "error": error.body() }))).into_response()
}

async fn static_fallback(State(state): State<Arc<AppState>>, method: Method, uri: Uri) -> Response {
    if uri.path() == "/api" || uri.path().starts_with("/api/") {
        return (StatusCode::NOT_FOUND, "Unknown API route").into_response();
    }
    state.static_files.serve(&method, uri.path()).await
}
