//! Well-known dev endpoints: compiled-module fetch for external tooling
//! and an explicit warmup trigger.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use cinder_core::FetchModuleError;

use crate::server::ServerState;

pub(crate) const FETCH_MODULE_PATH: &str = "/__cinder_fetch_module";
pub(crate) const WARMUP_PATH: &str = "/__cinder_warmup";

/// Serve `{code, map?, deps}` for a compiled module id, straight from the
/// host's module source.
pub(crate) async fn handle_fetch_module(state: &Arc<ServerState>, uri: &Uri) -> Response {
    let query: HashMap<String, String> = Query::try_from_uri(uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let Some(id) = query.get("id").filter(|id| !id.is_empty()) else {
        return plain(StatusCode::BAD_REQUEST, "missing id parameter");
    };
    let importer = query.get("importer").map(String::as_str);

    match state.modules.fetch_module(id, importer).await {
        Ok(module) => Json(module).into_response(),
        Err(FetchModuleError::NotFound { id }) => {
            plain(StatusCode::NOT_FOUND, format!("unknown module: {}", id))
        }
        Err(FetchModuleError::Transport(detail)) => {
            plain(StatusCode::INTERNAL_SERVER_ERROR, detail)
        }
    }
}

/// Pre-resolve the entry worker's module graph so the first real request
/// does not pay the cold-fetch cost.
pub(crate) async fn handle_warmup(state: &Arc<ServerState>) -> Response {
    match state.host.warm().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => plain(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub(crate) fn plain(status: StatusCode, body: impl Into<String>) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(body.into()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
