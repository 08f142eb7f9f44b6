//! Request routing. Well-known dev endpoints are answered first; everything
//! else walks the fixed stage chain: asset check, proxy check, synthetic
//! header injection, worker dispatch, response postprocessing. Assets and
//! proxied requests short-circuit before dispatch.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;

use cinder_core::headers::inject_synthetic_headers;
use cinder_core::{RequestEnvelope, ResponseEnvelope};
use cinder_stdio as stdio;

use crate::endpoints::{self, plain};
use crate::inject;
use crate::proxy;
use crate::server::{RequestRecord, ServerState};
use crate::sse;

pub(crate) fn app_router(state: Arc<ServerState>) -> Router {
    Router::new().fallback(handle_request).with_state(state)
}

async fn handle_request(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    match path.as_str() {
        sse::EVENTS_PATH => return sse::handle_events(&state.reload_tx, request.headers()),
        endpoints::FETCH_MODULE_PATH => {
            return endpoints::handle_fetch_module(&state, request.uri()).await;
        }
        endpoints::WARMUP_PATH => return endpoints::handle_warmup(&state).await,
        _ => {}
    }

    // asset check never consumes the request body
    if let Some(assets) = &state.assets {
        if let Some((mime, body)) = assets.serve(&path).await {
            stdio::debugf!("assets", "served {}", path);
            return Response::builder()
                .status(StatusCode::OK)
                .header("content-type", mime)
                .body(body)
                .unwrap_or_else(|_| Response::new(Body::empty()));
        }
    }

    if proxy::wants_proxy(state.config.proxy.as_deref(), request.headers()) {
        let target = state.config.proxy.clone().unwrap_or_default();
        let response = proxy::forward(&state.client, &target, request).await;
        stdio::debugf!("proxy", "{} {} upstream", response.status().as_u16(), path);
        return response;
    }

    dispatch(state, request, path).await
}

async fn dispatch(state: Arc<ServerState>, request: Request, path: String) -> Response {
    let started = Instant::now();
    let method = request.method().as_str().to_string();
    let uri = request.uri().to_string();

    let mut headers = Vec::with_capacity(request.headers().len());
    for (key, value) in request.headers().iter() {
        headers.push((
            key.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).to_string(),
        ));
    }
    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .ok()
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| bytes.to_vec());

    let mut envelope = RequestEnvelope {
        url: format!("http://localhost{}", uri),
        method: method.clone(),
        headers,
        body,
    };
    let request_id = inject_synthetic_headers(&mut envelope);
    let pending = PendingRequestRecord {
        method,
        path,
        request_id,
        started,
    };

    match state.host.dispatch(envelope).await {
        Ok(mut res) => {
            if state.config.auto_reload {
                inject::apply_reload_client(&mut res);
            }
            let response = envelope_response(res);
            pending.finish(&state, response.status().as_u16());
            response
        }
        Err(e) => {
            let text = match &state.rewriter {
                Some(rewriter) => rewriter.rewrite(&e.to_string()),
                None => e.to_string(),
            };
            tracing::error!("worker dispatch failed: {}", e);
            stdio::error("worker", &text);
            pending.finish(&state, 500);
            plain(StatusCode::INTERNAL_SERVER_ERROR, text)
        }
    }
}

fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let status =
        StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::builder().status(status);
    for (key, value) in &envelope.headers {
        response = response.header(key.as_str(), value.as_str());
    }
    response
        .body(Body::from(envelope.body))
        .unwrap_or_else(|e| {
            plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("invalid worker response: {}", e),
            )
        })
}

/// Book-keeping for one in-flight dispatch. Created right before the worker
/// runs and consumed by `finish` when the response is ready.
struct PendingRequestRecord {
    method: String,
    path: String,
    request_id: String,
    started: Instant,
}

impl PendingRequestRecord {
    fn finish(self, state: &ServerState, status: u16) {
        let duration = self.started.elapsed();
        stdio::logf!(
            "request",
            "{} {} {} {}ms",
            self.method,
            self.path,
            status,
            duration.as_millis()
        );
        let hook = state
            .request_hook
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(hook) = hook {
            hook(&RequestRecord {
                method: self.method,
                path: self.path,
                status,
                duration,
                request_id: self.request_id,
            });
        }
    }
}
