//! Server-sent auto-reload channel. Browsers subscribe at the well-known
//! events path; every reload announcement tells them to refetch the page.

use std::convert::Infallible;

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, StreamExt};
use nanoid::nanoid;
use tokio::sync::broadcast;

use cinder_stdio as stdio;

pub(crate) const EVENTS_PATH: &str = "/__cinder_events";

/// Subscribe the caller to reload announcements. The `Accept` header must
/// ask for an event stream; an immediate `connected` event confirms the
/// subscription before any reload fires.
pub(crate) fn handle_events(reload_tx: &broadcast::Sender<()>, headers: &HeaderMap) -> Response {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !accept.contains("text/event-stream") {
        return (
            StatusCode::BAD_REQUEST,
            "expected accept: text/event-stream",
        )
            .into_response();
    }

    let session = nanoid!(8);
    stdio::debugf!("events", "reload subscriber connected ({})", session);

    let rx = reload_tx.subscribe();
    let connected = stream::once(async move {
        Ok::<Event, Infallible>(Event::default().event("connected").data(session))
    });
    let reloads = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(()) => {
                    let event = Event::default().event("reload").data("{}");
                    return Some((Ok::<Event, Infallible>(event), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(connected.chain(reloads))
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_missing_accept() {
        let (tx, _) = broadcast::channel(4);
        let response = handle_events(&tx, &HeaderMap::new());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_event_stream_content_type() {
        let (tx, _) = broadcast::channel(4);
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, "text/event-stream".parse().unwrap());
        let response = handle_events(&tx, &headers);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
    }
}
