//! Hot module invalidation channel. The bundler pushes update events over
//! a WebSocket; each event evicts the changed modules and their transitive
//! importers from the host's cache before the next dispatch can observe a
//! stale graph. Losing the channel is survivable: the host keeps serving
//! through cold fetches until we reconnect.

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use cinder_runtime::RuntimeHost;
use cinder_stdio as stdio;

const RECONNECT_FLOOR: Duration = Duration::from_millis(250);
const RECONNECT_CEIL: Duration = Duration::from_secs(5);

/// Invalidation events as the bundler emits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrEvent {
    Update {
        #[serde(rename = "changedPaths")]
        changed_paths: Vec<String>,
    },
    FullReload,
}

/// Apply one event to the host's module cache. Eviction completes before
/// this returns; the count is how many entries went away.
pub fn apply_hmr_event(host: &RuntimeHost, event: &HmrEvent) -> usize {
    match event {
        HmrEvent::Update { changed_paths } => host.invalidate_modules(changed_paths),
        HmrEvent::FullReload => host.clear_modules(),
    }
}

/// Running channel task. `close` stops it; dropping the handle leaves the
/// task running (the dev server owns the handle for its whole lifetime).
pub struct HmrChannelHandle {
    task: tokio::task::JoinHandle<()>,
}

impl HmrChannelHandle {
    pub fn close(&self) {
        self.task.abort();
    }
}

pub struct HmrChannel;

impl HmrChannel {
    /// Connect to the bundler's invalidation endpoint and keep applying
    /// events until closed. Reconnects with capped backoff.
    pub fn connect(url: impl Into<String>, host: RuntimeHost) -> HmrChannelHandle {
        let url = url.into();
        let task = tokio::spawn(async move { run_channel(url, host).await });
        HmrChannelHandle { task }
    }
}

async fn run_channel(url: String, host: RuntimeHost) {
    let mut backoff = RECONNECT_FLOOR;
    loop {
        if host.is_closed() {
            return;
        }
        match connect_async(url.as_str()).await {
            Ok((mut stream, _response)) => {
                stdio::logf!("hmr", "invalidation channel connected: {}", url);
                backoff = RECONNECT_FLOOR;
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => handle_frame(&host, &text),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "hmr channel read failed");
                            break;
                        }
                    }
                }
                stdio::warn(
                    "hmr",
                    "invalidation channel dropped, serving cold fetches until reconnect",
                );
            }
            Err(e) => {
                tracing::debug!(error = %e, url = %url, "hmr connect failed");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RECONNECT_CEIL);
    }
}

fn handle_frame(host: &RuntimeHost, text: &str) {
    match serde_json::from_str::<HmrEvent>(text) {
        Ok(event) => {
            let evicted = apply_hmr_event(host, &event);
            match &event {
                HmrEvent::Update { changed_paths } => {
                    stdio::logf!(
                        "hmr",
                        "update: {} changed, {} evicted",
                        changed_paths.len(),
                        evicted
                    );
                }
                HmrEvent::FullReload => {
                    stdio::logf!("hmr", "full reload: {} evicted", evicted);
                }
            }
        }
        Err(e) => {
            stdio::warn("hmr", &format!("unrecognized event: {}", e));
        }
    }
}
