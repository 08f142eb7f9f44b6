//! Build-output watcher. The external bundler writes compiled output to a
//! directory; any change there means the cached module graph is stale, so
//! the whole cache is dropped and subscribed browsers are told to reload.

use std::path::Path;
use std::time::Duration;

use notify::Watcher;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cinder_runtime::RuntimeHost;
use cinder_stdio as stdio;

const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Keeps the watcher and its event task alive. Dropping the guard stops
/// event delivery and aborts the task.
pub(crate) struct WatchGuard {
    _watcher: notify::RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn start_watch(
    dir: &Path,
    host: RuntimeHost,
    reload_tx: broadcast::Sender<()>,
) -> Result<WatchGuard, String> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })
    .map_err(|e| e.to_string())?;
    watcher
        .watch(dir, notify::RecursiveMode::Recursive)
        .map_err(|e| e.to_string())?;

    stdio::logf!("watch", "watching {}", dir.display());

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Ok(event) => {
                    if event.paths.is_empty() {
                        continue;
                    }
                    // let the bundler finish writing before evicting
                    tokio::time::sleep(SETTLE_DELAY).await;
                    while rx.try_recv().is_ok() {}
                    let evicted = host.clear_modules();
                    stdio::logf!("watch", "build output changed, {} evicted", evicted);
                    let _ = reload_tx.send(());
                }
                Err(e) => {
                    tracing::warn!("watch error: {}", e);
                }
            }
        }
    });

    Ok(WatchGuard {
        _watcher: watcher,
        task,
    })
}
