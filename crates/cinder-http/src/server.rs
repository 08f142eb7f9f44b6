//! Dev server lifecycle. One listener for the whole session: reloads swap
//! the worker set behind it and tell browsers and the debugger, close tears
//! everything down exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

use cinder_core::{ModuleFetcher, ServerConfig};
use cinder_inspector::{InspectorBridge, SourceMapRewriter};
use cinder_runtime::{ReloadOptions, RuntimeHost};
use cinder_stdio as stdio;

use crate::assets::AssetServer;
use crate::listener::PortAllocator;
use crate::proxy::PROXY_TIMEOUT;
use crate::router::app_router;
use crate::watch::{self, WatchGuard};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Snapshot handed to the request hook once a dispatched request finishes.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration: Duration,
    pub request_id: String,
}

pub(crate) type RequestHook = Arc<dyn Fn(&RequestRecord) + Send + Sync>;

/// Shared per-server state the router reads on every request.
pub(crate) struct ServerState {
    pub(crate) host: RuntimeHost,
    pub(crate) config: ServerConfig,
    pub(crate) assets: Option<AssetServer>,
    pub(crate) modules: Arc<dyn ModuleFetcher>,
    pub(crate) rewriter: Option<Arc<SourceMapRewriter>>,
    pub(crate) reload_tx: broadcast::Sender<()>,
    pub(crate) client: reqwest::Client,
    pub(crate) request_hook: RwLock<Option<RequestHook>>,
}

pub struct DevServer {
    state: Arc<ServerState>,
    port: u16,
    shutdown: Arc<Notify>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<WatchGuard>>,
    inspector: Mutex<Option<InspectorBridge>>,
    closed: AtomicBool,
}

impl DevServer {
    /// Bind the listener and start serving the host. The listener survives
    /// every subsequent `reload`; clients never see the port change.
    pub async fn start(config: ServerConfig, host: RuntimeHost) -> Result<Self, String> {
        let preferred = (config.port != 0).then_some(config.port);
        let port = PortAllocator::get(preferred)?;
        let listener = match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                PortAllocator::release(port);
                return Err(format!("failed to bind 127.0.0.1:{}: {}", port, e));
            }
        };

        let assets = match &config.assets_dir {
            Some(dir) => Some(AssetServer::new(dir)?),
            None => None,
        };
        let rewriter = match &config.source_map {
            Some(path) => match SourceMapRewriter::from_file(path) {
                Ok(rewriter) => Some(Arc::new(rewriter)),
                Err(e) => {
                    stdio::warn("server", &format!("source map unavailable: {}", e));
                    None
                }
            },
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(PROXY_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build proxy client: {}", e))?;
        let (reload_tx, _) = broadcast::channel(16);

        let state = Arc::new(ServerState {
            host: host.clone(),
            config: config.clone(),
            assets,
            modules: host.module_fetcher(),
            rewriter,
            reload_tx: reload_tx.clone(),
            client,
            request_hook: RwLock::new(None),
        });

        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let app = app_router(state.clone());
        let serve_task = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.notified().await });
            if let Err(e) = server.await {
                tracing::error!("http server exited: {}", e);
            }
        });

        let watcher = match &config.watch_dir {
            Some(dir) => match watch::start_watch(dir, host, reload_tx) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    tracing::warn!("watch mode failed: {}", e);
                    None
                }
            },
            None => None,
        };

        stdio::logf!("server", "listening on http://127.0.0.1:{}", port);
        Ok(Self {
            state,
            port,
            shutdown,
            serve_task: Mutex::new(Some(serve_task)),
            watcher: Mutex::new(watcher),
            inspector: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn host(&self) -> &RuntimeHost {
        &self.state.host
    }

    /// Register a callback observing every dispatched request. Replaces any
    /// previously registered hook.
    pub fn on_request(&self, hook: impl Fn(&RequestRecord) + Send + Sync + 'static) {
        *self
            .state
            .request_hook
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(hook));
    }

    /// Swap worker code or bindings behind the running listener, then
    /// announce the change to reload subscribers and the debugger bridge.
    pub fn reload(&self, options: ReloadOptions) -> Result<(), String> {
        self.state.host.reload(options)?;
        if let Some(bridge) = self.lock_inspector().as_ref() {
            bridge.reconnect();
        }
        let _ = self.state.reload_tx.send(());
        Ok(())
    }

    /// Start the debugger bridge between the configured public port and the
    /// runtime's private inspector endpoint. Returns the public port the
    /// bridge actually listens on.
    pub async fn attach_inspector(&self, private_port: u16) -> Result<u16, String> {
        let public_port = self.state.config.inspector_port.unwrap_or(0);
        let bridge =
            InspectorBridge::start(public_port, private_port, self.state.rewriter.clone()).await?;
        let port = bridge.public_port();
        if let Some(previous) = self.lock_inspector().replace(bridge) {
            previous.shutdown();
        }
        Ok(port)
    }

    /// Idempotent teardown: stop accepting, let in-flight requests drain
    /// briefly, then stop the watcher, the inspector bridge, and the host,
    /// and give the port back.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        let task = self.lock_serve().take();
        if let Some(mut task) = task {
            // open SSE subscriptions keep the graceful shutdown pending
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
                let _ = task.await;
            }
        }
        self.lock_watch().take();
        if let Some(bridge) = self.lock_inspector().take() {
            bridge.shutdown();
        }
        self.state.host.dispose();
        PortAllocator::release(self.port);
        stdio::log("server", "closed");
    }

    fn lock_serve(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.serve_task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_watch(&self) -> std::sync::MutexGuard<'_, Option<WatchGuard>> {
        self.watcher.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_inspector(&self) -> std::sync::MutexGuard<'_, Option<InspectorBridge>> {
        self.inspector.lock().unwrap_or_else(|e| e.into_inner())
    }
}
