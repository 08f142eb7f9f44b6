use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use futures_util::FutureExt;

use cinder_core::{
    FetchModuleError, ModuleFetcher, RequestEnvelope, ResponseEnvelope, WorkerDefinition,
    WorkerSet,
};
use cinder_stdio as stdio;

use crate::cache::{ModuleCache, ModuleCacheEntry};
use crate::engine::{
    BoxFuture, FetchContext, IsolateEngine, ServiceDispatch, ServiceRouter, WorkerInstance,
};

/// Why a dispatch did not produce a worker response.
#[derive(Debug)]
pub enum DispatchError {
    /// The host was disposed; nothing will be served again.
    Closed,
    /// No worker with that name in the current set.
    UnknownWorker { name: String },
    /// The worker's handler returned an error or panicked. `stack` is the
    /// error text as the worker produced it.
    Worker { stack: String },
    /// A module could not be loaded through the fetch bridge.
    ModuleFetch { id: String, detail: String },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Closed => write!(f, "runtime host is closed"),
            DispatchError::UnknownWorker { name } => write!(f, "unknown worker: {}", name),
            DispatchError::Worker { stack } => write!(f, "{}", stack),
            DispatchError::ModuleFetch { id, detail } => {
                write!(f, "failed to load module {}: {}", id, detail)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// What a reload replaces. `workers` swaps the whole set; `env` alone
/// replaces just the entry worker's bindings and keeps the compiled code.
#[derive(Debug, Default)]
pub struct ReloadOptions {
    pub workers: Option<WorkerSet>,
    pub env: Option<HashMap<String, String>>,
}

impl ReloadOptions {
    pub fn workers(set: WorkerSet) -> Self {
        Self {
            workers: Some(set),
            env: None,
        }
    }

    pub fn env(env: HashMap<String, String>) -> Self {
        Self {
            workers: None,
            env: Some(env),
        }
    }
}

struct HostState {
    workers: WorkerSet,
    instances: HashMap<String, Arc<dyn WorkerInstance>>,
}

struct HostInner {
    engine: Arc<dyn IsolateEngine>,
    fetcher: Arc<dyn ModuleFetcher>,
    state: RwLock<HostState>,
    cache: ModuleCache,
    closed: AtomicBool,
    generation: AtomicU64,
}

/// The runtime host: owns the worker set, their engine instances, and the
/// module cache. Cheap to clone; all clones share one host.
#[derive(Clone)]
pub struct RuntimeHost {
    inner: Arc<HostInner>,
}

impl RuntimeHost {
    pub fn new(
        workers: WorkerSet,
        engine: Arc<dyn IsolateEngine>,
        fetcher: Arc<dyn ModuleFetcher>,
    ) -> Result<Self, String> {
        let inner = Arc::new(HostInner {
            engine,
            fetcher,
            state: RwLock::new(HostState {
                workers: workers.clone(),
                instances: HashMap::new(),
            }),
            cache: ModuleCache::new(),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        });
        let instances = inner.instantiate_set(&workers)?;
        inner.write_state().instances = instances;
        stdio::logf!(
            "runtime",
            "installed {} worker(s), entry: {}",
            workers.len(),
            workers.entry().name
        );
        Ok(Self { inner })
    }

    /// Route a request to the entry worker.
    pub async fn dispatch(&self, req: RequestEnvelope) -> Result<ResponseEnvelope, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        let entry = {
            let state = self.inner.read_state();
            state.workers.entry().name.clone()
        };
        self.inner.clone().dispatch_worker(&entry, req).await
    }

    /// Route a request to a named worker. This is the same path service
    /// bindings take; it never crosses a network socket.
    pub async fn dispatch_to(
        &self,
        worker: &str,
        req: RequestEnvelope,
    ) -> Result<ResponseEnvelope, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        self.inner.clone().dispatch_worker(worker, req).await
    }

    /// Replace the worker set (or just the entry worker's bindings).
    /// The new instances are built before the old ones are torn down, so a
    /// bad set leaves the previous generation serving. The listener and any
    /// open SSE or inspector connections are not touched here.
    pub fn reload(&self, options: ReloadOptions) -> Result<(), String> {
        if self.is_closed() {
            return Err("runtime host is closed".to_string());
        }
        let code_changed = options.workers.is_some();
        let next = {
            let state = self.inner.read_state();
            match (options.workers, options.env) {
                (Some(set), _) => set,
                (None, Some(env)) => state.workers.with_entry_bindings(env),
                (None, None) => state.workers.clone(),
            }
        };
        let instances = self.inner.instantiate_set(&next)?;
        {
            let mut state = self.inner.write_state();
            for (_, old) in state.instances.drain() {
                old.dispose();
            }
            state.workers = next;
            state.instances = instances;
        }
        if code_changed {
            let evicted = self.inner.cache.clear();
            tracing::debug!(evicted, "module cache cleared on reload");
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        stdio::logf!("reload", "worker set installed (generation {})", generation);
        Ok(())
    }

    /// Eagerly load the entry worker's module graph. Backs the warmup
    /// endpoint so the first real request skips the cold fetch.
    pub async fn warm(&self) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        let def = {
            let state = self.inner.read_state();
            state.workers.entry().clone()
        };
        self.inner.ensure_module_loaded(&def).await.map(|_| ())
    }

    /// Tear the host down. Idempotent; later dispatches get `Closed`.
    pub fn dispose(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.inner.write_state();
            for (_, instance) in state.instances.drain() {
                instance.dispose();
            }
        }
        self.inner.cache.clear();
        stdio::log("runtime", "host disposed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Monotonic counter bumped on every successful reload.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Evict the given module ids and every transitive importer.
    pub fn invalidate_modules(&self, changed: &[String]) -> usize {
        self.inner.cache.invalidate(changed)
    }

    /// Drop the whole module cache (full-reload semantics).
    pub fn clear_modules(&self) -> usize {
        self.inner.cache.clear()
    }

    pub fn cached_modules(&self) -> usize {
        self.inner.cache.len()
    }

    /// The module source this host fetches through. The front door exposes
    /// it on the module fetch endpoint so external tooling sees the same
    /// compiled output the host does.
    pub fn module_fetcher(&self) -> Arc<dyn ModuleFetcher> {
        self.inner.fetcher.clone()
    }
}

impl HostInner {
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, HostState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, HostState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn instantiate_set(
        self: &Arc<Self>,
        set: &WorkerSet,
    ) -> Result<HashMap<String, Arc<dyn WorkerInstance>>, String> {
        let mut instances = HashMap::new();
        for def in set.iter() {
            let services = self.service_router(def);
            let instance = self
                .engine
                .instantiate(def, services)
                .map_err(|e| format!("failed to instantiate worker {}: {}", def.name, e))?;
            instances.insert(def.name.clone(), instance);
        }
        Ok(instances)
    }

    fn service_router(self: &Arc<Self>, def: &WorkerDefinition) -> ServiceRouter {
        ServiceRouter::new(
            def.service_bindings.clone(),
            Arc::new(HostServiceDispatch {
                inner: Arc::downgrade(self),
            }),
        )
    }

    async fn dispatch_worker(
        self: Arc<Self>,
        name: &str,
        req: RequestEnvelope,
    ) -> Result<ResponseEnvelope, DispatchError> {
        let (instance, def) = {
            let state = self.read_state();
            let def = state
                .workers
                .get(name)
                .cloned()
                .ok_or_else(|| DispatchError::UnknownWorker {
                    name: name.to_string(),
                })?;
            let instance =
                state
                    .instances
                    .get(name)
                    .cloned()
                    .ok_or_else(|| DispatchError::UnknownWorker {
                        name: name.to_string(),
                    })?;
            (instance, def)
        };

        let entry_code = self.ensure_module_loaded(&def).await?;
        let ctx = FetchContext {
            bindings: def.bindings.clone(),
            entry_code,
            services: self.service_router(&def),
        };

        tracing::debug!(worker = %def.name, url = %req.url, "dispatching");
        match AssertUnwindSafe(instance.fetch(req, ctx)).catch_unwind().await {
            Ok(Ok(res)) => Ok(res),
            Ok(Err(stack)) => Err(DispatchError::Worker { stack }),
            Err(panic) => Err(DispatchError::Worker {
                stack: panic_text(panic),
            }),
        }
    }

    /// Load the worker's entry module graph through the cache, fetching
    /// cold modules from the bundler. Inline module sources satisfy ids the
    /// bundler does not know, so purely inline workers need no bundler at
    /// all. Returns the entry module's code.
    async fn ensure_module_loaded(
        &self,
        def: &WorkerDefinition,
    ) -> Result<Option<String>, DispatchError> {
        let Some(entry) = def.entry_module() else {
            return Ok(None);
        };
        let entry_id = entry.path.clone();
        if let Some(hit) = self.cache.get(&entry_id) {
            return Ok(Some(hit.code));
        }

        let mut queue: VecDeque<(String, Option<String>)> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(entry_id.clone());
        queue.push_back((entry_id.clone(), None));

        while let Some((id, importer)) = queue.pop_front() {
            if self.cache.contains(&id) {
                continue;
            }
            let entry = match self.fetcher.fetch_module(&id, importer.as_deref()).await {
                Ok(fetched) => ModuleCacheEntry {
                    code: fetched.code,
                    deps: fetched.deps,
                },
                Err(FetchModuleError::NotFound { .. }) => {
                    match def.modules.iter().find(|m| m.path == id) {
                        Some(module) => ModuleCacheEntry {
                            code: module.source.clone(),
                            deps: Vec::new(),
                        },
                        None => {
                            return Err(DispatchError::ModuleFetch {
                                id,
                                detail: "module not found".to_string(),
                            });
                        }
                    }
                }
                Err(err) => {
                    return Err(DispatchError::ModuleFetch {
                        id,
                        detail: err.to_string(),
                    });
                }
            };
            for dep in &entry.deps {
                if seen.insert(dep.clone()) {
                    queue.push_back((dep.clone(), Some(id.clone())));
                }
            }
            stdio::debugf!("module", "loaded {}", id);
            self.cache.insert(&id, entry);
        }

        Ok(self.cache.get(&entry_id).map(|entry| entry.code))
    }
}

struct HostServiceDispatch {
    inner: Weak<HostInner>,
}

impl ServiceDispatch for HostServiceDispatch {
    fn call(
        &self,
        worker: &str,
        req: RequestEnvelope,
    ) -> BoxFuture<'static, Result<ResponseEnvelope, String>> {
        let inner = self.inner.clone();
        let worker = worker.to_string();
        Box::pin(async move {
            let Some(inner) = inner.upgrade() else {
                return Err("runtime host is gone".to_string());
            };
            inner
                .dispatch_worker(&worker, req)
                .await
                .map_err(|e| e.to_string())
        })
    }
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "worker panicked".to_string()
    }
}
