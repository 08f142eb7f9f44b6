use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cinder_core::{RequestEnvelope, ResponseEnvelope, WorkerDefinition};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything a worker's fetch handler can see: its plain-text bindings,
/// the compiled entry module (when one was loaded), and the service router
/// for in-process calls to sibling workers.
#[derive(Clone)]
pub struct FetchContext {
    pub bindings: HashMap<String, String>,
    pub entry_code: Option<String>,
    pub services: ServiceRouter,
}

/// Dispatch seam the service router calls back into. Implemented by the
/// host; the indirection keeps worker instances free of host internals.
pub trait ServiceDispatch: Send + Sync {
    fn call(
        &self,
        worker: &str,
        req: RequestEnvelope,
    ) -> BoxFuture<'static, Result<ResponseEnvelope, String>>;
}

/// Resolves a worker's `service_bindings` and dispatches in-process.
/// Calls never cross a network socket.
#[derive(Clone)]
pub struct ServiceRouter {
    bindings: HashMap<String, String>,
    dispatch: Arc<dyn ServiceDispatch>,
}

impl ServiceRouter {
    pub fn new(bindings: HashMap<String, String>, dispatch: Arc<dyn ServiceDispatch>) -> Self {
        Self { bindings, dispatch }
    }

    pub fn has(&self, binding: &str) -> bool {
        self.bindings.contains_key(binding)
    }

    pub async fn call(
        &self,
        binding: &str,
        req: RequestEnvelope,
    ) -> Result<ResponseEnvelope, String> {
        let target = self
            .bindings
            .get(binding)
            .ok_or_else(|| format!("unknown service binding: {}", binding))?;
        self.dispatch.call(target, req).await
    }
}

/// The swappable execution boundary. The host never assumes anything about
/// how a worker runs; a V8 isolate, a subprocess sandbox, or the in-tree
/// native engine all fit behind these two traits.
pub trait IsolateEngine: Send + Sync {
    fn instantiate(
        &self,
        def: &WorkerDefinition,
        services: ServiceRouter,
    ) -> Result<Arc<dyn WorkerInstance>, String>;
}

#[async_trait]
pub trait WorkerInstance: Send + Sync {
    async fn fetch(
        &self,
        req: RequestEnvelope,
        ctx: FetchContext,
    ) -> Result<ResponseEnvelope, String>;

    fn dispose(&self) {}
}

type NativeHandler = Arc<
    dyn Fn(RequestEnvelope, FetchContext) -> BoxFuture<'static, Result<ResponseEnvelope, String>>
        + Send
        + Sync,
>;

/// In-tree engine: workers are Rust handler closures registered by worker
/// name. Used by embedders that script behavior directly and by every test
/// in the workspace.
#[derive(Default)]
pub struct NativeEngine {
    handlers: Mutex<HashMap<String, NativeHandler>>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, worker: &str, handler: F)
    where
        F: Fn(RequestEnvelope, FetchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseEnvelope, String>> + Send + 'static,
    {
        let handler: NativeHandler = Arc::new(move |req, ctx| Box::pin(handler(req, ctx)));
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(worker.to_string(), handler);
    }
}

struct NativeInstance {
    handler: NativeHandler,
}

impl IsolateEngine for NativeEngine {
    fn instantiate(
        &self,
        def: &WorkerDefinition,
        _services: ServiceRouter,
    ) -> Result<Arc<dyn WorkerInstance>, String> {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&def.name)
            .cloned()
            .ok_or_else(|| format!("no native handler registered for worker: {}", def.name))?;
        Ok(Arc::new(NativeInstance { handler }))
    }
}

#[async_trait]
impl WorkerInstance for NativeInstance {
    async fn fetch(
        &self,
        req: RequestEnvelope,
        ctx: FetchContext,
    ) -> Result<ResponseEnvelope, String> {
        (self.handler)(req, ctx).await
    }
}
