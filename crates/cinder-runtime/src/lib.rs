//! The cinder Runtime Host: worker registry, module cache with
//! reverse-dependency invalidation, and the swappable isolate-engine
//! boundary. Everything here is in-process; network legs live in
//! `cinder-bridge` and `cinder-http`.

pub mod cache;
pub mod engine;
pub mod host;

pub use cache::{ModuleCache, ModuleCacheEntry};
pub use engine::{
    BoxFuture, FetchContext, IsolateEngine, NativeEngine, ServiceDispatch, ServiceRouter,
    WorkerInstance,
};
pub use host::{DispatchError, ReloadOptions, RuntimeHost};
