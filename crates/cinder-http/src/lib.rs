//! Front door of the cinder dev runtime: the HTTP listener that decides,
//! per request, between static assets, the proxy short-circuit, and a
//! worker dispatch, plus the well-known dev endpoints (SSE auto-reload,
//! module fetch, warmup) and the `DevServer` lifecycle handle.

pub mod assets;
pub mod listener;
pub mod server;

mod endpoints;
mod inject;
mod proxy;
mod router;
mod sse;
mod watch;

pub use assets::AssetServer;
pub use listener::PortAllocator;
pub use server::{DevServer, RequestRecord};
