//! Inspector bridge: relays Chrome DevTools Protocol frames between a
//! public debugger port and the runtime's private inspector port, and
//! rewrites bundled stack traces back to original sources on the way out.

pub mod map;
pub mod proxy;

pub use map::SourceMapRewriter;
pub use proxy::InspectorBridge;
