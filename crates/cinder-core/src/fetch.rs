//! Module fetch contract between the runtime host and the external bundler.
//! The host consumes it through `ModuleFetcher`; the front door serves the
//! same wire shape from `/__cinder_fetch_module`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A compiled module as the bundler hands it over: code, an optional
/// source map, and the ids of the modules it imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedModule {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<serde_json::Value>,
    #[serde(default)]
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchModuleError {
    /// The bundler does not know the module. Carries the id so dispatch can
    /// name it in the 500 body.
    NotFound { id: String },
    /// The bundler was unreachable or answered with garbage.
    Transport(String),
}

impl std::fmt::Display for FetchModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchModuleError::NotFound { id } => write!(f, "module not found: {}", id),
            FetchModuleError::Transport(detail) => write!(f, "module fetch failed: {}", detail),
        }
    }
}

impl std::error::Error for FetchModuleError {}

/// Capability to resolve a module id to compiled output. Implemented over
/// HTTP by the bridge crate and in-memory by tests and embedders.
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch_module(
        &self,
        id: &str,
        importer: Option<&str>,
    ) -> Result<FetchedModule, FetchModuleError>;
}

/// In-memory fetcher backed by a fixed module table. Doubles as the module
/// source behind `/__cinder_fetch_module` when no real bundler is attached.
#[derive(Debug, Default, Clone)]
pub struct StaticModuleFetcher {
    modules: std::collections::HashMap<String, FetchedModule>,
}

impl StaticModuleFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, id: impl Into<String>, module: FetchedModule) -> Self {
        self.modules.insert(id.into(), module);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, module: FetchedModule) {
        self.modules.insert(id.into(), module);
    }
}

#[async_trait]
impl ModuleFetcher for StaticModuleFetcher {
    async fn fetch_module(
        &self,
        id: &str,
        _importer: Option<&str>,
    ) -> Result<FetchedModule, FetchModuleError> {
        self.modules
            .get(id)
            .cloned()
            .ok_or_else(|| FetchModuleError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetched_module_json_shape() {
        let json = r#"{"code":"export default 1","deps":["/util.js"]}"#;
        let module: FetchedModule = serde_json::from_str(json).unwrap();
        assert_eq!(module.code, "export default 1");
        assert!(module.map.is_none());
        assert_eq!(module.deps, vec!["/util.js"]);
    }

    #[test]
    fn test_not_found_names_the_module() {
        let err = FetchModuleError::NotFound {
            id: "/app/missing.js".to_string(),
        };
        assert!(err.to_string().contains("/app/missing.js"));
    }
}
