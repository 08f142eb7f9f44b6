use std::env;
use std::path::PathBuf;

/// Dev server configuration. Field defaults describe a bare proxy: no
/// assets, no upstream, no bundler, auto-reload on.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Requested HTTP port. 0 lets the port allocator pick.
    pub port: u16,
    /// Root directory for the static asset stage.
    pub assets_dir: Option<PathBuf>,
    /// Upstream origin for the proxy short-circuit, e.g. `http://localhost:3000`.
    pub proxy: Option<String>,
    /// Inject the auto-reload client into HTML responses.
    pub auto_reload: bool,
    /// Origin of the external bundler the module fetch bridge talks to.
    pub bundler_origin: Option<String>,
    /// Source map used to rewrite worker stack traces.
    pub source_map: Option<PathBuf>,
    /// Public port for the inspector bridge, when debugging is on.
    pub inspector_port: Option<u16>,
    /// Build-output directory watched for rebuilds.
    pub watch_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            assets_dir: None,
            proxy: None,
            auto_reload: true,
            bundler_origin: None,
            source_map: None,
            inspector_port: None,
            watch_dir: None,
        }
    }
}

impl ServerConfig {
    /// Overlay `CINDER_*` environment variables onto this config.
    /// Unset or unparsable variables leave the field alone.
    pub fn overlay_env(mut self) -> Self {
        if let Ok(port) = env::var("CINDER_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(dir) = env::var("CINDER_ASSETS_DIR") {
            if !dir.is_empty() {
                self.assets_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(proxy) = env::var("CINDER_PROXY") {
            if !proxy.is_empty() {
                self.proxy = Some(proxy);
            }
        }
        if let Ok(flag) = env::var("CINDER_AUTO_RELOAD") {
            self.auto_reload = is_truthy(&flag);
        }
        self
    }
}

/// Shared truthiness rule for env flags.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("on"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_default_is_bare_proxy() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 0);
        assert!(config.assets_dir.is_none());
        assert!(config.proxy.is_none());
        assert!(config.auto_reload);
    }
}
