//! # cinder-stdio
//!
//! Terminal output utilities for the Cinder dev server.
//! Consistent formatting across the proxy, runtime host, and tooling.
//!
//! ## Format
//!
//! ```text
//! [action] message
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use cinder_stdio as stdio;
//!
//! stdio::log("serve", "listening on 127.0.0.1:9100");
//! stdio::success("workers installed");
//! stdio::error("reload", "worker set rejected");
//! ```
//!
//! ## Log Levels
//!
//! Control output with `LOG_LEVEL` environment variable:
//! - `error` - Errors only
//! - `info` - Default (startup + important messages)
//! - `debug` - Verbose output

use std::env;
use std::sync::OnceLock;

/// Log level for cinder services
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

static LOG_LEVEL: OnceLock<LogLevel> = OnceLock::new();

fn emit_line(line: &str) {
    eprintln!("{}", line);
}

/// Get the current log level (cached from LOG_LEVEL env var)
pub fn log_level() -> LogLevel {
    *LOG_LEVEL.get_or_init(|| {
        env::var("LOG_LEVEL")
            .map(|s| LogLevel::from_str(&s))
            .unwrap_or(LogLevel::Info)
    })
}

/// Check if debug logging is enabled
pub fn is_debug() -> bool {
    log_level() >= LogLevel::Debug
}

/// Check if info logging is enabled
pub fn is_info() -> bool {
    log_level() >= LogLevel::Info
}

/// Log an action with a message
/// Format: `[action] message`
///
/// # Example
/// ```
/// cinder_stdio::log("serve", "assets mounted");
/// // Output: [serve] assets mounted
/// ```
pub fn log(action: &str, message: &str) {
    if log_level() >= LogLevel::Info {
        emit_line(&format!("[{}] {}", action, message));
    }
}

/// Log an error
/// Format: `[action] message`
pub fn error(action: &str, message: &str) {
    emit_line(&format!("[{}] {}", action, message));
}

/// Log a warning
/// Format: `[warn] [name] message`
pub fn warn(name: &str, message: &str) {
    emit_line(&format!("[warn] [{}] {}", name, message));
}

/// Log a simple warning without component name
/// Format: `[warn] message`
pub fn warn_simple(message: &str) {
    emit_line(&format!("[warn] {}", message));
}

/// Success message
/// Format: `[ok] message`
pub fn success(message: &str) {
    emit_line(&format!("[ok] {}", message));
}

/// Failure message
/// Format: `[fail] message`
pub fn fail(message: &str) {
    emit_line(&format!("[fail] {}", message));
}

/// Info line with label
/// Format: `  label     value`
///
/// # Example
/// ```
/// cinder_stdio::info("port", "9100");
/// // Output:   port       9100
/// ```
pub fn info(label: &str, value: &str) {
    emit_line(&format!("  {:<10} {}", label, value));
}

/// Detail line with arrow
/// Format: `    -> message`
pub fn detail(message: &str) {
    emit_line(&format!("    -> {}", message));
}

/// Debug log (only shown when LOG_LEVEL=debug)
pub fn debug(action: &str, message: &str) {
    if log_level() >= LogLevel::Debug {
        emit_line(&format!("[{}] {}", action, message));
    }
}

/// Print a raw line (no formatting).
pub fn raw(message: &str) {
    emit_line(message);
}

// ============================================================
// Macros for convenient formatting
// ============================================================

/// Log with format string support
///
/// # Example
/// ```
/// cinder_stdio::logf!("serve", "dispatched {} in {}ms", "worker", 12);
/// ```
#[macro_export]
macro_rules! logf {
    ($action:expr, $($arg:tt)*) => {
        if $crate::log_level() >= $crate::LogLevel::Info {
            $crate::raw(&format!(concat!("[", $action, "] {}"), format!($($arg)*)));
        }
    };
}

/// Error with format string support
#[macro_export]
macro_rules! errorf {
    ($action:expr, $($arg:tt)*) => {
        $crate::raw(&format!(concat!("[", $action, "] {}"), format!($($arg)*)));
    };
}

/// Debug with format string support (only shown when LOG_LEVEL=debug)
#[macro_export]
macro_rules! debugf {
    ($action:expr, $($arg:tt)*) => {
        if $crate::log_level() >= $crate::LogLevel::Debug {
            $crate::raw(&format!(concat!("[", $action, "] {}"), format!($($arg)*)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("error"), LogLevel::Error);
        assert_eq!(LogLevel::from_str("info"), LogLevel::Info);
        assert_eq!(LogLevel::from_str("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from_str("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
    }
}
