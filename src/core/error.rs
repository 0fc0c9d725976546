//! Error Taxonomy
//!
//! Each concern owns a `thiserror` enum. The JSON-RPC surface folds all of
//! them into `RpcError` (see `protocol.rs`); only `RpcError::Internal`
//! carries an `ErrorContext`, which is logged locally and never sent to
//! the caller.

use std::fmt;
use std::panic::Location;

use thiserror::Error;

/// Tool Registry failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Tool names must match `[a-z0-9_-]+`.
    #[error("invalid tool name: {0:?}")]
    InvalidName(String),

    /// The descriptor entry has no executable path.
    #[error("missing 'path' for tool entry: {0}")]
    MissingPath(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// The subprocess could not be started.
///
/// `command` is the command line as the caller sees it (configured path
/// plus arguments), not the resolved absolute path.
#[derive(Debug, Error)]
#[error("failed to launch {command}: {source}")]
pub struct LaunchError {
    pub command: String,
    #[source]
    pub source: std::io::Error,
}

/// Descriptor loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("project file not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("project descriptor declares no commands")]
    NoCommands,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Resource projection failures.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("invalid or missing URI: {0}")]
    InvalidUri(String),

    #[error("failed to read resource {uri}: {source}")]
    Read {
        uri: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where an internal failure happened and what it was.
///
/// Built at the innermost failure site and carried inside the error value,
/// so two unrelated failures never share or overwrite each other's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub method: String,
    pub detail: String,
    pub file: &'static str,
    pub line: u32,
}

impl ErrorContext {
    /// Capture the caller's source location together with `detail`.
    #[track_caller]
    pub fn capture(method: impl Into<String>, detail: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            method: method.into(),
            detail: detail.into(),
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{}): {}", self.method, self.file, self.line, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_records_the_call_site() {
        let expected_line = line!() + 1;
        let ctx = ErrorContext::capture("tools/call", "boom");
        assert_eq!(ctx.line, expected_line);
        assert!(ctx.file.ends_with("error.rs"));
        assert_eq!(ctx.to_string(), format!("tools/call ({}:{}): boom", ctx.file, ctx.line));
    }

    #[test]
    fn separate_failures_keep_separate_contexts() {
        let first = ErrorContext::capture("a", "first");
        let second = ErrorContext::capture("b", "second");
        assert_ne!(first, second);
        assert_eq!(first.detail, "first");
        assert_eq!(second.detail, "second");
    }

    #[test]
    fn launch_error_mentions_the_command() {
        let err = LaunchError {
            command: "./missing --flag".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        };
        assert_eq!(err.to_string(), "failed to launch ./missing --flag: No such file");
    }
}
