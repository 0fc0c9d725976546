//! Configuration
//!
//! The project descriptor (JSON, consumed) and the service settings derived
//! from it, the command line and the environment.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::core::error::ConfigError;

pub const DEFAULT_PORT: u16 = 6274;

fn default_project_name() -> String {
    "MCP service".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// The project/tool descriptor file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDescriptor {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub mcp_server_port: Option<u16>,
    #[serde(default)]
    pub mcp_server_bind_address: Option<String>,
    #[serde(default)]
    pub mcp_server_readonly: bool,
    #[serde(default)]
    pub commands: BTreeMap<String, CommandEntry>,
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateEntry>,
}

/// One command exposed as a tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandEntry {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    /// Markdown file published through `resources/list`.
    #[serde(default)]
    pub resource: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateEntry {
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Argument name to default value.
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

impl ProjectDescriptor {
    pub fn from_json(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let descriptor: ProjectDescriptor =
            serde_json::from_str(text).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?;
        if descriptor.commands.is_empty() {
            return Err(ConfigError::NoCommands);
        }
        Ok(descriptor)
    }

    pub fn port(&self) -> u16 {
        self.mcp_server_port.unwrap_or(DEFAULT_PORT)
    }

    /// Commands counted by the status endpoint.
    pub fn visible_command_count(&self) -> usize {
        self.commands.values().filter(|c| !c.hidden).count()
    }
}

/// A descriptor together with the directory everything in it is relative to.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub descriptor: ProjectDescriptor,
    pub base_dir: PathBuf,
}

impl LoadedProject {
    /// Load a descriptor file. `~` is expanded and the path made absolute;
    /// the file's directory becomes the project base directory.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let path = absolutize(&expand_home(path));
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: origin.clone(),
            source,
        })?;
        let descriptor = ProjectDescriptor::from_json(&text, &origin)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Ok(Self {
            descriptor,
            base_dir,
        })
    }
}

/// Runtime settings for the HTTP service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Explicit bind address; `None` binds the advertised address.
    pub bind_address: Option<String>,
    /// Listening port
    pub port: u16,
    /// Refuse `POST /shutdown`
    pub readonly: bool,
    /// HTTP worker count, at least 1
    pub workers: usize,
    /// Prepended to every tool name
    pub tools_prefix: String,
    /// Write `.vscode/mcp.json` on startup and remove the entry on exit
    pub patch_ide_config: bool,
    /// Print example requests in the startup banner
    pub show_usage_examples: bool,
}

impl ServiceConfig {
    /// Settings from the descriptor, with `HOST`, `PORT` and
    /// `WORKER_THREADS` environment overrides applied.
    pub fn from_descriptor(descriptor: &ProjectDescriptor) -> Self {
        let bind_address = std::env::var("HOST")
            .ok()
            .or_else(|| descriptor.mcp_server_bind_address.clone());
        let port = get_env_var("PORT", &descriptor.port().to_string())
            .parse::<u16>()
            .unwrap_or_else(|_| descriptor.port());
        let workers = get_env_var("WORKER_THREADS", "1")
            .parse::<usize>()
            .unwrap_or(1)
            .clamp(1, num_cpus::get().max(1));

        Self {
            bind_address,
            port,
            readonly: descriptor.mcp_server_readonly,
            workers,
            tools_prefix: String::new(),
            patch_ide_config: false,
            show_usage_examples: true,
        }
    }
}

/// Get environment variable value with a default fallback.
pub fn get_env_var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Expand a leading `~` to the user's home directory. `~user` forms are
/// left alone.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => {
            warn!("No home directory known, leaving {} unexpanded", path);
            PathBuf::from(path)
        }
    }
}

/// Join `path` onto the current directory if relative, then normalize.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize(&cwd.join(path))
    }
}

/// Resolve `path` against `base` and normalize it lexically.
pub fn resolve_against(base: &Path, path: &str) -> PathBuf {
    let path = expand_home(path);
    if path.is_absolute() {
        normalize(&path)
    } else {
        normalize(&base.join(path))
    }
}

/// Remove `.` components and fold `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"{
        "project_name": "demo",
        "version": "2.1.0",
        "mcp_server_port": 7000,
        "commands": {
            "echo": {"description": "Echo things", "path": "/bin/echo", "resource": "docs/echo.md"},
            "secret": {"path": "./tools/secret.sh", "hidden": true}
        },
        "templates": {
            "echo_tpl": {"command": "echo", "args": {"message": "hello"}}
        }
    }"#;

    #[test]
    fn parses_descriptor_fields() {
        let d = ProjectDescriptor::from_json(DESCRIPTOR, "inline").unwrap();
        assert_eq!(d.project_name, "demo");
        assert_eq!(d.version, "2.1.0");
        assert_eq!(d.port(), 7000);
        assert_eq!(d.commands.len(), 2);
        assert!(d.commands["secret"].hidden);
        assert_eq!(d.commands["echo"].resource.as_deref(), Some("docs/echo.md"));
        assert_eq!(d.templates["echo_tpl"].args["message"], "hello");
        assert_eq!(d.visible_command_count(), 1);
    }

    #[test]
    fn applies_defaults() {
        let d = ProjectDescriptor::from_json(r#"{"commands": {"a": {"path": "x"}}}"#, "inline")
            .unwrap();
        assert_eq!(d.project_name, "MCP service");
        assert_eq!(d.version, "1.0.0");
        assert_eq!(d.port(), DEFAULT_PORT);
        assert!(!d.mcp_server_readonly);
        assert!(d.mcp_server_bind_address.is_none());
    }

    #[test]
    fn rejects_descriptor_without_commands() {
        let err = ProjectDescriptor::from_json(r#"{"project_name": "x"}"#, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::NoCommands));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ProjectDescriptor::from_json("{nope", "p.json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_sets_base_dir_to_descriptor_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("project.json");
        std::fs::write(&file, DESCRIPTOR).unwrap();

        let project = LoadedProject::load(file.to_str().unwrap()).unwrap();
        assert_eq!(project.base_dir, normalize(dir.path()));
        assert_eq!(project.descriptor.project_name, "demo");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = LoadedProject::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn expands_home_prefix_only() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/tools/run.sh"), home.join("tools/run.sh"));
        assert_eq!(expand_home("~other/run.sh"), PathBuf::from("~other/run.sh"));
        assert_eq!(expand_home("/bin/echo"), PathBuf::from("/bin/echo"));
    }

    #[test]
    fn resolves_relative_paths_against_base() {
        let base = Path::new("/srv/project");
        assert_eq!(resolve_against(base, "./tools/../bin/run"), PathBuf::from("/srv/project/bin/run"));
        assert_eq!(resolve_against(base, "/bin/echo"), PathBuf::from("/bin/echo"));
    }
}
