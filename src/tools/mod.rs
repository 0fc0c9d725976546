//! Tools Module
//!
//! The Tool Registry maps tool names to the external commands they run. It
//! is built once from the project descriptor and is read-only afterwards.
//!
//! - runner.rs: launches a tool and streams its output
//! - resources.rs: resource and template projections over the descriptor

pub mod resources;
pub mod runner;

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::core::config::ProjectDescriptor;
use crate::core::error::RegistryError;

/// A registered tool.
///
/// Serializes to the `tools/list` shape; the executable path and the hidden
/// flag never leave the process.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip)]
    pub path: String,
    #[serde(skip)]
    pub hidden: bool,
}

/// Input schema shared by every command tool: an optional list of string
/// arguments appended to the command line.
pub fn default_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "args": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Optional command-line arguments"
            }
        },
        "required": [],
        "additionalProperties": false
    })
}

/// Tool names must match `[a-z0-9_-]+`.
pub fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// Registry of available tools, in registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a visible tool. Re-registering a name replaces the old entry
    /// in place.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        input_schema: Value,
        path: &str,
    ) -> Result<(), RegistryError> {
        self.insert(Tool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            path: path.to_string(),
            hidden: false,
        })
    }

    pub fn insert(&mut self, tool: Tool) -> Result<(), RegistryError> {
        if !is_valid_tool_name(&tool.name) {
            return Err(RegistryError::InvalidName(tool.name));
        }
        if tool.path.trim().is_empty() {
            return Err(RegistryError::MissingPath(tool.name));
        }
        match self.index.get(&tool.name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(tool.name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Tool, RegistryError> {
        self.index
            .get(name)
            .map(|&slot| &self.tools[slot])
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// Every registered tool, hidden ones included.
    pub fn list(&self) -> &[Tool] {
        &self.tools
    }

    /// Tools published through `tools/list`, `help` and the status count.
    pub fn visible(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter().filter(|t| !t.hidden)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Build the registry from the descriptor's `commands`, prefixing every
    /// key with `prefix`.
    pub fn from_descriptor(
        descriptor: &ProjectDescriptor,
        prefix: &str,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (key, entry) in &descriptor.commands {
            let name = format!("{}{}", prefix, key);
            let description = entry
                .description
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| format!("Run '{}' tool.", key));
            registry.insert(Tool {
                name: name.clone(),
                description,
                input_schema: default_input_schema(),
                path: entry.path.clone().unwrap_or_default(),
                hidden: entry.hidden,
            })?;
        }
        Ok(registry)
    }
}
