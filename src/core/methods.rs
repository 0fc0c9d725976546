//! JSON-RPC method handlers.
//!
//! Each method is a `Method` variant routed to a handler with the uniform
//! signature `(&Params) -> Result<Value, RpcError>`. `tools/call` is the
//! only handler with side effects (gate, subprocess, broadcasts); the rest
//! are reads over the registry and the descriptor.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, error};

use crate::core::gate::SingleFlightGate;
use crate::core::hub::BroadcastHub;
use crate::core::protocol::{JSONRPC_VERSION, RpcError};
use crate::core::error::ErrorContext;
use crate::tools::resources::ResourceCatalog;
use crate::tools::runner::{ProcessRunner, RunResult, normalize_args};
use crate::tools::{Tool, ToolRegistry};

pub type Params = Map<String, Value>;
pub type RpcResult = Result<Value, RpcError>;

/// Protocol version answered when the client does not name one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    ToolsList,
    ToolsCall,
    Ping,
    ResourcesList,
    ResourcesRead,
    TemplatesList,
    Help,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "initialize" => Method::Initialize,
            "tools/list" => Method::ToolsList,
            "tools/call" => Method::ToolsCall,
            "ping" => Method::Ping,
            "resources/list" => Method::ResourcesList,
            "resources/read" => Method::ResourcesRead,
            "templates/list" | "resources/templates/list" => Method::TemplatesList,
            "help" => Method::Help,
            _ => return None,
        };
        Some(method)
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Initialize => "initialize",
            Method::ToolsList => "tools/list",
            Method::ToolsCall => "tools/call",
            Method::Ping => "ping",
            Method::ResourcesList => "resources/list",
            Method::ResourcesRead => "resources/read",
            Method::TemplatesList => "templates/list",
            Method::Help => "help",
        }
    }
}

/// Server metadata reported by `initialize`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Everything the handlers read or touch.
pub struct ServiceContext {
    pub server: ServerInfo,
    pub registry: Arc<ToolRegistry>,
    pub catalog: ResourceCatalog,
    pub runner: ProcessRunner,
    pub gate: SingleFlightGate,
    pub hub: BroadcastHub,
}

impl ServiceContext {
    pub async fn call(&self, method: Method, params: &Params) -> RpcResult {
        match method {
            Method::Initialize => self.initialize(params).await,
            Method::ToolsList => self.tools_list(params).await,
            Method::ToolsCall => self.tools_call(params).await,
            Method::Ping => self.ping(params).await,
            Method::ResourcesList => self.resources_list(params).await,
            Method::ResourcesRead => self.resources_read(params).await,
            Method::TemplatesList => self.templates_list(params).await,
            Method::Help => self.help(params).await,
        }
    }

    async fn initialize(&self, params: &Params) -> RpcResult {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        Ok(json!({
            "protocolVersion": protocol_version,
            "serverInfo": {
                "name": self.server.name,
                "version": self.server.version
            },
            "capabilities": {
                "tools": {},
                "resources": {},
                "prompts": {}
            }
        }))
    }

    async fn tools_list(&self, _params: &Params) -> RpcResult {
        let tools: Vec<&Tool> = self.registry.visible().collect();
        Ok(json!({ "tools": tools }))
    }

    async fn ping(&self, _params: &Params) -> RpcResult {
        Ok(json!({}))
    }

    async fn tools_call(&self, params: &Params) -> RpcResult {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::InvalidParams("missing tool name".to_string()))?;
        let args = match params.get("arguments") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(arguments)) => normalize_args(arguments.get("args")),
            Some(_) => {
                return Err(RpcError::InvalidParams(
                    "'arguments' must be an object".to_string(),
                ));
            }
        };

        let Some(permit) = self.gate.try_acquire(name) else {
            debug!(tool = name, "Rejecting tools/call, another tool is running");
            return Err(RpcError::Busy);
        };

        let outcome = self.execute(name, args).await;
        permit.release();

        match outcome {
            Ok(result) => {
                self.hub.broadcast(&json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "method": "tools/result",
                    "params": {"name": name, "result": result},
                }))
                .await;
                Ok(content_wrapper(result))
            }
            Err(err) => {
                self.hub.broadcast(&json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "method": "tools/error",
                    "params": {"name": name, "error": err.message()},
                }))
                .await;
                Err(err)
            }
        }
    }

    async fn execute(&self, name: &str, args: Vec<String>) -> RpcResult {
        let tool = self.registry.lookup(name)?;
        let invocation = self.runner.invocation(tool, args);
        let result: RunResult = self.runner.run(&invocation).await?;
        serde_json::to_value(&result).map_err(|e| {
            let ctx = ErrorContext::capture(Method::ToolsCall.name(), e.to_string());
            error!(context = %ctx, "Failed to encode tool result");
            RpcError::Internal(ctx)
        })
    }

    async fn resources_list(&self, _params: &Params) -> RpcResult {
        Ok(json!({ "resources": self.catalog.list() }))
    }

    async fn resources_read(&self, params: &Params) -> RpcResult {
        let uri = params.get("uri").and_then(Value::as_str);
        let contents = self.catalog.read(uri).await?;
        Ok(json!({ "contents": [contents] }))
    }

    async fn templates_list(&self, _params: &Params) -> RpcResult {
        Ok(json!({ "resourceTemplates": self.catalog.templates() }))
    }

    async fn help(&self, params: &Params) -> RpcResult {
        Ok(self.help_data(params.get("command").and_then(Value::as_str)))
    }

    /// Help for every visible tool, or for `command` alone. Missing data is
    /// reported inside the result, never as a failure.
    pub fn help_data(&self, command: Option<&str>) -> Value {
        match command {
            Some(name) => match self.registry.lookup(name) {
                Ok(tool) => json!({ "commands": [help_entry(tool)] }),
                Err(_) => json!({ "error": format!("No help available for '{}'", name) }),
            },
            None => {
                let commands: Vec<Value> = self.registry.visible().map(help_entry).collect();
                if commands.is_empty() {
                    json!({ "error": "Help metadata not available" })
                } else {
                    json!({ "commands": commands })
                }
            }
        }
    }
}

fn help_entry(tool: &Tool) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "usage": format!("{} [args...]", tool.name),
        "inputSchema": tool.input_schema,
    })
}

/// Adapt a tool result for MCP clients: strings become a text block as-is,
/// structured values a pretty-printed JSON text block plus
/// `structuredContent`.
pub fn content_wrapper(result: Value) -> Value {
    match result {
        Value::String(text) => json!({
            "isError": false,
            "content": [{"type": "text", "text": text}]
        }),
        structured => {
            let pretty = serde_json::to_string_pretty(&structured).unwrap_or_default();
            json!({
                "isError": false,
                "content": [{"type": "text", "text": format!("\n{}", pretty)}],
                "structuredContent": structured
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        for method in [
            Method::Initialize,
            Method::ToolsList,
            Method::ToolsCall,
            Method::Ping,
            Method::ResourcesList,
            Method::ResourcesRead,
            Method::TemplatesList,
            Method::Help,
        ] {
            assert_eq!(Method::from_name(method.name()), Some(method));
        }
        assert_eq!(Method::from_name("resources/templates/list"), Some(Method::TemplatesList));
        assert_eq!(Method::from_name("tools/delete"), None);
    }

    #[test]
    fn wraps_strings_as_plain_text() {
        assert_eq!(
            content_wrapper(json!("done")),
            json!({"isError": false, "content": [{"type": "text", "text": "done"}]})
        );
    }

    #[test]
    fn wraps_structured_results_as_pretty_json() {
        let wrapped = content_wrapper(json!({"status": 0}));
        assert_eq!(wrapped["content"][0]["text"], "\n{\n  \"status\": 0\n}");
        assert_eq!(wrapped["structuredContent"]["status"], 0);
    }
}
