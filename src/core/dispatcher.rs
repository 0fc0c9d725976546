//! JSON-RPC Dispatcher
//!
//! Turns a raw request body into a reply: parse, validate, route, and build
//! envelopes. Validation order is fixed:
//!
//! 1. empty body             -> -32600
//! 2. not JSON               -> -32700 (id null)
//! 3. batch empty / too big  -> -32600; elements are handled one by one
//! 4. not an object          -> -32600
//! 5. `method` not a string  -> -32600
//! 6. `params` not an object -> -32602
//! 7. unknown method         -> -32601
//! 8. anything else failing inside a handler -> -32603 (generic message)
//!
//! Every message gets exactly one envelope; the envelope of a notification
//! is built like any other and then discarded.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{Map, Value, json};
use tracing::{debug, error};

use crate::core::error::ErrorContext;
use crate::core::methods::{Method, Params, RpcResult, ServiceContext};
use crate::core::protocol::{MAX_BATCH_SIZE, MCPResponse, RpcError};

/// What goes back over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Single(MCPResponse),
    Batch(Vec<MCPResponse>),
    /// Only notifications were received; answered with `{}`.
    Acknowledged,
}

impl Reply {
    pub fn into_value(self) -> Value {
        match self {
            Reply::Single(envelope) => to_json(&envelope),
            Reply::Batch(envelopes) => Value::Array(envelopes.iter().map(to_json).collect()),
            Reply::Acknowledged => json!({}),
        }
    }
}

fn to_json(envelope: &MCPResponse) -> Value {
    serde_json::to_value(envelope).unwrap_or_else(|e| {
        error!("Failed to encode response envelope: {}", e);
        json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32603, "message": "Internal error"}})
    })
}

pub struct Dispatcher {
    ctx: Arc<ServiceContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Handle one HTTP request body.
    pub async fn handle_body(&self, body: &[u8]) -> Reply {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Reply::Single(MCPResponse::failure(
                Value::Null,
                &RpcError::InvalidRequest("Empty request".to_string()),
            ));
        }

        let payload: Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Rejecting unparseable JSON-RPC body: {}", e);
                return Reply::Single(MCPResponse::failure(Value::Null, &RpcError::Parse(e.to_string())));
            }
        };

        match payload {
            Value::Array(items) => self.handle_batch(items).await,
            Value::Object(message) => match self.handle_message(message).await {
                Some(envelope) => Reply::Single(envelope),
                None => Reply::Acknowledged,
            },
            _ => Reply::Single(MCPResponse::failure(Value::Null, &RpcError::invalid_request())),
        }
    }

    async fn handle_batch(&self, items: Vec<Value>) -> Reply {
        if items.is_empty() {
            return Reply::Single(MCPResponse::failure(
                Value::Null,
                &RpcError::InvalidRequest("invalid request (empty batch)".to_string()),
            ));
        }
        if items.len() > MAX_BATCH_SIZE {
            return Reply::Single(MCPResponse::failure(
                Value::Null,
                &RpcError::InvalidRequest("batch too large".to_string()),
            ));
        }

        let mut replies = Vec::with_capacity(items.len());
        for item in items {
            let reply = match item {
                Value::Object(message) => self.handle_message(message).await,
                _ => Some(MCPResponse::failure(Value::Null, &RpcError::invalid_request())),
            };
            replies.extend(reply);
        }

        if replies.is_empty() {
            Reply::Acknowledged
        } else {
            Reply::Batch(replies)
        }
    }

    /// Handle one message object. `None` when it was a notification.
    pub async fn handle_message(&self, message: Map<String, Value>) -> Option<MCPResponse> {
        let id = message.get("id").cloned();
        let outcome = self.evaluate(&message).await;

        if let Err(err) = &outcome {
            match err.context() {
                Some(ctx) => error!(context = %ctx, "JSON-RPC handler failed"),
                None => debug!(id = ?id, "JSON-RPC error {}: {}", err.code(), err.message()),
            }
        }

        let envelope = MCPResponse::from_outcome(id.clone().unwrap_or(Value::Null), &outcome);
        id.map(|_| envelope)
    }

    async fn evaluate(&self, message: &Map<String, Value>) -> RpcResult {
        let Some(Value::String(name)) = message.get("method") else {
            return Err(RpcError::invalid_request());
        };
        let params: Params = match message.get("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params.clone(),
            Some(_) => return Err(RpcError::invalid_params()),
        };
        let method = Method::from_name(name).ok_or_else(|| RpcError::MethodNotFound(name.clone()))?;

        debug!(method = name.as_str(), id = ?message.get("id"), "Dispatching JSON-RPC call");

        match AssertUnwindSafe(self.ctx.call(method, &params)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                Err(RpcError::Internal(ErrorContext::capture(method.name(), detail)))
            }
        }
    }
}
