//! Exposes a directory of command-line tools to MCP clients over HTTP
//! (JSON-RPC 2.0) with a Server-Sent Events push channel.

pub mod core;
pub mod tools;
