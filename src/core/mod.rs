//! Core Service Module
//!
//! - protocol.rs: JSON-RPC envelopes and error codes
//! - dispatcher.rs: framing, validation and batch handling
//! - methods.rs: per-method handlers
//! - hub.rs: SSE broadcast hub
//! - gate.rs: single-flight execution gate
//! - server.rs: HTTP/SSE transport with Actix Web
//! - lifecycle.rs: bind address, shutdown and the serve loop
//! - config.rs: project descriptor and service settings
//! - error.rs: error taxonomy
//! - ide.rs: IDE integration descriptor

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod hub;
pub mod ide;
pub mod lifecycle;
pub mod methods;
pub mod protocol;
pub mod server;
