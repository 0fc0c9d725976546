//! HTTP/SSE Transport
//!
//! Routes:
//! - `POST /message`, `POST /`: JSON-RPC 2.0, always answered with HTTP 200
//! - `GET /sse`, `GET /`: Server-Sent Events push channel
//! - `GET /status`, `GET /help`, `POST /shutdown`
//! - `POST /tool/<name>`: legacy direct invocation, one resource per tool

use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    App, HttpResponse, HttpServer, Result,
    dev::Server,
    http::header,
    middleware::{Compress, DefaultHeaders, Logger},
    web,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::config::{LoadedProject, ServiceConfig};
use crate::core::dispatcher::Dispatcher;
use crate::core::error::ConfigError;
use crate::core::gate::SingleFlightGate;
use crate::core::hub::{BroadcastHub, HEARTBEAT_INTERVAL, event_stream};
use crate::core::lifecycle::ShutdownSignal;
use crate::core::methods::{ServerInfo, ServiceContext};
use crate::tools::ToolRegistry;
use crate::tools::resources::ResourceCatalog;
use crate::tools::runner::{ProcessRunner, normalize_args};

/// Largest JSON-RPC request body accepted.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Application state shared across all worker threads.
#[derive(Clone)]
pub struct AppState {
    /// Server name as reported in `initialize` and the IDE descriptor
    pub server_name: String,
    pub server_version: String,
    pub dispatcher: Arc<Dispatcher>,
    /// Advertised host, reported by `/status`
    pub host: String,
    pub port: u16,
    pub readonly: bool,
    /// Commands not marked hidden
    pub tool_count: usize,
    pub shutdown: ShutdownSignal,
    pub heartbeat_every: Duration,
}

impl AppState {
    pub fn from_project(
        project: &LoadedProject,
        config: &ServiceConfig,
        host: &str,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ConfigError> {
        let descriptor = &project.descriptor;
        let registry = ToolRegistry::from_descriptor(descriptor, &config.tools_prefix)?;
        let hub = BroadcastHub::new();
        let server = ServerInfo {
            name: descriptor.project_name.clone(),
            version: descriptor.version.clone(),
        };

        let ctx = ServiceContext {
            server: server.clone(),
            registry: Arc::new(registry),
            catalog: ResourceCatalog::from_descriptor(descriptor, project.base_dir.clone()),
            runner: ProcessRunner::new(hub.clone(), project.base_dir.clone()),
            gate: SingleFlightGate::new(),
            hub,
        };

        Ok(Self {
            server_name: server.name,
            server_version: server.version,
            dispatcher: Arc::new(Dispatcher::new(Arc::new(ctx))),
            host: host.to_string(),
            port: config.port,
            readonly: config.readonly,
            tool_count: descriptor.visible_command_count(),
            shutdown,
            heartbeat_every: HEARTBEAT_INTERVAL,
        })
    }

    fn context(&self) -> &ServiceContext {
        self.dispatcher.context()
    }
}

/// JSON-RPC endpoint. Every outcome, including parse errors, is a 200.
async fn rpc_handler(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse> {
    let reply = state.dispatcher.handle_body(&body).await;
    Ok(HttpResponse::Ok().json(reply.into_value()))
}

/// Server-Sent Events endpoint.
///
/// Subscribes to the broadcast hub and streams its frames with periodic
/// heartbeats. The stream ends when the client disconnects, the hub drops
/// the subscriber, or shutdown begins.
async fn sse_handler(state: web::Data<AppState>) -> Result<HttpResponse> {
    let subscriber = state.context().hub.subscribe();
    debug!(subscriber = subscriber.id(), "SSE client connected");
    let stream = event_stream(subscriber, state.shutdown.clone(), state.heartbeat_every);

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        // Compression would buffer frames
        .insert_header(header::ContentEncoding::Identity)
        .insert_header(header::CacheControl(vec![header::CacheDirective::NoCache]))
        .insert_header(("x-accel-buffering", "no"))
        .streaming(stream))
}

async fn status_handler(state: web::Data<AppState>) -> Result<HttpResponse> {
    let current = state
        .context()
        .gate
        .current()
        .map(|record| record.to_status())
        .unwrap_or(Value::Null);
    let status = json!({
        "status": "ok",
        "host": state.host,
        "port": state.port,
        "readonly": state.readonly,
        "tool_count": state.tool_count,
        "current": current,
    });
    let body = serde_json::to_string_pretty(&status).unwrap_or_else(|_| status.to_string());
    Ok(HttpResponse::Ok().content_type("application/json").body(body))
}

async fn shutdown_handler(state: web::Data<AppState>) -> Result<HttpResponse> {
    if state.readonly {
        warn!("Refusing shutdown request in read-only mode");
        return Ok(HttpResponse::Forbidden().json(json!({"error": "readonly mode"})));
    }
    info!("Shutdown requested over HTTP");
    state.shutdown.trigger();
    Ok(HttpResponse::Ok().json(json!({"status": "shutting_down"})))
}

#[derive(Deserialize)]
struct HelpQuery {
    command: Option<String>,
}

async fn help_handler(
    state: web::Data<AppState>,
    query: web::Query<HelpQuery>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.context().help_data(query.command.as_deref())))
}

/// Tool name bound to one `/tool/<name>` resource.
struct ToolRoute(String);

/// Legacy direct invocation.
///
/// Body: `{"args": [...]}` or `{"args": "..."}`; a missing or non-JSON body
/// runs the tool without arguments. Shares the single-flight gate with
/// `tools/call`.
async fn legacy_tool_handler(
    state: web::Data<AppState>,
    route: web::Data<ToolRoute>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let name = route.0.as_str();
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let args = normalize_args(payload.get("args"));

    let ctx = state.context();
    let Some(permit) = ctx.gate.try_acquire(name) else {
        return Ok(HttpResponse::Conflict().json(json!({
            "error": "Busy: another tool is currently running in this workspace"
        })));
    };

    let outcome = match ctx.registry.lookup(name) {
        Ok(tool) => {
            let invocation = ctx.runner.invocation(tool, args);
            ctx.runner.run(&invocation).await.map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    };
    permit.release();

    match outcome {
        Ok(result) => Ok(HttpResponse::Ok().json(json!({ "results": [result] }))),
        Err(error) => {
            warn!(tool = name, "Legacy tool invocation failed: {}", error);
            Ok(HttpResponse::InternalServerError().json(json!({ "error": error })))
        }
    }
}

/// Register state and every route. Shared by the server and the tests.
pub fn configure(cfg: &mut web::ServiceConfig, state: &AppState) {
    cfg.app_data(web::Data::new(state.clone()))
        .app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
        .route("/status", web::get().to(status_handler))
        .route("/shutdown", web::post().to(shutdown_handler))
        .route("/help", web::get().to(help_handler))
        .route("/sse", web::get().to(sse_handler))
        .route("/message", web::post().to(rpc_handler))
        .service(
            web::resource("/")
                .route(web::get().to(sse_handler))
                .route(web::post().to(rpc_handler)),
        );

    for tool in state.context().registry.list() {
        cfg.service(
            web::resource(format!("/tool/{}", tool.name))
                .app_data(web::Data::new(ToolRoute(tool.name.clone())))
                .route(web::post().to(legacy_tool_handler)),
        );
    }
}

/// Build and start the HTTP server. Signal handling is left to the caller.
pub fn run_server_http(state: AppState, workers: usize, bind_addr: &str) -> std::io::Result<Server> {
    info!("Binding {} with {} worker(s)", bind_addr, workers);

    let server = HttpServer::new(move || {
        let state = state.clone();
        App::new()
            // Enable compression for JSON responses (gzip/brotli)
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY")),
            )
            // %r = request line, %s = status, %Dms = duration in milliseconds
            .wrap(Logger::new("%r %s %Dms"))
            .configure(move |cfg| configure(cfg, &state))
    })
    .workers(workers)
    .disable_signals()
    .keep_alive(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(5)
    .bind(bind_addr)?
    .run();

    Ok(server)
}
