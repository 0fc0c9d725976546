//! Service lifecycle: bind-address resolution, the shutdown condition, and
//! the serve loop that ties the HTTP server, signal handling and the IDE
//! descriptor together.

use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;

use actix_web::dev::ServerHandle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::config::{LoadedProject, ServiceConfig};
use crate::core::ide;
use crate::core::server::{AppState, run_server_http};

/// One-way shutdown flag shared by the HTTP handlers, the SSE streams and
/// the serve loop. Once triggered it stays triggered.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// Where the listener binds and what address clients are told to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTarget {
    pub host: String,
    pub advertise_ip: String,
    pub port: u16,
}

impl BindTarget {
    pub fn resolve(config: &ServiceConfig) -> Self {
        let advertise_ip = resolve_advertise_ip();
        let host = config
            .bind_address
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| advertise_ip.clone());
        Self {
            host,
            advertise_ip,
            port: config.port,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.advertise_ip, self.port)
    }
}

/// The address of the interface used for outbound traffic, so remote
/// clients on the same network can reach the service. Falls back to
/// loopback when there is no route.
pub fn resolve_advertise_ip() -> String {
    match outbound_ip() {
        Ok(ip) if !ip.is_unspecified() => ip.to_string(),
        Ok(ip) => {
            warn!("Outbound interface resolved to {}, advertising loopback", ip);
            Ipv4Addr::LOCALHOST.to_string()
        }
        Err(e) => {
            warn!("Could not determine outbound interface, advertising loopback: {}", e);
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}

/// Connecting a UDP socket sends nothing; it only selects a route.
fn outbound_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

fn print_greeting(state: &AppState, target: &BindTarget, config: &ServiceConfig) {
    let base = target.base_url();
    eprintln!("MCP Tool Bridge Starting (HTTP mode)");
    eprintln!("  Name: {}", state.server_name);
    eprintln!("  Version: {}", state.server_version);
    eprintln!("  Base URL: {}/", base);
    eprintln!("  SSE: {}/sse", base);
    eprintln!("  Messages: {}/message", base);
    if config.bind_address.is_some() {
        eprintln!("  Bind Address: {}", target.bind_addr());
    }
    eprintln!("  Worker Threads: {}", config.workers);
    eprintln!("  Tools: {}", state.tool_count);
    if state.readonly {
        eprintln!("  Read-only: shutdown endpoint disabled");
    }
    if config.show_usage_examples {
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  curl -N {}/sse", base);
        eprintln!(
            "  curl -s -X POST {}/message -H 'Content-Type: application/json' \\\n    -d '{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}}'",
            base
        );
        eprintln!("  curl -s {}/status", base);
    }
}

/// Run the service until `/shutdown` or a termination signal.
pub async fn serve(project: LoadedProject, config: ServiceConfig) -> io::Result<()> {
    let target = BindTarget::resolve(&config);
    let shutdown = ShutdownSignal::new();
    let state = AppState::from_project(&project, &config, &target.advertise_ip, shutdown.clone())
        .map_err(io::Error::other)?;

    let server_name = state.server_name.clone();
    let ide_url = ide::sse_url(&target.advertise_ip, target.port);
    if config.patch_ide_config {
        match ide::publish(&project.base_dir, &server_name, &ide_url) {
            Ok(true) => info!("Published {} to {}", ide_url, ide::config_path(&project.base_dir).display()),
            Ok(false) => debug!("IDE descriptor already up to date"),
            Err(e) => warn!("Failed to update IDE descriptor: {}", e),
        }
    }

    print_greeting(&state, &target, &config);

    let server = run_server_http(state, config.workers, &target.bind_addr())?;
    let watcher = tokio::spawn(stop_on_shutdown(shutdown.clone(), server.handle()));

    let result = server.await;
    shutdown.trigger();
    watcher.abort();

    if config.patch_ide_config {
        if let Err(e) = ide::remove(&project.base_dir, &server_name, &ide_url) {
            warn!("Failed to clean up IDE descriptor: {}", e);
        }
    }
    info!("MCP Tool Bridge stopped");
    result
}

async fn stop_on_shutdown(shutdown: ShutdownSignal, handle: ServerHandle) {
    tokio::select! {
        _ = shutdown.wait() => info!("Shutdown requested"),
        _ = termination_signal() => {
            info!("Termination signal received, shutting down");
            shutdown.trigger();
        }
    }
    handle.stop(true).await;
}

async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
