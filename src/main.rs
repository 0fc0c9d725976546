//! MCP Tool Bridge Entry Point
//!
//! Loads a project descriptor, then serves its commands as MCP tools over
//! HTTP until `/shutdown` or a termination signal.
//!
//! Environment Variables:
//! - HOST: bind address (default: descriptor value, else the advertised address)
//! - PORT: port number (default: descriptor value, else 6274)
//! - WORKER_THREADS: HTTP worker count (default: 1)
//! - RUST_LOG: log filter (default: "info")

use clap::Parser;
use mcp_tool_bridge::core::config::{LoadedProject, ServiceConfig};
use mcp_tool_bridge::core::lifecycle;

#[derive(Parser, Debug)]
#[command(name = "mcp-tool-bridge")]
#[command(about = "Expose project commands as MCP tools over HTTP and SSE")]
#[command(version)]
struct Args {
    /// Project descriptor (JSON) listing the commands to expose
    #[arg(short, long)]
    project: String,

    /// Refuse `POST /shutdown`
    #[arg(long)]
    readonly: bool,

    /// Write `.vscode/mcp.json` on startup and remove the entry on exit
    #[arg(long)]
    patch_ide_config: bool,

    /// Prefix prepended to every tool name
    #[arg(long, default_value = "")]
    tools_prefix: String,

    /// Do not print example requests on startup
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Logs go to stderr; actix's `log` records are forwarded by the subscriber.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let project = match LoadedProject::load(&args.project) {
        Ok(project) => project,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut config = ServiceConfig::from_descriptor(&project.descriptor);
    config.readonly |= args.readonly;
    config.patch_ide_config = args.patch_ide_config;
    config.tools_prefix = args.tools_prefix;
    config.show_usage_examples = !args.quiet;

    lifecycle::serve(project, config).await
}
