//! Warden gateway binary.
//!
//! Thin shell over the `warden` core: parses arguments, points logging at
//! stderr (stdout carries the JSON-RPC stream), optionally pre-locks the
//! workspace root and runs the startup self-audit, then serves stdio until
//! the client disconnects. A failed self-audit refuses to boot, printing
//! the failing invariant as a JSON line on stderr and exiting non-zero.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use warden::rpc::RpcServer;
use warden::tools::register_tools;
use warden::{GatewayConfig, GatewayContext};

#[derive(Parser, Debug)]
#[command(name = "warden-gateway", version, about = "Governance gateway over stdio")]
struct Args {
    /// Pre-lock the workspace root and run the startup self-audit.
    #[arg(long, env = "WARDEN_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Operator identity to bind when pre-locking.
    #[arg(long, env = "WARDEN_OPERATOR_ID", default_value = "gateway")]
    operator_id: String,

    /// Operator role to bind when pre-locking.
    #[arg(long, env = "WARDEN_OPERATOR_ROLE", default_value = "EXECUTOR")]
    operator_role: String,

    /// Optional TOML configuration file.
    #[arg(long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "warden=debug".
    #[arg(long, env = "WARDEN_LOG", default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log_filter.clone()))
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = GatewayConfig::load(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;
    let ctx = Arc::new(GatewayContext::new(config));

    if let Some(root) = &args.workspace_root {
        let root = root
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("workspace root is not valid UTF-8"))?;
        ctx.begin_session(root, &args.operator_id, &args.operator_role)
            .map_err(|e| anyhow::anyhow!("cannot begin session: {}", e))?;

        if let Err(err) = ctx.startup_self_audit() {
            let detail = serde_json::json!({
                "invariant_id": err.invariant_id().map(|id| id.as_str()),
                "error_code": err.code().as_str(),
                "message": err.message(),
            });
            eprintln!("{}", detail);
            anyhow::bail!("startup self-audit failed; refusing to boot");
        }
    }

    let read_only = ctx.kill_switch_engaged();
    if read_only {
        tracing::warn!("workspace is halted; serving the read-only tool surface");
    }

    let mut server = RpcServer::new("warden-gateway", env!("CARGO_PKG_VERSION"));
    register_tools(&mut server, Arc::clone(&ctx), read_only);
    tracing::info!(tools = server.tool_count(), "gateway serving on stdio");

    server.serve_stdio().await?;
    tracing::info!("stdin closed; shutting down");
    Ok(())
}
