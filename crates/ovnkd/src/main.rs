//! ovnkd - secure diagnostic executor for OVN-Kubernetes clusters
//!
//! Serves validated networking diagnostics against live nodes and pods, and
//! read-only queries against offline sosreport and must-gather archives.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ovnkd::config::{Config, Mode};
use ovnkd::executor::kubectl::KubectlExecutor;
use ovnkd::executor::process::LocalProcessRunner;
use ovnkd::rpc_handler::AppState;
use ovnkd::rpc_server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Socket,
}

#[derive(Parser, Debug)]
#[command(name = "ovnkd", version, about = "OVN-Kubernetes diagnostic executor")]
struct Cli {
    /// Config file (defaults to /etc/ovnk/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Operation families to serve: live-cluster, offline or both
    #[arg(long)]
    mode: Option<Mode>,

    #[arg(long, value_enum, default_value = "socket")]
    transport: Transport,

    /// Socket path override
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Kubeconfig handed to kubectl
    #[arg(long)]
    kubeconfig: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    if let Some(mode) = cli.mode {
        config.daemon.mode = mode;
    }
    if let Some(socket) = &cli.socket {
        config.daemon.socket_path = socket.display().to_string();
    }
    if cli.kubeconfig.is_some() {
        config.cluster.kubeconfig = cli.kubeconfig.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("Failed to load configuration")?;

    // stdout carries responses on the stdio transport
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.daemon.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(
        "ovnkd v{} starting in {} mode",
        env!("CARGO_PKG_VERSION"),
        config.daemon.mode
    );

    let state = Arc::new(AppState::new(
        &config,
        Arc::new(KubectlExecutor::new(&config.cluster)),
        Arc::new(LocalProcessRunner),
    ));
    let socket_path = PathBuf::from(&config.daemon.socket_path);

    let served = tokio::select! {
        result = async {
            match cli.transport {
                Transport::Socket => {
                    rpc_server::serve_socket(Arc::clone(&state), &socket_path).await
                }
                Transport::Stdio => rpc_server::serve_stdio(Arc::clone(&state)).await,
            }
        } => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down gracefully");
            Ok(())
        }
    };

    let pending = state.pending_teardowns();
    if pending > 0 {
        info!("Waiting for {} debug pod teardown(s)", pending);
    }
    state.drain_teardowns().await;

    if cli.transport == Transport::Socket {
        if let Err(e) = tokio::fs::remove_file(&socket_path).await {
            warn!("Failed to remove {}: {}", socket_path.display(), e);
        }
    }

    served
}
