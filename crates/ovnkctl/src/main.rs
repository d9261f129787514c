//! ovnkctl - command line client for ovnkd

use anyhow::Result;
use clap::{Parser, Subcommand};
use ovnk_common::{DaemonStatus, RpcMethod, RpcResponse};
use ovnkctl::client::{socket_present, RpcClient};
use ovnkctl::params::{build_params, parse_method};
use owo_colors::OwoColorize;

#[derive(Parser)]
#[command(name = "ovnkctl", version, about = "Query the ovnkd diagnostic daemon")]
struct Cli {
    /// Daemon socket (defaults to $OVNKD_SOCKET, then /run/ovnk/ovnkd.sock)
    #[arg(long, global = true)]
    socket: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon version, mode and uptime
    Status,
    /// Call one method
    Call {
        /// Method name, e.g. ip-route-show
        method: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Set one parameter (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,
    },
}

fn print_error(response: &RpcResponse) -> bool {
    let Some(error) = &response.error else {
        return false;
    };
    let kind = error
        .data
        .as_ref()
        .and_then(|d| d.get("kind"))
        .and_then(|k| k.as_str())
        .unwrap_or("rpc_error");
    eprintln!("{} [{}] {}", "error:".red().bold(), kind, error.message);
    let stderr = error.data.as_ref().and_then(|d| d.get("stderr")).and_then(|s| s.as_str());
    if let Some(stderr) = stderr {
        eprintln!("{}", stderr.dimmed());
    }
    true
}

fn print_result(result: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    if result.get("truncated").and_then(|t| t.as_bool()) == Some(true) {
        eprintln!("{}", "(output truncated)".yellow());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<bool> {
    let path = RpcClient::discover_socket_path(cli.socket.as_deref());

    match cli.command {
        Commands::Status => {
            if !socket_present(&path) {
                println!("{} ovnkd is not running ({} missing)", "●".red(), path);
                return Ok(false);
            }
            let mut client = RpcClient::connect(Some(&path)).await?;
            let response = client.call(RpcMethod::Status, None).await?;
            if print_error(&response) {
                return Ok(false);
            }
            let status: DaemonStatus = serde_json::from_value(response.result.unwrap_or_default())?;
            println!("{} ovnkd v{}", "●".green(), status.version);
            println!("  mode:               {}", status.mode.bold());
            println!("  uptime:             {}s", status.uptime_seconds);
            println!("  pending teardowns:  {}", status.pending_teardowns);
            Ok(true)
        }
        Commands::Call { method, params, sets } => {
            let method = parse_method(&method)?;
            let params = build_params(params.as_deref(), &sets)?;
            let mut client = RpcClient::connect(Some(&path)).await?;
            let response = client.call(method, params).await?;
            if print_error(&response) {
                return Ok(false);
            }
            print_result(&response.result.unwrap_or_default())?;
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
