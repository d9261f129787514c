//! RPC transports: a unix socket for the host, stdio for a parent process.

use crate::rpc_handler::{handle_line, AppState};
use anyhow::{Context, Result};
use ovnk_common::RpcResponse;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Socket access for owner and group only
pub const SOCKET_MODE: u32 = 0o660;

/// Answer newline-delimited requests until the reader is exhausted.
///
/// Every request runs as its own task, so a long capture does not hold up a
/// `status` sent after it. Responses are written in completion order and
/// carry the request id. Dropping this future aborts requests in flight.
pub async fn serve_lines<R, W>(state: Arc<AppState>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut responses) = mpsc::unbounded_channel::<RpcResponse>();
    let mut tx = Some(tx);
    let mut requests = JoinSet::new();
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            line = lines.next_line(), if tx.is_some() => {
                match line.context("Failed to read request")? {
                    Some(line) => {
                        let state = Arc::clone(&state);
                        let tx = tx.clone();
                        requests.spawn(async move {
                            let response = handle_line(&state, &line).await;
                            if let (Some(response), Some(tx)) = (response, tx) {
                                let _ = tx.send(response);
                            }
                        });
                    }
                    // the channel closes once the last request has answered
                    None => tx = None,
                }
            }
            Some(response) = responses.recv() => write_response(&mut writer, &response).await?,
            Some(finished) = requests.join_next(), if !requests.is_empty() => {
                if let Err(e) = finished {
                    error!("Request task ended abnormally: {}", e);
                }
            }
            else => break,
        }
    }

    Ok(())
}

async fn write_response<W>(writer: &mut W, response: &RpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response_json = serde_json::to_string(response)? + "\n";
    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    writer.flush().await.context("Failed to flush response")
}

/// Serve requests on stdin, answers on stdout
pub async fn serve_stdio(state: Arc<AppState>) -> Result<()> {
    info!("Serving RPC on stdio");
    serve_lines(state, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve requests on a unix socket until the future is dropped.
///
/// Connection tasks live in a `JoinSet`, so dropping this future aborts them.
pub async fn serve_socket(state: Arc<AppState>, socket_path: &Path) -> Result<()> {
    if let Some(socket_dir) = socket_path.parent() {
        tokio::fs::create_dir_all(socket_dir).await.with_context(|| {
            format!("Failed to create socket directory {}", socket_dir.display())
        })?;
    }

    // Stale socket from a previous run
    let _ = tokio::fs::remove_file(socket_path).await;

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .context("Failed to set socket permissions")?;
    }

    info!("RPC server listening on {}", socket_path.display());

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let state = Arc::clone(&state);
                    connections.spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) = serve_lines(state, BufReader::new(reader), writer).await {
                            error!("Connection handler error: {:#}", e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    debug!("Connection task ended abnormally: {}", e);
                }
            }
        }
    }
}
