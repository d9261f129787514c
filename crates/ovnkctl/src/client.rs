//! RPC client - unix socket client for ovnkd

use anyhow::{Context, Result};
use ovnk_common::{RpcMethod, RpcRequest, RpcResponse, SOCKET_PATH};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RpcClient {
    /// Socket path: explicit flag, then $OVNKD_SOCKET, then the default
    pub fn discover_socket_path(explicit_path: Option<&str>) -> String {
        if let Some(path) = explicit_path {
            return path.to_string();
        }
        std::env::var("OVNKD_SOCKET").unwrap_or_else(|_| SOCKET_PATH.to_string())
    }

    pub async fn connect(socket_path: Option<&str>) -> Result<Self> {
        let path = Self::discover_socket_path(socket_path);
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Self::socket_error_with_hint(&path, e)),
            Err(_) => anyhow::bail!("Timed out connecting to {}", path),
        };
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    fn socket_error_with_hint(path: &str, error: std::io::Error) -> anyhow::Error {
        use std::io::ErrorKind;

        let hint = match error.kind() {
            ErrorKind::NotFound => format!("Socket not found at {}. Is ovnkd running?", path),
            ErrorKind::PermissionDenied => format!(
                "Permission denied on {}. The socket is restricted to its owner and group.",
                path
            ),
            ErrorKind::ConnectionRefused => {
                format!("ovnkd is not accepting connections on {}", path)
            }
            _ => format!("Failed to connect to ovnkd at {}", path),
        };
        anyhow::Error::new(error).context(hint)
    }

    /// Send one request and wait for its response line
    pub async fn call(
        &mut self,
        method: RpcMethod,
        params: Option<serde_json::Value>,
    ) -> Result<RpcResponse> {
        let request = RpcRequest::new(method, params);
        let request_json = serde_json::to_string(&request)? + "\n";
        self.writer
            .write_all(request_json.as_bytes())
            .await
            .context("Failed to send request")?;

        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read response")?;
        if bytes_read == 0 {
            anyhow::bail!("ovnkd closed the connection without answering");
        }

        let response: RpcResponse =
            serde_json::from_str(&line).context("Invalid response from ovnkd")?;
        if response.id.as_deref() != Some(request.id.as_str()) {
            anyhow::bail!("Response id does not match request {}", request.id);
        }
        Ok(response)
    }
}

/// Whether a socket file exists at all, for friendlier status output
pub fn socket_present(path: &str) -> bool {
    Path::new(path).exists()
}
