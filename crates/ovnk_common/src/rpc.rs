//! JSON-RPC 2.0 types for ovnkd communication.

use crate::error::{DiagError, ToolError};
use serde::{Deserialize, Serialize};

/// Operations served by ovnkd
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RpcMethod {
    Status,

    // Packet capture and tracing
    Tcpdump,
    Pwru,

    // Connectivity
    Ping,
    Traceroute,
    Dig,
    Curl,
    Netcat,

    // Interfaces, routes, sockets, statistics
    IpAddrShow,
    IpRouteShow,
    IpLinkShow,
    IpNeighShow,
    IpRuleShow,
    Ss,
    Netstat,
    Ethtool,
    ConntrackList,
    ConntrackStats,
    SysctlNet,

    // Firewall
    IptablesList,
    NftList,

    // Kernel inspection on nodes
    GetIptables,
    GetNft,
    GetIp,
    GetConntrack,

    // Open vSwitch
    OvsShow,
    OvsListBr,
    OvsDumpFlows,
    OvsDumpConntrack,

    // sosreport archives
    SosreportListPlugins,
    SosreportListCommands,
    SosreportSearchCommands,
    SosreportGetCommand,
    SosreportSearchPodLogs,

    // must-gather archives
    MustGatherGetResource,
    MustGatherListResources,
    MustGatherPodLogs,
    MustGatherOvnkInfo,
    MustGatherListNorthboundDatabases,
    MustGatherListSouthboundDatabases,
    MustGatherQueryDatabase,
}

/// Which daemon mode an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodScope {
    Always,
    LiveCluster,
    Offline,
}

impl RpcMethod {
    pub fn scope(&self) -> MethodScope {
        use RpcMethod::*;
        match self {
            Status => MethodScope::Always,
            SosreportListPlugins
            | SosreportListCommands
            | SosreportSearchCommands
            | SosreportGetCommand
            | SosreportSearchPodLogs
            | MustGatherGetResource
            | MustGatherListResources
            | MustGatherPodLogs
            | MustGatherOvnkInfo
            | MustGatherListNorthboundDatabases
            | MustGatherListSouthboundDatabases
            | MustGatherQueryDatabase => MethodScope::Offline,
            _ => MethodScope::LiveCluster,
        }
    }

    /// Wire name of the method
    pub fn name(&self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: RpcMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: String,
}

impl RpcRequest {
    pub fn new(method: RpcMethod, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method,
            params,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<String>,
}

impl RpcResponse {
    pub fn success(id: String, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    pub fn error(id: Option<String>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Error response for a failed tool call, with the structured failure as data
    pub fn tool_error(id: String, err: &DiagError) -> Self {
        let data = serde_json::to_value(ToolError::from(err)).ok();
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code: err.code(),
                message: err.to_string(),
                data,
            }),
            id: Some(id),
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

/// Result of a tool call: one of data/logs/output, plus truncation and error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolOutput {
    pub fn output(text: String, truncated: bool) -> Self {
        Self {
            output: Some(text),
            truncated,
            ..Self::default()
        }
    }

    pub fn data(value: serde_json::Value, truncated: bool) -> Self {
        Self {
            data: Some(value),
            truncated,
            ..Self::default()
        }
    }

    pub fn logs(lines: Vec<String>, truncated: bool) -> Self {
        Self {
            logs: Some(lines),
            truncated,
            ..Self::default()
        }
    }

    /// Attach a failure to an otherwise usable result
    pub fn with_error(mut self, err: &DiagError) -> Self {
        self.error = Some(ToolError::from(err));
        self
    }
}

/// Result of the status method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub mode: String,
    pub uptime_seconds: u64,
    pub pending_teardowns: usize,
}
