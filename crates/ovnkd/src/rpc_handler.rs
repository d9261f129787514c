//! RPC request handler: mode gating, parameter decoding, dispatch.

use crate::config::{Config, Mode};
use crate::debug_pod::LifecycleSettings;
use crate::executor::{ClusterExecutor, ProcessRunner};
use crate::offline::{self, blocking, must_gather, ovsdb, sosreport, OfflineContext};
use crate::runner::CommandRunner;
use crate::tools::{capture, connectivity, firewall, ip, kernel, ovs, sockets, stats, LiveContext};
use ovnk_common::rpc::{MethodScope, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR};
use ovnk_common::{DaemonStatus, DiagError, DiagResult, RpcMethod, RpcRequest, RpcResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// State shared by every connection
pub struct AppState {
    pub version: String,
    pub mode: Mode,
    pub start_time: Instant,
    pub live: Option<LiveContext>,
    pub offline: Option<OfflineContext>,
}

impl AppState {
    pub fn new(
        config: &Config,
        executor: Arc<dyn ClusterExecutor>,
        local: Arc<dyn ProcessRunner>,
    ) -> Self {
        let mode = config.daemon.mode;
        let live = mode.serves_live().then(|| {
            let runner = CommandRunner::new(
                executor,
                Arc::clone(&local),
                LifecycleSettings::from(&config.cluster),
                &config.cluster.debug_namespace,
            );
            LiveContext::new(runner, config)
        });
        let offline = mode
            .serves_offline()
            .then(|| OfflineContext::new(local, config));

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode,
            start_time: Instant::now(),
            live,
            offline,
        }
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: self.version.clone(),
            mode: self.mode.to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            pending_teardowns: self.pending_teardowns(),
        }
    }

    pub fn pending_teardowns(&self) -> usize {
        self.live
            .as_ref()
            .map(|live| live.runner.pods().pending_teardowns())
            .unwrap_or(0)
    }

    /// Wait for debug pods still being deleted
    pub async fn drain_teardowns(&self) {
        if let Some(live) = &self.live {
            live.runner.pods().drain_teardowns().await;
        }
    }

    fn live(&self, method: RpcMethod) -> DiagResult<&LiveContext> {
        self.live.as_ref().ok_or_else(|| refused(method, self.mode))
    }

    fn offline(&self, method: RpcMethod) -> DiagResult<&OfflineContext> {
        self.offline.as_ref().ok_or_else(|| refused(method, self.mode))
    }
}

fn refused(method: RpcMethod, mode: Mode) -> DiagError {
    DiagError::UnavailableTool(format!("{} is not served in {} mode", method.name(), mode))
}

enum Failure {
    Params(serde_json::Error),
    Tool(DiagError),
}

impl From<DiagError> for Failure {
    fn from(err: DiagError) -> Self {
        Failure::Tool(err)
    }
}

fn parse<T: DeserializeOwned>(params: Option<Value>) -> Result<T, Failure> {
    let params = match params {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(value) => value,
    };
    serde_json::from_value(params).map_err(Failure::Params)
}

fn encode<T: Serialize>(value: T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|e| {
        Failure::Tool(DiagError::execution(format!("failed to encode result: {}", e), "", None))
    })
}

/// Handle one decoded request
pub async fn handle_request(state: &AppState, request: RpcRequest) -> RpcResponse {
    let RpcRequest { method, params, id, .. } = request;
    debug!(method = %method.name(), id = %id, "Handling request");

    match dispatch(state, method, params).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(Failure::Params(e)) => {
            RpcResponse::error(Some(id), INVALID_PARAMS, format!("Invalid params: {}", e))
        }
        Err(Failure::Tool(err)) => {
            warn!(method = %method.name(), kind = err.kind(), "Request failed: {}", err);
            RpcResponse::tool_error(id, &err)
        }
    }
}

/// Handle one raw request line. Blank lines get no answer.
pub async fn handle_line(state: &AppState, line: &str) -> Option<RpcResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid request JSON: {}", e);
            return Some(RpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e)));
        }
    };

    let id = match value.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let method_name = value.get("method").and_then(Value::as_str).unwrap_or_default();
    let method: RpcMethod = match serde_json::from_value(Value::String(method_name.to_string())) {
        Ok(method) => method,
        Err(_) => {
            return Some(RpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method_name),
            ))
        }
    };

    let request = RpcRequest {
        jsonrpc: "2.0".to_string(),
        method,
        params: value.get("params").cloned(),
        id: id.unwrap_or_default(),
    };
    Some(handle_request(state, request).await)
}

async fn dispatch(
    state: &AppState,
    method: RpcMethod,
    params: Option<Value>,
) -> Result<Value, Failure> {
    let served = match method.scope() {
        MethodScope::Always => true,
        MethodScope::LiveCluster => state.mode.serves_live(),
        MethodScope::Offline => state.mode.serves_offline(),
    };
    if !served {
        return Err(refused(method, state.mode).into());
    }

    use RpcMethod::*;
    let output = match method {
        Status => return encode(state.status()),

        Tcpdump => capture::tcpdump(state.live(method)?, parse(params)?).await?,
        Pwru => capture::pwru(state.live(method)?, parse(params)?).await?,

        Ping => connectivity::ping(state.live(method)?, parse(params)?).await?,
        Traceroute => connectivity::traceroute(state.live(method)?, parse(params)?).await?,
        Dig => connectivity::dig(state.live(method)?, parse(params)?).await?,
        Curl => connectivity::curl(state.live(method)?, parse(params)?).await?,
        Netcat => connectivity::netcat(state.live(method)?, parse(params)?).await?,

        IpAddrShow => ip::addr_show(state.live(method)?, parse(params)?).await?,
        IpRouteShow => ip::route_show(state.live(method)?, parse(params)?).await?,
        IpLinkShow => ip::link_show(state.live(method)?, parse(params)?).await?,
        IpNeighShow => ip::neigh_show(state.live(method)?, parse(params)?).await?,
        IpRuleShow => ip::rule_show(state.live(method)?, parse(params)?).await?,
        Ss => sockets::ss(state.live(method)?, parse(params)?).await?,
        Netstat => sockets::netstat(state.live(method)?, parse(params)?).await?,
        Ethtool => stats::ethtool(state.live(method)?, parse(params)?).await?,
        ConntrackList => stats::conntrack_list(state.live(method)?, parse(params)?).await?,
        ConntrackStats => stats::conntrack_stats(state.live(method)?, parse(params)?).await?,
        SysctlNet => stats::sysctl_net(state.live(method)?, parse(params)?).await?,

        IptablesList => firewall::iptables_list(state.live(method)?, parse(params)?).await?,
        NftList => firewall::nft_list(state.live(method)?, parse(params)?).await?,

        GetIptables => kernel::get_iptables(state.live(method)?, parse(params)?).await?,
        GetNft => kernel::get_nft(state.live(method)?, parse(params)?).await?,
        GetIp => kernel::get_ip(state.live(method)?, parse(params)?).await?,
        GetConntrack => kernel::get_conntrack(state.live(method)?, parse(params)?).await?,

        OvsShow => ovs::ovs_show(state.live(method)?, parse(params)?).await?,
        OvsListBr => ovs::ovs_list_br(state.live(method)?, parse(params)?).await?,
        OvsDumpFlows => ovs::ovs_dump_flows(state.live(method)?, parse(params)?).await?,
        OvsDumpConntrack => ovs::ovs_dump_conntrack(state.live(method)?, parse(params)?).await?,

        SosreportListPlugins => {
            state.offline(method)?;
            let params: sosreport::SosreportParams = parse(params)?;
            return encode(blocking(move || sosreport::list_plugins(&params)).await?);
        }
        SosreportListCommands => {
            state.offline(method)?;
            let params: sosreport::ListCommandsParams = parse(params)?;
            return encode(blocking(move || sosreport::list_commands(&params)).await?);
        }
        SosreportSearchCommands => {
            state.offline(method)?;
            let params: sosreport::SearchCommandsParams = parse(params)?;
            return encode(blocking(move || sosreport::search_commands(&params)).await?);
        }
        SosreportGetCommand => {
            let default_max_lines = state.offline(method)?.default_max_lines;
            let params: sosreport::GetCommandParams = parse(params)?;
            blocking(move || sosreport::get_command(&params, default_max_lines)).await?
        }
        SosreportSearchPodLogs => {
            state.offline(method)?;
            let params: sosreport::SearchPodLogsParams = parse(params)?;
            blocking(move || sosreport::search_pod_logs(&params)).await?
        }

        MustGatherGetResource => {
            must_gather::get_resource(state.offline(method)?, parse(params)?).await?
        }
        MustGatherListResources => {
            must_gather::list_resources(state.offline(method)?, parse(params)?).await?
        }
        MustGatherPodLogs => must_gather::pod_logs(state.offline(method)?, parse(params)?).await?,
        MustGatherOvnkInfo => must_gather::ovnk_info(state.offline(method)?, parse(params)?).await?,
        MustGatherListNorthboundDatabases => {
            let ctx = state.offline(method)?;
            ovsdb::list_databases(ctx, parse(params)?, ovsdb::Schema::Northbound).await?
        }
        MustGatherListSouthboundDatabases => {
            let ctx = state.offline(method)?;
            ovsdb::list_databases(ctx, parse(params)?, ovsdb::Schema::Southbound).await?
        }
        MustGatherQueryDatabase => {
            ovsdb::query_database(state.offline(method)?, parse(params)?).await?
        }
    };
    encode(output)
}

/// Session steps recorded so far, for status tooling and tests
pub async fn session_history(state: &AppState) -> Vec<offline::SessionEvent> {
    match &state.offline {
        Some(ctx) => ctx.session.history().await,
        None => Vec::new(),
    }
}
