//! Socket listings: ss and netstat.

use super::{LiveContext, OutputParams};
use ovnk_common::allow_list;
use ovnk_common::validate::{self, AllowList};
use ovnk_common::{CommandSpec, DiagResult, TargetParams, ToolOutput};
use serde::{Deserialize, Serialize};

allow_list! {
    pub enum SocketProtocol {
        Tcp => "tcp",
        Udp => "udp",
        All => "all",
    }
}

allow_list! {
    pub enum SocketState {
        Listening => "listening",
        Established => "established",
        All => "all",
    }
}

fn protocol_flag(protocol: SocketProtocol) -> &'static str {
    match protocol {
        SocketProtocol::Tcp => "-t",
        SocketProtocol::Udp => "-u",
        SocketProtocol::All => "-a",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SsParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub process: bool,
    #[serde(default)]
    pub numeric: bool,
    /// ss filter expression, e.g. `sport = :8080`
    #[serde(default)]
    pub port_filter: Option<String>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_ss(params: &SsParams) -> DiagResult<CommandSpec> {
    let protocol =
        SocketProtocol::parse_or("protocol", params.protocol.as_deref(), SocketProtocol::All)?;
    let state = SocketState::parse_or("state", params.state.as_deref(), SocketState::All)?;
    let filter = validate::non_blank(params.port_filter.as_deref()).unwrap_or_default();
    if !filter.is_empty() {
        validate::expression("port_filter", filter)?;
    }

    let command = CommandSpec::new("ss").arg(protocol_flag(protocol));
    let command = match state {
        SocketState::Listening => command.arg("-l"),
        SocketState::Established => command.add(["state", "established"]),
        SocketState::All => command,
    };
    Ok(command
        .add_if(params.process, ["-p"])
        .add_if(params.numeric, ["-n"])
        .add_if_not_empty(filter, [filter]))
}

pub async fn ss(ctx: &LiveContext, params: SsParams) -> DiagResult<ToolOutput> {
    let command = build_ss(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetstatParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub listening: bool,
    #[serde(default)]
    pub numeric: bool,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_netstat(params: &NetstatParams) -> DiagResult<CommandSpec> {
    let protocol =
        SocketProtocol::parse_or("protocol", params.protocol.as_deref(), SocketProtocol::All)?;
    Ok(CommandSpec::new("netstat")
        .arg(protocol_flag(protocol))
        .add_if(params.listening, ["-l"])
        .add_if(params.numeric, ["-n"])
        .arg("-p"))
}

pub async fn netstat(ctx: &LiveContext, params: NetstatParams) -> DiagResult<ToolOutput> {
    let command = build_netstat(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}
