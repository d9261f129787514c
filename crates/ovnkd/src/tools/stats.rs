//! Interface and connection-tracking statistics, network sysctls.

use super::{int, LiveContext, OutputParams};
use ovnk_common::allow_list;
use ovnk_common::validate::{self, AllowList};
use ovnk_common::{CommandSpec, DiagError, DiagResult, TargetParams, ToolOutput};
use serde::{Deserialize, Serialize};

allow_list! {
    pub enum EthtoolOperation {
        Info => "info",
        Stats => "stats",
        Features => "features",
    }
}

allow_list! {
    pub enum ConntrackProtocol {
        Tcp => "tcp",
        Udp => "udp",
        Icmp => "icmp",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EthtoolParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_ethtool(params: &EthtoolParams) -> DiagResult<CommandSpec> {
    let interface = params.interface.trim();
    if interface.is_empty() || interface == validate::ANY_INTERFACE {
        return Err(DiagError::invalid_input("interface", "a specific interface name is required"));
    }
    validate::interface_name("interface", interface)?;
    let operation = EthtoolOperation::parse_or(
        "operation",
        params.operation.as_deref(),
        EthtoolOperation::Info,
    )?;

    let command = CommandSpec::new("ethtool");
    let command = match operation {
        EthtoolOperation::Info => command,
        EthtoolOperation::Stats => command.arg("-S"),
        EthtoolOperation::Features => command.arg("-k"),
    };
    Ok(command.arg(interface))
}

pub async fn ethtool(ctx: &LiveContext, params: EthtoolParams) -> DiagResult<ToolOutput> {
    let command = build_ethtool(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConntrackListParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub dest_ip: Option<String>,
    #[serde(default)]
    pub source_port: Option<i64>,
    #[serde(default)]
    pub dest_port: Option<i64>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_conntrack_list(params: &ConntrackListParams) -> DiagResult<CommandSpec> {
    let protocol = validate::non_blank(params.protocol.as_deref())
        .map(|p| ConntrackProtocol::parse_field("protocol", p))
        .transpose()?;

    let source_ip = validate::non_blank(params.source_ip.as_deref());
    if let Some(ip) = source_ip {
        validate::ip_addr("source_ip", ip)?;
    }
    let dest_ip = validate::non_blank(params.dest_ip.as_deref());
    if let Some(ip) = dest_ip {
        validate::ip_addr("dest_ip", ip)?;
    }

    let source_port = match int(params.source_port) {
        0 => None,
        port => Some(validate::port("source_port", port)?),
    };
    let dest_port = match int(params.dest_port) {
        0 => None,
        port => Some(validate::port("dest_port", port)?),
    };

    let mut command = CommandSpec::new("conntrack").arg("-L");
    if let Some(protocol) = protocol {
        command = command.add(["-p", protocol.as_str()]);
    }
    if let Some(ip) = source_ip {
        command = command.add(["--orig-src", ip]);
    }
    if let Some(ip) = dest_ip {
        command = command.add(["--orig-dst", ip]);
    }
    if let Some(port) = source_port {
        command = command.add(["--orig-port-src".to_string(), port.to_string()]);
    }
    if let Some(port) = dest_port {
        command = command.add(["--orig-port-dst".to_string(), port.to_string()]);
    }
    Ok(command)
}

pub async fn conntrack_list(
    ctx: &LiveContext,
    params: ConntrackListParams,
) -> DiagResult<ToolOutput> {
    let command = build_conntrack_list(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConntrackStatsParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub async fn conntrack_stats(
    ctx: &LiveContext,
    params: ConntrackStatsParams,
) -> DiagResult<ToolOutput> {
    let command = CommandSpec::new("conntrack").arg("-S");
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysctlNetParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_sysctl_net(params: &SysctlNetParams) -> DiagResult<CommandSpec> {
    let pattern = validate::non_blank(params.pattern.as_deref()).unwrap_or("net");
    if pattern != "net" && !pattern.starts_with("net.") {
        return Err(DiagError::invalid_input(
            "pattern",
            "sysctl pattern must be 'net' or start with 'net.'",
        ));
    }
    validate::free_text("pattern", pattern)?;
    if pattern.contains(char::is_whitespace) {
        return Err(DiagError::invalid_input("pattern", "sysctl pattern cannot contain whitespace"));
    }
    Ok(CommandSpec::new("sysctl").add(["-a", pattern]))
}

pub async fn sysctl_net(ctx: &LiveContext, params: SysctlNetParams) -> DiagResult<ToolOutput> {
    let command = build_sysctl_net(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}
