//! Kernel networking state read straight off a node's host root.
//!
//! Every tool here runs through a node debug pod, chrooted into the host,
//! and treats any stderr left after noise filtering as a failure.

use super::LiveContext;
use crate::runner::{finish, is_missing_tool, RunOptions};
use ovnk_common::allow_list;
use ovnk_common::validate::{self, AllowList, FirewallTable};
use ovnk_common::{CommandSpec, DiagError, DiagResult, ExecutionTarget, TargetParams, ToolOutput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::info;

/// Read when the conntrack binary is missing from the host
pub const CONNTRACK_PROC_FILE: &str = "/proc/net/nf_conntrack";

/// Node, debug image and line budget shared by the kernel tools
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeParams {
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub max_lines: Option<i64>,
}

impl NodeParams {
    fn target(&self) -> DiagResult<ExecutionTarget> {
        TargetParams::node(self.node.trim(), self.image.trim()).resolve(None)
    }
}

/// Free-text parameters split into argv tokens
fn split_tokens(field: &str, raw: Option<&str>) -> DiagResult<Vec<String>> {
    match validate::non_blank(raw) {
        Some(raw) => {
            validate::free_text(field, raw)?;
            Ok(raw.split_whitespace().map(str::to_string).collect())
        }
        None => Ok(Vec::new()),
    }
}

async fn run_strict(
    ctx: &LiveContext,
    command: CommandSpec,
    node: &NodeParams,
) -> DiagResult<ToolOutput> {
    let target = node.target()?;
    ctx.run_text(&command, &target, RunOptions::strict(), node.max_lines).await
}

allow_list! {
    pub enum IptablesCommand {
        List => "-L",
        ListRules => "-S",
        ListLong => "--list",
        ListRulesLong => "--list-rules",
    }
}

impl IptablesCommand {
    /// Rule dumps take no filter arguments
    pub fn accepts_filters(&self) -> bool {
        matches!(self, IptablesCommand::List | IptablesCommand::ListLong)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetIptablesParams {
    #[serde(flatten)]
    pub node: NodeParams,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub filter_parameters: Option<String>,
}

/// Listing modifiers iptables accepts without touching any state
const IPTABLES_FLAGS: &[&str] = &[
    "-n",
    "--numeric",
    "-v",
    "--verbose",
    "-x",
    "--exact",
    "--line-numbers",
    "-4",
    "--ipv4",
    "-6",
    "--ipv6",
];

/// Filters are listing flags or a chain name, nothing else
fn check_iptables_filters(tokens: &[String]) -> DiagResult<()> {
    for token in tokens {
        if IPTABLES_FLAGS.contains(&token.as_str()) {
            continue;
        }
        if token.starts_with('-') {
            return Err(DiagError::invalid_input(
                "filter_parameters",
                format!("option not allowed: {}", token),
            ));
        }
        validate::object_name("filter_parameters", token)?;
    }
    Ok(())
}

fn wants_ipv6(tokens: &[String]) -> bool {
    tokens.iter().any(|t| t == "-6" || t == "--ipv6")
}

pub fn build_get_iptables(params: &GetIptablesParams) -> DiagResult<CommandSpec> {
    let table = FirewallTable::parse_or("table", params.table.as_deref(), FirewallTable::Filter)?;
    let command =
        IptablesCommand::parse_or("command", params.command.as_deref(), IptablesCommand::List)?;
    let filters = split_tokens("filter_parameters", params.filter_parameters.as_deref())?;
    check_iptables_filters(&filters)?;

    let program = if wants_ipv6(&filters) { "ip6tables" } else { "iptables" };
    Ok(CommandSpec::new(program)
        .add(["-t", table.as_str(), command.as_str()])
        .add_if(command.accepts_filters(), filters))
}

pub async fn get_iptables(ctx: &LiveContext, params: GetIptablesParams) -> DiagResult<ToolOutput> {
    let command = build_get_iptables(&params)?;
    run_strict(ctx, command, &params.node).await
}

allow_list! {
    pub enum NftCommand {
        Ruleset => "list ruleset",
        Tables => "list tables",
        Chains => "list chains",
        Sets => "list sets",
        Maps => "list maps",
        Flowtables => "list flowtables",
    }
}

allow_list! {
    pub enum AddressFamily {
        Ip => "ip",
        Ip6 => "ip6",
        Inet => "inet",
        Arp => "arp",
        Bridge => "bridge",
        Netdev => "netdev",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetNftParams {
    #[serde(flatten)]
    pub node: NodeParams,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub address_families: Option<String>,
}

pub fn build_get_nft(params: &GetNftParams) -> DiagResult<CommandSpec> {
    let normalized = params.command.split_whitespace().collect::<Vec<_>>().join(" ");
    let command = NftCommand::parse_field("command", &normalized)?;
    let family = validate::non_blank(params.address_families.as_deref())
        .map(|f| AddressFamily::parse_field("address_families", f))
        .transpose()?;

    Ok(CommandSpec::new("nft")
        .add(command.as_str().split(' '))
        .add(family.map(|f| f.as_str())))
}

pub async fn get_nft(ctx: &LiveContext, params: GetNftParams) -> DiagResult<ToolOutput> {
    let command = build_get_nft(&params)?;
    run_strict(ctx, command, &params.node).await
}

const IP_OBJECTS: &[&str] = &["address", "link", "neighbour", "netns", "route", "rule", "vrf"];
const XFRM_OBJECTS: &[&str] = &["state", "policy"];

/// Expand an abbreviated token against `candidates`; it must match exactly one
fn expand<'a>(token: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let mut matches = candidates.iter().filter(|c| c.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(*only),
        _ => None,
    }
}

/// Parse an `ip` read command into its full-length tokens.
///
/// Accepts `OBJECT show` and `xfrm state|policy list`, with every token
/// abbreviable to a unique prefix. `l s` is refused since ip resolves it to
/// `link set`.
pub fn parse_ip_command(raw: &str) -> DiagResult<Vec<&'static str>> {
    let invalid =
        || DiagError::invalid_input("command", format!("invalid ip command: {}", raw.trim()));
    let tokens: Vec<&str> = raw.split_whitespace().collect();

    match tokens.as_slice() {
        [object, verb] => {
            if object.starts_with('l') && *verb == "s" {
                return Err(invalid());
            }
            let object = expand(object, IP_OBJECTS).ok_or_else(invalid)?;
            if !"show".starts_with(verb) {
                return Err(invalid());
            }
            Ok(vec![object, "show"])
        }
        [xfrm, object, verb] => {
            if !"xfrm".starts_with(xfrm) {
                return Err(invalid());
            }
            let object = expand(object, XFRM_OBJECTS).ok_or_else(invalid)?;
            if !"list".starts_with(verb) {
                return Err(invalid());
            }
            Ok(vec!["xfrm", object, "list"])
        }
        _ => Err(invalid()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetIpParams {
    #[serde(flatten)]
    pub node: NodeParams,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub filter_parameters: Option<String>,
}

pub fn build_get_ip(params: &GetIpParams) -> DiagResult<CommandSpec> {
    let command = parse_ip_command(&params.command)?;
    let options = split_tokens("options", params.options.as_deref())?;
    if let Some(option) = options.iter().find(|o| !o.starts_with('-')) {
        return Err(DiagError::invalid_input("options", format!("not an option: {}", option)));
    }
    let filters = split_tokens("filter_parameters", params.filter_parameters.as_deref())?;

    Ok(CommandSpec::new("ip").add(options).add(command).add(filters))
}

pub async fn get_ip(ctx: &LiveContext, params: GetIpParams) -> DiagResult<ToolOutput> {
    let command = build_get_ip(&params)?;
    run_strict(ctx, command, &params.node).await
}

allow_list! {
    pub enum ConntrackCommand {
        List => "-L",
        Stats => "-S",
        Count => "-C",
        Dump => "--dump",
        StatsLong => "--stats",
        CountLong => "--count",
    }
}

impl ConntrackCommand {
    pub fn is_listing(&self) -> bool {
        matches!(self, ConntrackCommand::List | ConntrackCommand::Dump)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetConntrackParams {
    #[serde(flatten)]
    pub node: NodeParams,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub filter_parameters: Option<String>,
}

/// Conntrack selectors that take a value
const CONNTRACK_SELECTORS: &[&str] = &[
    "-p",
    "--proto",
    "-s",
    "--src",
    "--orig-src",
    "-d",
    "--dst",
    "--orig-dst",
    "-r",
    "--reply-src",
    "-q",
    "--reply-dst",
    "--sport",
    "--orig-port-src",
    "--dport",
    "--orig-port-dst",
    "--reply-port-src",
    "--reply-port-dst",
    "-m",
    "--mark",
    "-f",
    "--family",
    "-w",
    "--zone",
    "--orig-zone",
    "--reply-zone",
    "-u",
    "--status",
    "-o",
    "--output",
];

/// Conntrack selectors that stand alone
const CONNTRACK_FLAGS: &[&str] = &["-n", "--src-nat", "-g", "--dst-nat", "-j", "--any-nat"];

static CONNTRACK_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.:/_,]*$").unwrap());

/// Filters are selector/value pairs; table operations such as `-D` or `-F` never pass
fn check_conntrack_filters(tokens: &[String]) -> DiagResult<()> {
    let invalid = |reason: String| DiagError::invalid_input("filter_parameters", reason);
    let mut tokens = tokens.iter();
    while let Some(token) = tokens.next() {
        if CONNTRACK_FLAGS.contains(&token.as_str()) {
            continue;
        }
        if !CONNTRACK_SELECTORS.contains(&token.as_str()) {
            return Err(invalid(format!("option not allowed: {}", token)));
        }
        match tokens.next() {
            Some(value) if CONNTRACK_VALUE.is_match(value) => {}
            Some(value) => return Err(invalid(format!("invalid value for {}: {}", token, value))),
            None => return Err(invalid(format!("missing value for {}", token))),
        }
    }
    Ok(())
}

pub fn build_get_conntrack(
    params: &GetConntrackParams,
) -> DiagResult<(ConntrackCommand, CommandSpec)> {
    let command =
        ConntrackCommand::parse_or("command", params.command.as_deref(), ConntrackCommand::List)?;
    let filters = split_tokens("filter_parameters", params.filter_parameters.as_deref())?;
    check_conntrack_filters(&filters)?;

    let spec = CommandSpec::new("conntrack")
        .arg(command.as_str())
        .add_if(command.is_listing(), filters);
    Ok((command, spec))
}

pub async fn get_conntrack(
    ctx: &LiveContext,
    params: GetConntrackParams,
) -> DiagResult<ToolOutput> {
    let (command, spec) = build_get_conntrack(&params)?;
    let target = params.node.target()?;

    let out = ctx.runner.execute(&spec, &target, RunOptions::strict()).await?;
    if !is_missing_tool(&out) {
        let stdout = finish(spec.program(), out, true)?;
        let processed = ctx.policy(params.node.max_lines).apply(&stdout);
        return Ok(ToolOutput::output(processed.text, processed.truncated));
    }

    if !command.is_listing() {
        return Err(DiagError::UnavailableTool(format!(
            "conntrack is not available on node {}; only -L is supported without it",
            params.node.node.trim()
        )));
    }

    info!(node = %params.node.node.trim(), "conntrack missing, reading {}", CONNTRACK_PROC_FILE);
    let fallback = CommandSpec::new("cat").arg(CONNTRACK_PROC_FILE);
    ctx.run_text(&fallback, &target, RunOptions::strict(), params.node.max_lines)
        .await
}
