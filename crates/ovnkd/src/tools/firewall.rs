//! Firewall listings: iptables and nftables.

use super::{LiveContext, OutputParams};
use ovnk_common::validate::{self, AllowList, FirewallTable};
use ovnk_common::{CommandSpec, DiagError, DiagResult, TargetParams, ToolOutput};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IptablesListParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub line_numbers: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub ipv6: bool,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_iptables_list(params: &IptablesListParams) -> DiagResult<CommandSpec> {
    let table = FirewallTable::parse_or("table", params.table.as_deref(), FirewallTable::Filter)?;
    let chain = validate::non_blank(params.chain.as_deref()).unwrap_or_default();
    if !chain.is_empty() {
        validate::object_name("chain", chain)?;
    }

    let program = if params.ipv6 { "ip6tables" } else { "iptables" };
    Ok(CommandSpec::new(program)
        .arg("-L")
        .add_if_not_empty(chain, [chain])
        .add(["-t", table.as_str()])
        .add_if(params.line_numbers, ["--line-numbers"])
        .add_if(params.verbose, ["-v"])
        .arg("-n"))
}

pub async fn iptables_list(
    ctx: &LiveContext,
    params: IptablesListParams,
) -> DiagResult<ToolOutput> {
    let command = build_iptables_list(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NftListParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_nft_list(params: &NftListParams) -> DiagResult<CommandSpec> {
    let table = validate::non_blank(params.table.as_deref());
    let chain = validate::non_blank(params.chain.as_deref());
    if let Some(table) = table {
        validate::object_name("table", table)?;
    }
    if let Some(chain) = chain {
        validate::object_name("chain", chain)?;
    }

    let command = CommandSpec::new("nft").arg("list");
    match (table, chain) {
        (Some(table), Some(chain)) => Ok(command.add(["chain", table, chain])),
        (Some(table), None) => Ok(command.add(["table", table])),
        (None, None) => Ok(command.arg("ruleset")),
        (None, Some(_)) => Err(DiagError::invalid_input(
            "chain",
            "a chain can only be listed together with its table",
        )),
    }
}

pub async fn nft_list(ctx: &LiveContext, params: NftListParams) -> DiagResult<ToolOutput> {
    let command = build_nft_list(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}
