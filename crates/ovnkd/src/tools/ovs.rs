//! Open vSwitch inspection by exec into an ovnkube-node pod.

use super::LiveContext;
use crate::runner::is_missing_tool;
use ovnk_common::output::non_empty_lines;
use ovnk_common::validate;
use ovnk_common::{CommandSpec, DiagError, DiagResult, TargetParams, ToolOutput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const DEFAULT_OVS_NAMESPACE: &str = "ovn-kubernetes";

static BRIDGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_-]*$").unwrap());
static CONNTRACK_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-[a-zA-Z]|[a-zA-Z0-9_-]+=[a-zA-Z0-9x.:,/_-]+)$").unwrap());

/// Pod to exec into plus line shaping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OvsPodParams {
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub max_lines: Option<i64>,
}

/// Run `command` in the pod and return its lines as a `data` array
async fn run_lines(
    ctx: &LiveContext,
    command: CommandSpec,
    pod: &OvsPodParams,
) -> DiagResult<ToolOutput> {
    let policy = ctx
        .policy(pod.max_lines)
        .with_pattern("pattern", pod.pattern.as_deref())?
        .keep_noise();
    let namespace = validate::non_blank(pod.namespace.as_deref()).unwrap_or(DEFAULT_OVS_NAMESPACE);
    let target = TargetParams::pod(
        pod.pod_name.trim(),
        Some(namespace),
        validate::non_blank(pod.container.as_deref()),
    )
    .resolve(None)?;

    let out = ctx.runner.execute(&command, &target, Default::default()).await?;
    if is_missing_tool(&out) {
        return Err(DiagError::UnavailableTool(format!(
            "{} is not available in pod {}/{}",
            command.program(),
            namespace,
            pod.pod_name.trim()
        )));
    }
    let stderr = out.stderr.trim();
    if !out.success() || !stderr.is_empty() {
        return Err(DiagError::execution(
            format!(
                "error occurred while running {} on pod {}/{}",
                command,
                namespace,
                pod.pod_name.trim()
            ),
            stderr,
            out.exit_code,
        ));
    }

    let (lines, truncated) = policy.apply_lines(non_empty_lines(&out.stdout));
    Ok(ToolOutput::data(serde_json::json!(lines), truncated))
}

pub async fn ovs_show(ctx: &LiveContext, params: OvsPodParams) -> DiagResult<ToolOutput> {
    run_lines(ctx, CommandSpec::new("ovs-vsctl").arg("show"), &params).await
}

pub async fn ovs_list_br(ctx: &LiveContext, params: OvsPodParams) -> DiagResult<ToolOutput> {
    run_lines(ctx, CommandSpec::new("ovs-vsctl").arg("list-br"), &params).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DumpFlowsParams {
    #[serde(flatten)]
    pub pod: OvsPodParams,
    #[serde(default)]
    pub bridge: String,
    #[serde(default)]
    pub flow: Option<String>,
}

pub fn build_dump_flows(params: &DumpFlowsParams) -> DiagResult<CommandSpec> {
    let bridge = params.bridge.trim();
    if bridge.is_empty() {
        return Err(DiagError::invalid_input("bridge", "bridge name cannot be empty"));
    }
    if !BRIDGE_NAME.is_match(bridge) {
        return Err(DiagError::invalid_input(
            "bridge",
            format!(
                "invalid bridge name {:?}: only alphanumerics, '-' and '_' are allowed",
                bridge
            ),
        ));
    }
    let flow = validate::non_blank(params.flow.as_deref()).unwrap_or_default();
    if !flow.is_empty() {
        validate::expression("flow", flow)?;
    }

    Ok(CommandSpec::new("ovs-ofctl")
        .add(["dump-flows", bridge])
        .add_if_not_empty(flow, [flow]))
}

pub async fn ovs_dump_flows(ctx: &LiveContext, params: DumpFlowsParams) -> DiagResult<ToolOutput> {
    let command = build_dump_flows(&params)?;
    run_lines(ctx, command, &params.pod).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DumpConntrackParams {
    #[serde(flatten)]
    pub pod: OvsPodParams,
    #[serde(default)]
    pub parameters: Vec<String>,
}

pub fn build_dump_conntrack(params: &DumpConntrackParams) -> DiagResult<CommandSpec> {
    for param in &params.parameters {
        if param.is_empty() {
            return Err(DiagError::invalid_input(
                "parameters",
                "conntrack parameter cannot be empty",
            ));
        }
        if !CONNTRACK_PARAM.is_match(param) {
            return Err(DiagError::invalid_input(
                "parameters",
                format!(
                    "invalid conntrack parameter {:?}: \
                     expected a flag like -m or key=value like zone=5",
                    param
                ),
            ));
        }
    }

    Ok(CommandSpec::new("ovs-appctl")
        .arg("dpctl/dump-conntrack")
        .add(params.parameters.iter().map(String::as_str)))
}

pub async fn ovs_dump_conntrack(
    ctx: &LiveContext,
    params: DumpConntrackParams,
) -> DiagResult<ToolOutput> {
    let command = build_dump_conntrack(&params)?;
    run_lines(ctx, command, &params.pod).await
}
