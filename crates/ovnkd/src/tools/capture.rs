//! Packet capture (tcpdump) and kernel packet tracing (pwru).

use super::{int, LiveContext, OutputParams};
use crate::runner::{finish, RunOptions};
use ovnk_common::allow_list;
use ovnk_common::target::TargetKind;
use ovnk_common::validate::{self, AllowList, ANY_INTERFACE};
use ovnk_common::{CommandSpec, DiagError, DiagResult, TargetParams, ToolOutput};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub const MAX_CAPTURE_DURATION: i64 = 30;
pub const MAX_PACKET_COUNT: i64 = 1000;
pub const DEFAULT_SNAPLEN: i64 = 96;
pub const MAX_SNAPLEN: i64 = 262;

/// Tighter limits for unfiltered captures on every interface
pub const ANY_MAX_DURATION: i64 = 10;
pub const ANY_MAX_PACKET_COUNT: i64 = 100;

pub const DEFAULT_PWRU_LIMIT: i64 = 100;
pub const MAX_PWRU_LIMIT: i64 = 1000;

/// Where pwru needs debugfs
const DEBUGFS: &str = "/sys/kernel/debug";

allow_list! {
    pub enum CaptureFormat {
        Text => "text",
        Pcap => "pcap",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpdumpParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub packet_count: Option<i64>,
    #[serde(default)]
    pub bpf_filter: Option<String>,
    #[serde(default)]
    pub snaplen: Option<i64>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_tcpdump(params: &TcpdumpParams) -> DiagResult<CommandSpec> {
    let interface = params.interface.trim();
    validate::interface_name("interface", interface)?;

    let filter = validate::non_blank(params.bpf_filter.as_deref()).unwrap_or_default();
    if !filter.is_empty() {
        validate::expression("bpf_filter", filter)?;
    }

    let duration = int(params.duration);
    let packet_count = int(params.packet_count);

    if interface == ANY_INTERFACE && filter.is_empty() {
        if duration == 0 && packet_count == 0 {
            return Err(DiagError::invalid_input(
                "interface",
                "capturing on 'any' interface requires either a BPF filter \
                 or explicit duration/packet_count limits",
            ));
        }
        if duration > ANY_MAX_DURATION || packet_count > ANY_MAX_PACKET_COUNT {
            return Err(DiagError::invalid_input(
                "interface",
                format!(
                    "capturing on 'any' interface without BPF filter \
                     requires duration <= {}s and packet_count <= {}",
                    ANY_MAX_DURATION, ANY_MAX_PACKET_COUNT
                ),
            ));
        }
    }

    validate::require_at_least(
        2,
        &[
            ("duration", duration > 0),
            ("packet_count", packet_count > 0),
            ("bpf_filter", !filter.is_empty()),
        ],
    )?;
    validate::at_most("duration", duration, MAX_CAPTURE_DURATION, "seconds")?;
    validate::at_most("packet_count", packet_count, MAX_PACKET_COUNT, "")?;

    let snaplen = match int(params.snaplen) {
        0 => DEFAULT_SNAPLEN,
        n => n,
    };
    validate::at_most("snaplen", snaplen, MAX_SNAPLEN, "bytes")?;

    let format = CaptureFormat::parse_or(
        "output_format",
        params.output_format.as_deref(),
        CaptureFormat::Text,
    )?;

    let command = CommandSpec::new("tcpdump")
        .add(["-i", interface, "-n", "-s"])
        .arg(snaplen.to_string())
        .add_if(packet_count > 0, ["-c".to_string(), packet_count.to_string()]);
    let command = match format {
        CaptureFormat::Text => command.arg("-v"),
        CaptureFormat::Pcap => command.add(["-w", "-"]),
    };
    Ok(command.add_if_not_empty(filter, [filter]))
}

/// Run a capture. With a duration the exec is stopped once that window has
/// passed after the pod is Running, and the packets seen so far come back
/// flagged as truncated.
pub async fn tcpdump(ctx: &LiveContext, params: TcpdumpParams) -> DiagResult<ToolOutput> {
    let command = build_tcpdump(&params)?;
    let target = params.target.resolve(Some(&ctx.images.tcpdump_image))?;

    let options = match int(params.duration) {
        0 => RunOptions::default(),
        secs => RunOptions::within(Duration::from_secs(secs as u64)),
    };
    let out = ctx.runner.execute(&command, &target, options).await?;
    let cut_short = out.cut_short;
    if cut_short {
        info!(interface = %params.interface.trim(), "Capture window closed");
    }

    let stdout = finish(command.program(), out, false)?;
    let processed = ctx.policy(params.output.max_lines).apply(&stdout);
    Ok(ToolOutput::output(processed.text, processed.truncated || cut_short))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PwruParams {
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub bpf_filter: Option<String>,
    #[serde(default)]
    pub output_limit_lines: Option<i64>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_pwru(params: &PwruParams) -> DiagResult<CommandSpec> {
    let limit = match int(params.output_limit_lines) {
        0 => DEFAULT_PWRU_LIMIT,
        n => n,
    };
    validate::at_most("output_limit_lines", limit, MAX_PWRU_LIMIT, "")?;

    let filter = validate::non_blank(params.bpf_filter.as_deref()).unwrap_or_default();
    if !filter.is_empty() {
        validate::expression("bpf_filter", filter)?;
    }

    Ok(CommandSpec::new("pwru")
        .arg("--output-limit-lines")
        .arg(limit.to_string())
        .add_if_not_empty(filter, [filter]))
}

/// Debug pod target for pwru: its own image with debugfs mounted in place
pub fn pwru_target(params: &PwruParams, image: &str) -> TargetParams {
    TargetParams {
        target_type: Some(TargetKind::Node.as_str().to_string()),
        node_name: Some(params.node_name.clone()),
        node_image: Some(image.to_string()),
        host_path: Some(DEBUGFS.to_string()),
        mount_path: Some(DEBUGFS.to_string()),
        ..TargetParams::default()
    }
}

pub async fn pwru(ctx: &LiveContext, params: PwruParams) -> DiagResult<ToolOutput> {
    let command = build_pwru(&params)?;
    let target = pwru_target(&params, &ctx.images.pwru_image).resolve(None)?;
    ctx.run_text(&command, &target, RunOptions::in_image(), params.output.max_lines)
        .await
}
