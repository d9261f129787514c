//! Connectivity probes: ping, tracepath, dig, curl, nc.

use super::{LiveContext, OutputParams};
use crate::runner::{finish, RunOptions};
use ovnk_common::allow_list;
use ovnk_common::output::filter_noise;
use ovnk_common::validate::{self, AllowList};
use ovnk_common::{CommandSpec, DiagError, DiagResult, TargetParams, ToolOutput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static HEADER_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").unwrap());

allow_list! {
    pub enum RecordType {
        A => "A",
        Aaaa => "AAAA",
        Mx => "MX",
        Ns => "NS",
        Txt => "TXT",
        Cname => "CNAME",
        Soa => "SOA",
        Ptr => "PTR",
    }
}

allow_list! {
    pub enum HttpMethod {
        Get => "GET",
        Post => "POST",
        Put => "PUT",
        Delete => "DELETE",
        Head => "HEAD",
    }
}

impl HttpMethod {
    /// Methods that cannot change state on the far side
    pub fn is_read_only(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingParams {
    #[serde(flatten)]
    pub target_params: TargetParams,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub interval: Option<i64>,
    #[serde(default)]
    pub ipv6: bool,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_ping(params: &PingParams) -> DiagResult<CommandSpec> {
    let target = params.target.trim();
    validate::hostname("target", target)?;
    let count = validate::bounded_or_default("count", params.count, 4, 1, 10)?;
    let timeout = validate::bounded_or_default("timeout", params.timeout, 5, 1, 10)?;
    let interval = validate::bounded_or_default("interval", params.interval, 1, 1, 5)?;

    let program = if params.ipv6 { "ping6" } else { "ping" };
    Ok(CommandSpec::new(program)
        .add(["-c".to_string(), count.to_string()])
        .add(["-W".to_string(), timeout.to_string()])
        .add(["-i".to_string(), interval.to_string()])
        .arg(target))
}

pub async fn ping(ctx: &LiveContext, params: PingParams) -> DiagResult<ToolOutput> {
    let command = build_ping(&params)?;
    ctx.run_on(command, &params.target_params, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerouteParams {
    #[serde(flatten)]
    pub target_params: TargetParams,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub max_hops: Option<i64>,
    #[serde(default)]
    pub ipv6: bool,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_traceroute(params: &TracerouteParams) -> DiagResult<CommandSpec> {
    let target = params.target.trim();
    validate::hostname("target", target)?;
    let max_hops = validate::bounded_or_default("max_hops", params.max_hops, 30, 1, 30)?;

    let program = if params.ipv6 { "tracepath6" } else { "tracepath" };
    Ok(CommandSpec::new(program)
        .add(["-n".to_string(), "-m".to_string(), max_hops.to_string()])
        .arg(target))
}

pub async fn traceroute(ctx: &LiveContext, params: TracerouteParams) -> DiagResult<ToolOutput> {
    let command = build_traceroute(&params)?;
    ctx.run_on(command, &params.target_params, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default)]
    pub short: bool,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_dig(params: &DigParams) -> DiagResult<CommandSpec> {
    let hostname = params.hostname.trim();
    if hostname.is_empty() {
        return Err(DiagError::invalid_input("hostname", "hostname is required"));
    }
    validate::hostname("hostname", hostname)?;

    let server = validate::non_blank(params.server.as_deref());
    if let Some(server) = server {
        validate::ip_addr("server", server)?;
    }
    let record_type =
        RecordType::parse_or("record_type", params.record_type.as_deref(), RecordType::A)?;

    Ok(CommandSpec::new("dig")
        .add(server.map(|s| format!("@{}", s)))
        .arg(hostname)
        .arg(record_type.as_str())
        .add_if(params.short, ["+short"]))
}

pub async fn dig(ctx: &LiveContext, params: DigParams) -> DiagResult<ToolOutput> {
    let command = build_dig(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurlParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub follow_redirect: bool,
    #[serde(default)]
    pub max_redirects: Option<i64>,
    #[serde(default)]
    pub insecure_ssl: bool,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_curl(params: &CurlParams) -> DiagResult<CommandSpec> {
    let url = params.url.trim();
    validate::http_url("url", url)?;

    let method = HttpMethod::parse_or("method", params.method.as_deref(), HttpMethod::Get)?;
    if !method.is_read_only() {
        return Err(DiagError::invalid_input(
            "method",
            format!("{} is not allowed, only GET and HEAD requests can be made", method),
        ));
    }

    let timeout = validate::bounded_or_default("timeout", params.timeout, 10, 1, 30)?;

    let mut command = CommandSpec::new("curl").add(["-X", method.as_str()]);
    for (name, value) in &params.headers {
        if !HEADER_NAME.is_match(name) {
            return Err(DiagError::invalid_input(
                "headers",
                format!("invalid header name: {}", name),
            ));
        }
        validate::free_text("headers", value)?;
        command = command.add(["-H".to_string(), format!("{}: {}", name, value)]);
    }
    command = command.add(["--max-time".to_string(), timeout.to_string()]);

    if params.follow_redirect {
        let max_redirects =
            validate::bounded_or_default("max_redirects", params.max_redirects, 5, 1, 10)?;
        command = command
            .arg("-L")
            .add(["--max-redirs".to_string(), max_redirects.to_string()]);
    }

    Ok(command.add_if(params.insecure_ssl, ["-k"]).add(["-i", url]))
}

pub async fn curl(ctx: &LiveContext, params: CurlParams) -> DiagResult<ToolOutput> {
    let command = build_curl(&params)?;
    ctx.run_on(command, &params.target, &params.output).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetcatParams {
    #[serde(flatten)]
    pub target: TargetParams,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub udp: bool,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(flatten)]
    pub output: OutputParams,
}

pub fn build_netcat(params: &NetcatParams) -> DiagResult<CommandSpec> {
    let host = params.host.trim();
    validate::hostname("host", host)?;
    let port = validate::port("port", params.port)?;
    let timeout = validate::bounded_or_default("timeout", params.timeout, 5, 1, 10)?;

    Ok(CommandSpec::new("nc")
        .add(["-v".to_string(), "-z".to_string(), "-w".to_string(), timeout.to_string()])
        .add_if(params.udp, ["-u"])
        .add([host.to_string(), port.to_string()]))
}

/// Port checks report closed ports as a result, not an RPC failure
pub async fn netcat(ctx: &LiveContext, params: NetcatParams) -> DiagResult<ToolOutput> {
    let command = build_netcat(&params)?;
    let target = params.target.resolve(None)?;
    let out = ctx.runner.execute(&command, &target, RunOptions::default()).await?;

    // nc -v reports on stderr
    let mut text = out.stdout.clone();
    let stderr = filter_noise(&out.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    let processed = ctx.policy(params.output.max_lines).apply(&text);
    let result = ToolOutput::output(processed.text, processed.truncated);

    match finish(command.program(), out, false) {
        Ok(_) => Ok(result),
        Err(e @ DiagError::UnavailableTool(_)) => Err(e),
        Err(e) => Ok(result.with_error(&e)),
    }
}
