//! must-gather queries through the omc session.

use super::archive::{archive_root, ArchiveKind};
use super::omc::combined;
use super::OfflineContext;
use crate::executor::ExecOutput;
use ovnk_common::allow_list;
use ovnk_common::output::{head, strip_empty_lines, tail, DEFAULT_MAX_LINES};
use ovnk_common::target::DEFAULT_NAMESPACE;
use ovnk_common::validate::{self, AllowList};
use ovnk_common::{CommandSpec, DiagError, DiagResult, ToolOutput};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

allow_list! {
    pub enum OutputType {
        Json => "json",
        Yaml => "yaml",
        Wide => "wide",
    }
}

allow_list! {
    pub enum InfoType {
        ExtraInfo => "extrainfo",
        HostNetInfo => "hostnetinfo",
        Subnets => "subnets",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MustGatherParams {
    #[serde(default)]
    pub must_gather_path: String,
}

impl MustGatherParams {
    pub fn root(&self) -> DiagResult<PathBuf> {
        archive_root("must_gather_path", &self.must_gather_path, ArchiveKind::MustGather)
    }
}

fn optional_output_type(raw: Option<&str>) -> DiagResult<Option<OutputType>> {
    validate::non_blank(raw)
        .map(|t| OutputType::parse_field("output_type", t))
        .transpose()
}

fn optional_name<'a>(field: &str, raw: Option<&'a str>) -> DiagResult<Option<&'a str>> {
    let value = validate::non_blank(raw);
    if let Some(value) = value {
        validate::kubernetes_name(field, value)?;
    }
    Ok(value)
}

fn required_name<'a>(field: &str, raw: &'a str) -> DiagResult<&'a str> {
    let value = raw.trim();
    validate::kubernetes_name(field, value)?;
    Ok(value)
}

fn is_no_resources(text: &str) -> bool {
    text.to_lowercase().contains("no resources")
}

/// Text of a successful omc read, or the failure
fn omc_text(action: &str, out: ExecOutput) -> DiagResult<String> {
    let text = combined(&out);
    if !out.success() {
        return Err(DiagError::execution(
            format!("omc failed to {}", action),
            text.trim(),
            out.exit_code,
        ));
    }
    Ok(text)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResourceParams {
    #[serde(flatten)]
    pub archive: MustGatherParams,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
}

pub fn build_get_resource(params: &GetResourceParams) -> DiagResult<CommandSpec> {
    let kind = required_name("kind", &params.kind)?;
    let name = required_name("name", &params.name)?;
    let namespace =
        optional_name("namespace", params.namespace.as_deref())?.unwrap_or(DEFAULT_NAMESPACE);
    let output = optional_output_type(params.output_type.as_deref())?;

    Ok(CommandSpec::new("omc")
        .add(["get", kind, name, "-n", namespace])
        .add(output.map(|o| ["-o", o.as_str()]).into_iter().flatten()))
}

pub async fn get_resource(
    ctx: &OfflineContext,
    params: GetResourceParams,
) -> DiagResult<ToolOutput> {
    let command = build_get_resource(&params)?;
    let root = params.archive.root()?;
    let out = ctx.session.select_then_read(&root, command.args()).await?;
    let text = omc_text("get resource", out)?;

    if is_no_resources(&text) {
        let namespace =
            validate::non_blank(params.namespace.as_deref()).unwrap_or(DEFAULT_NAMESPACE);
        return Err(DiagError::ResourceNotFound(format!(
            "{} {} not found in namespace {}",
            params.kind.trim(),
            params.name.trim(),
            namespace
        )));
    }
    Ok(ToolOutput::data(serde_json::Value::String(text), false))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResourcesParams {
    #[serde(flatten)]
    pub archive: MustGatherParams,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
}

pub fn build_list_resources(
    params: &ListResourcesParams,
) -> DiagResult<(Option<OutputType>, CommandSpec)> {
    let kind = required_name("kind", &params.kind)?;
    let namespace = optional_name("namespace", params.namespace.as_deref())?;
    let selector = validate::non_blank(params.label_selector.as_deref()).unwrap_or_default();
    if !selector.is_empty() {
        validate::expression("label_selector", selector)?;
    }
    let output = optional_output_type(params.output_type.as_deref())?;

    let command = CommandSpec::new("omc")
        .add(["get", kind])
        .add_if_not_empty(selector, ["-l", selector])
        .add(output.map(|o| ["-o", o.as_str()]).into_iter().flatten());
    let command = match namespace {
        Some(namespace) => command.add(["-n", namespace]),
        None => command.arg("-A"),
    };
    Ok((output, command))
}

/// What an empty listing looks like in each format
pub fn empty_list(output: Option<OutputType>) -> String {
    match output {
        Some(OutputType::Json) => {
            "{\n  \"apiVersion\": \"v1\",\n  \"kind\": \"List\",\n  \"items\": []\n}".to_string()
        }
        Some(OutputType::Yaml) => "apiVersion: v1\nkind: List\nitems: []".to_string(),
        _ => String::new(),
    }
}

/// Raw listing text, with "no resources" turned into an empty list
pub async fn list_resources_text(
    ctx: &OfflineContext,
    params: &ListResourcesParams,
) -> DiagResult<String> {
    let (output, command) = build_list_resources(params)?;
    let root = params.archive.root()?;
    let out = ctx.session.select_then_read(&root, command.args()).await?;
    let text = omc_text("list resources", out)?;
    if is_no_resources(&text) {
        return Ok(empty_list(output));
    }
    Ok(text)
}

pub async fn list_resources(
    ctx: &OfflineContext,
    params: ListResourcesParams,
) -> DiagResult<ToolOutput> {
    let text = list_resources_text(ctx, &params).await?;
    Ok(ToolOutput::data(serde_json::Value::String(text), false))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodLogsParams {
    #[serde(flatten)]
    pub archive: MustGatherParams,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub previous: bool,
    #[serde(default)]
    pub rotated: bool,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub head: Option<i64>,
    #[serde(default)]
    pub tail: Option<i64>,
}

/// Which end of the log to keep, and how many lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogWindow {
    Head(usize),
    Tail(usize),
}

impl LogWindow {
    pub fn from_params(head: Option<i64>, tail: Option<i64>) -> DiagResult<Self> {
        let head = head.unwrap_or(0);
        let tail = tail.unwrap_or(0);
        if head != 0 && tail != 0 {
            return Err(DiagError::invalid_input(
                "head|tail",
                "head and tail cannot be used together",
            ));
        }
        let count = |n: i64| if n > 0 { n as usize } else { DEFAULT_MAX_LINES };
        if tail != 0 {
            Ok(LogWindow::Tail(count(tail)))
        } else {
            Ok(LogWindow::Head(count(head)))
        }
    }

    pub fn apply(&self, lines: Vec<String>) -> (Vec<String>, bool) {
        let total = lines.len();
        let kept = match *self {
            LogWindow::Head(n) => head(lines, n),
            LogWindow::Tail(n) => tail(lines, n),
        };
        let truncated = kept.len() < total;
        (kept, truncated)
    }
}

pub fn build_pod_logs(params: &PodLogsParams) -> DiagResult<(LogWindow, CommandSpec)> {
    let name = required_name("name", &params.name)?;
    let namespace = optional_name("namespace", params.namespace.as_deref())?.unwrap_or_default();
    let container = optional_name("container", params.container.as_deref())?.unwrap_or_default();
    let window = LogWindow::from_params(params.head, params.tail)?;

    let command = CommandSpec::new("omc")
        .add(["logs", name])
        .add_if_not_empty(container, ["-c", container])
        .add_if_not_empty(namespace, ["-n", namespace])
        .add_if(params.previous, ["-p"])
        .add_if(params.rotated, ["-r"]);
    Ok((window, command))
}

pub async fn pod_logs(ctx: &OfflineContext, params: PodLogsParams) -> DiagResult<ToolOutput> {
    let (window, command) = build_pod_logs(&params)?;
    let pattern = validate::non_blank(params.pattern.as_deref())
        .map(|p| validate::search_pattern("pattern", p))
        .transpose()?;
    let root = params.archive.root()?;

    let out = ctx.session.select_then_read(&root, command.args()).await?;
    let text = omc_text("get pod logs", out)?;

    let mut lines = strip_empty_lines(&text);
    if let Some(pattern) = pattern {
        lines.retain(|line| pattern.is_match(line));
    }
    let (lines, truncated) = window.apply(lines);
    Ok(ToolOutput::logs(lines, truncated))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OvnkInfoParams {
    #[serde(flatten)]
    pub archive: MustGatherParams,
    #[serde(default)]
    pub info_type: String,
}

pub async fn ovnk_info(ctx: &OfflineContext, params: OvnkInfoParams) -> DiagResult<ToolOutput> {
    let info = InfoType::parse_field("info_type", &params.info_type)?;
    let command = CommandSpec::new("omc").add(["ovnk", info.as_str()]);
    let root = params.archive.root()?;

    let out = ctx.session.select_then_read(&root, command.args()).await?;
    let text = omc_text("get ovn-kubernetes info", out)?;
    Ok(ToolOutput::data(serde_json::Value::String(text), false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_resource_args() {
        let params = GetResourceParams {
            kind: "pod".into(),
            name: "ovnkube-node-abcde".into(),
            output_type: Some("yaml".into()),
            ..GetResourceParams::default()
        };
        assert_eq!(
            build_get_resource(&params).unwrap().args(),
            ["get", "pod", "ovnkube-node-abcde", "-n", "default", "-o", "yaml"]
        );

        for (kind, name) in [("pod", "-all"), ("", "x"), ("pod", "a;b"), ("pod", "")] {
            let params = GetResourceParams {
                kind: kind.into(),
                name: name.into(),
                ..GetResourceParams::default()
            };
            assert!(build_get_resource(&params).unwrap_err().is_invalid_input());
        }
    }

    #[test]
    fn test_list_resources_args() {
        let params = ListResourcesParams {
            kind: "pod".into(),
            label_selector: Some("app=ovnkube-node".into()),
            output_type: Some("json".into()),
            ..ListResourcesParams::default()
        };
        let (output, command) = build_list_resources(&params).unwrap();
        assert_eq!(output, Some(OutputType::Json));
        assert_eq!(command.args(), ["get", "pod", "-l", "app=ovnkube-node", "-o", "json", "-A"]);

        let namespaced = ListResourcesParams {
            namespace: Some("openshift-ovn-kubernetes".into()),
            label_selector: None,
            output_type: None,
            ..params.clone()
        };
        let (_, command) = build_list_resources(&namespaced).unwrap();
        assert_eq!(command.args(), ["get", "pod", "-n", "openshift-ovn-kubernetes"]);

        let injected = ListResourcesParams {
            label_selector: Some("app=x|y".into()),
            ..params
        };
        assert!(build_list_resources(&injected).is_err());
    }

    #[test]
    fn test_empty_list_documents() {
        let json: serde_json::Value =
            serde_json::from_str(&empty_list(Some(OutputType::Json))).unwrap();
        assert_eq!(json["kind"], "List");
        assert!(json["items"].as_array().unwrap().is_empty());
        assert!(empty_list(Some(OutputType::Yaml)).contains("items: []"));
        assert_eq!(empty_list(None), "");
    }

    #[test]
    fn test_log_window() {
        assert!(LogWindow::from_params(Some(5), Some(5)).is_err());
        assert_eq!(LogWindow::from_params(None, None).unwrap(), LogWindow::Head(100));
        assert_eq!(LogWindow::from_params(None, Some(-1)).unwrap(), LogWindow::Tail(100));

        let lines: Vec<String> = (1..=5).map(|i| i.to_string()).collect();
        let (kept, truncated) = LogWindow::Tail(2).apply(lines.clone());
        assert_eq!(kept, vec!["4", "5"]);
        assert!(truncated);
        let (kept, truncated) = LogWindow::Head(10).apply(lines);
        assert_eq!(kept.len(), 5);
        assert!(!truncated);
    }

    #[test]
    fn test_pod_logs_args() {
        let params = PodLogsParams {
            name: "ovnkube-node-abcde".into(),
            namespace: Some("openshift-ovn-kubernetes".into()),
            container: Some("ovnkube-controller".into()),
            previous: true,
            ..PodLogsParams::default()
        };
        let (window, command) = build_pod_logs(&params).unwrap();
        assert_eq!(window, LogWindow::Head(100));
        assert_eq!(
            command.args(),
            [
                "logs",
                "ovnkube-node-abcde",
                "-c",
                "ovnkube-controller",
                "-n",
                "openshift-ovn-kubernetes",
                "-p"
            ]
        );
    }
}
