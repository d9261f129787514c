//! sosreport readers: manifest listings, command output, pod log search.

use super::archive::{archive_root, io_failure, resolve_relative, ArchiveKind, SOS_MANIFEST};
use flate2::read::GzDecoder;
use ovnk_common::output::DEFAULT_MAX_LINES;
use ovnk_common::validate;
use ovnk_common::{DiagError, DiagResult, OutputPolicy, ToolOutput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

const CONTAINER_LOG_PLUGIN: &str = "container_log";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub components: Components,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Components {
    #[serde(default)]
    pub report: Report,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginDetail {
    #[serde(default)]
    pub commands: Vec<CommandDetail>,
    #[serde(default)]
    pub files: Vec<FilesDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandDetail {
    #[serde(default)]
    pub exec: String,
    #[serde(default)]
    pub filepath: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilesDetail {
    #[serde(default)]
    pub files_copied: Vec<String>,
}

pub fn load_manifest(root: &Path) -> DiagResult<Manifest> {
    let raw = fs::read(root.join(SOS_MANIFEST))
        .map_err(|e| io_failure("failed to read manifest.json", e))?;
    serde_json::from_slice(&raw).map_err(|e| {
        DiagError::execution(format!("failed to parse manifest.json: {}", e), "", None)
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SosreportParams {
    #[serde(default)]
    pub sosreport_path: String,
}

impl SosreportParams {
    fn root(&self) -> DiagResult<PathBuf> {
        archive_root("sosreport_path", &self.sosreport_path, ArchiveKind::Sosreport)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSummary {
    pub name: String,
    pub command_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPluginsResult {
    pub plugins: Vec<PluginSummary>,
    pub total_commands: usize,
}

pub fn list_plugins(params: &SosreportParams) -> DiagResult<ListPluginsResult> {
    let manifest = load_manifest(&params.root()?)?;
    let plugins: Vec<PluginSummary> = manifest
        .components
        .report
        .plugins
        .iter()
        .map(|(name, plugin)| PluginSummary {
            name: name.clone(),
            command_count: plugin.commands.len(),
        })
        .collect();
    let total_commands = plugins.iter().map(|p| p.command_count).sum();
    Ok(ListPluginsResult { plugins, total_commands })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListCommandsParams {
    #[serde(flatten)]
    pub archive: SosreportParams,
    #[serde(default)]
    pub plugin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSummary {
    pub exec: String,
    pub filepath: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCommandsResult {
    pub plugin: String,
    pub command_count: usize,
    pub commands: Vec<CommandSummary>,
}

pub fn list_commands(params: &ListCommandsParams) -> DiagResult<ListCommandsResult> {
    let plugin_name = params.plugin.trim();
    if plugin_name.is_empty() {
        return Err(DiagError::invalid_input("plugin", "plugin name is required"));
    }
    let manifest = load_manifest(&params.archive.root()?)?;
    let plugin = manifest
        .components
        .report
        .plugins
        .get(plugin_name)
        .ok_or_else(|| {
            DiagError::ResourceNotFound(format!("plugin {:?} not found in manifest", plugin_name))
        })?;

    Ok(ListCommandsResult {
        plugin: plugin_name.to_string(),
        command_count: plugin.commands.len(),
        commands: plugin
            .commands
            .iter()
            .map(|c| CommandSummary {
                exec: c.exec.clone(),
                filepath: c.filepath.clone(),
            })
            .collect(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCommandsParams {
    #[serde(flatten)]
    pub archive: SosreportParams,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub max_results: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMatch {
    pub plugin: String,
    pub exec: String,
    pub filepath: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCommandsResult {
    pub matches: Vec<CommandMatch>,
    pub total: usize,
}

fn required_pattern(raw: &str) -> DiagResult<Regex> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DiagError::invalid_input("pattern", "search pattern is required"));
    }
    validate::search_pattern("pattern", raw)
}

fn result_limit(max_results: Option<i64>) -> usize {
    match max_results {
        Some(n) if n > 0 => n as usize,
        _ => DEFAULT_MAX_LINES,
    }
}

pub fn search_commands(params: &SearchCommandsParams) -> DiagResult<SearchCommandsResult> {
    let pattern = required_pattern(&params.pattern)?;
    let limit = result_limit(params.max_results);
    let manifest = load_manifest(&params.archive.root()?)?;

    let matches: Vec<CommandMatch> = manifest
        .components
        .report
        .plugins
        .iter()
        .flat_map(|(name, plugin)| plugin.commands.iter().map(move |c| (name, c)))
        .filter(|(_, c)| pattern.is_match(&c.exec) || pattern.is_match(&c.filepath))
        .take(limit)
        .map(|(name, c)| CommandMatch {
            plugin: name.clone(),
            exec: c.exec.clone(),
            filepath: c.filepath.clone(),
        })
        .collect();
    let total = matches.len();
    Ok(SearchCommandsResult { matches, total })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetCommandParams {
    #[serde(flatten)]
    pub archive: SosreportParams,
    #[serde(default)]
    pub filepath: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub max_lines: Option<i64>,
}

pub fn get_command(params: &GetCommandParams, default_max_lines: usize) -> DiagResult<ToolOutput> {
    let policy = OutputPolicy::with_default(params.max_lines, default_max_lines)
        .with_pattern("pattern", params.pattern.as_deref())?
        .keep_noise();
    let root = params.archive.root()?;
    let path = resolve_relative(&root, "filepath", &params.filepath)?;

    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiagError::ResourceNotFound(format!(
                "command output file not found: {}",
                params.filepath.trim()
            )))
        }
        Err(e) => return Err(io_failure("failed to read command output", e)),
    };

    let processed = policy.apply(&String::from_utf8_lossy(&raw));
    if processed.text.is_empty() && policy.has_pattern() {
        let pattern = params.pattern.as_deref().unwrap_or_default().trim();
        return Ok(ToolOutput::output(
            format!("No lines matching pattern {:?} found\n", pattern),
            false,
        ));
    }
    Ok(ToolOutput::output(processed.text, processed.truncated))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPodLogsParams {
    #[serde(flatten)]
    pub archive: SosreportParams,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub pod_filter: Option<String>,
    #[serde(default)]
    pub max_results: Option<i64>,
}

/// Matching lines of one log file, plain or gzip-compressed
fn search_file(path: &Path, pattern: &Regex, limit: usize) -> std::io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut matches = Vec::new();
    for line in BufReader::new(reader).split(b'\n') {
        let line = line?;
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches('\r');
        if pattern.is_match(line) {
            matches.push(line.to_string());
            if matches.len() >= limit {
                break;
            }
        }
    }
    Ok(matches)
}

pub fn search_pod_logs(params: &SearchPodLogsParams) -> DiagResult<ToolOutput> {
    let pattern = required_pattern(&params.pattern)?;
    let pod_filter = validate::non_blank(params.pod_filter.as_deref()).unwrap_or_default();
    if !pod_filter.is_empty() {
        validate::free_text("pod_filter", pod_filter)?;
    }
    let limit = result_limit(params.max_results);
    let root = params.archive.root()?;
    let manifest = load_manifest(&root)?;

    let files: Vec<&String> = manifest
        .components
        .report
        .plugins
        .get(CONTAINER_LOG_PLUGIN)
        .map(|plugin| plugin.files.iter().flat_map(|f| f.files_copied.iter()).collect())
        .unwrap_or_default();
    if files.is_empty() {
        return Ok(ToolOutput::output("No pod logs found in sosreport\n".to_string(), false));
    }

    let mut text = String::new();
    let mut total = 0;
    for copied in files {
        if !pod_filter.is_empty() && !copied.contains(pod_filter) {
            continue;
        }
        let relative = copied.strip_prefix("host/").unwrap_or(copied);
        // manifest entries come from the archive, so they get the same checks as caller paths
        let path = match resolve_relative(&root, "files_copied", relative) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping manifest entry {}: {}", copied, e);
                continue;
            }
        };

        let matches = match search_file(&path, &pattern, limit - total) {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Skipping unreadable log {}: {}", path.display(), e);
                continue;
            }
        };
        if matches.is_empty() {
            continue;
        }

        text.push_str(&format!("\n=== {} ===\n", relative));
        for line in &matches {
            text.push_str(line);
            text.push('\n');
        }
        total += matches.len();
        if total >= limit {
            text.push_str(&format!("\n... (search truncated at {} results)\n", limit));
            return Ok(ToolOutput::output(text, true));
        }
    }

    if total == 0 {
        return Ok(ToolOutput::output(
            format!("No matches found for pattern: {}\n", params.pattern.trim()),
            false,
        ));
    }
    Ok(ToolOutput::output(text, false))
}
