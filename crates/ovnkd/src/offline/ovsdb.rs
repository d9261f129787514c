//! OVN database snapshots shipped in a must-gather.
//!
//! The snapshots arrive as `network_logs/ovnk_database_store.tar.gz` and are
//! unpacked next to the tarball on first use. Queries run `ovsdb-tool query`
//! against the unpacked files.

use super::archive::io_failure;
use super::must_gather::{list_resources_text, ListResourcesParams, MustGatherParams};
use super::{blocking, OfflineContext};
use crate::runner::finish;
use flate2::read::GzDecoder;
use ovnk_common::{DiagError, DiagResult, ToolOutput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub const NETWORK_LOGS_DIR: &str = "network_logs";
pub const DATABASE_STORE: &str = "ovnk_database_store";
pub const OVNKUBE_NODE_SELECTOR: &str = "app=ovnkube-node";

const STAGING_PREFIX: &str = ".ovnk_database_store-";
const DIR_MODE: u32 = 0o750;
const FILE_MODE: u32 = 0o640;

static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-zA-Z0-9_]*$").unwrap());
static COLUMN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Northbound,
    Southbound,
}

impl Schema {
    pub fn suffix(&self) -> &'static str {
        match self {
            Schema::Northbound => "_nbdb",
            Schema::Southbound => "_sbdb",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Schema::Northbound => "OVN_Northbound",
            Schema::Southbound => "OVN_Southbound",
        }
    }
}

/// Database file name and its schema; checked before anything touches disk
pub fn check_database_name(raw: &str) -> DiagResult<(&str, Schema)> {
    let name = raw.trim();
    let schema = if name.ends_with(Schema::Northbound.suffix()) {
        Schema::Northbound
    } else if name.ends_with(Schema::Southbound.suffix()) {
        Schema::Southbound
    } else {
        return Err(DiagError::invalid_input(
            "database_name",
            format!("must end with _nbdb or _sbdb: {}", name),
        ));
    };
    if name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(DiagError::invalid_input(
            "database_name",
            format!("must be a plain file name: {}", name),
        ));
    }
    Ok((name, schema))
}

/// `<root>/<single dir>/network_logs`
pub fn network_logs_dir(root: &Path) -> DiagResult<PathBuf> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| io_failure("failed to read must-gather", e))? {
        let entry = entry.map_err(|e| io_failure("failed to read must-gather", e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    let data_dir = match dirs.as_slice() {
        [only] => only.clone(),
        [] => {
            return Err(DiagError::ResourceNotFound(
                "must-gather contains no data directory".into(),
            ))
        }
        _ => {
            return Err(DiagError::invalid_input(
                "must_gather_path",
                format!("must-gather contains {} data directories, expected one", dirs.len()),
            ))
        }
    };

    let network_logs = data_dir.join(NETWORK_LOGS_DIR);
    if !network_logs.is_dir() {
        return Err(DiagError::ResourceNotFound(format!(
            "network logs directory not found: {}",
            network_logs.display()
        )));
    }
    Ok(network_logs)
}

/// Destination of an archive entry, refusing anything that leaves `base`
fn entry_destination(base: &Path, entry_path: &Path) -> DiagResult<PathBuf> {
    let mut dest = base.to_path_buf();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => dest.push(part),
            Component::CurDir => {}
            _ => {
                return Err(DiagError::invalid_input(
                    "archive",
                    format!("entry escapes the extraction directory: {}", entry_path.display()),
                ))
            }
        }
    }
    if dest == base {
        return Err(DiagError::invalid_input(
            "archive",
            format!("entry has no name: {}", entry_path.display()),
        ));
    }
    Ok(dest)
}

fn create_dirs(path: &Path) -> DiagResult<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
        .map_err(|e| io_failure(&format!("failed to create {}", path.display()), e))
}

fn unpack(tarball: &Path, base: &Path) -> DiagResult<()> {
    let file = File::open(tarball).map_err(|e| io_failure("failed to open database store", e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|e| io_failure("failed to read database store", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| io_failure("failed to read database store entry", e))?;
        let entry_path = entry
            .path()
            .map_err(|e| io_failure("invalid entry name in database store", e))?
            .into_owned();
        let dest = entry_destination(base, &entry_path)?;
        let entry_type = entry.header().entry_type();
        if entry_type == tar::EntryType::XGlobalHeader {
            continue;
        }

        if entry_type.is_dir() {
            create_dirs(&dest)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest.parent() {
                create_dirs(parent)?;
            }
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&dest)
                .map_err(|e| io_failure(&format!("failed to create {}", dest.display()), e))?;
            io::copy(&mut entry, &mut out)
                .map_err(|e| io_failure(&format!("failed to write {}", dest.display()), e))?;
        } else {
            return Err(DiagError::invalid_input(
                "archive",
                format!("unsupported entry type {:?} for {}", entry_type, entry_path.display()),
            ));
        }
    }
    Ok(())
}

/// Unpack the database store once and return its directory.
///
/// Each call unpacks into its own staging directory and renames the result
/// into place, so a store that is visible is always complete. When two calls
/// race, the loser's rename fails against the winner's store and the loser
/// uses that store instead.
pub fn extract_databases(network_logs: &Path) -> DiagResult<PathBuf> {
    let store = network_logs.join(DATABASE_STORE);
    if store.is_dir() {
        return Ok(store);
    }
    if store.exists() {
        fs::remove_file(&store)
            .map_err(|e| io_failure("failed to remove stale database store", e))?;
    }

    let tarball = network_logs.join(format!("{}.tar.gz", DATABASE_STORE));
    if !tarball.is_file() {
        return Err(DiagError::ResourceNotFound(format!(
            "database store not found: {}",
            tarball.display()
        )));
    }

    info!(path = %tarball.display(), "Extracting OVN databases");
    // dropped on every path, taking any partial output with it
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(network_logs)
        .map_err(|e| io_failure("failed to create staging directory", e))?;
    unpack(&tarball, staging.path())?;

    let staged = staging.path().join(DATABASE_STORE);
    if !staged.is_dir() {
        return Err(DiagError::ResourceNotFound(format!(
            "database store archive did not contain {}",
            DATABASE_STORE
        )));
    }
    if let Err(e) = fs::rename(&staged, &store) {
        if !store.is_dir() {
            return Err(io_failure("failed to move database store into place", e));
        }
        debug!("Database store already extracted by another request");
    }
    Ok(store)
}

/// Database files of one schema, keyed by the pod that owns them
pub fn database_files(store: &Path, schema: Schema) -> DiagResult<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(store).map_err(|e| io_failure("failed to read database store", e))? {
        let entry = entry.map_err(|e| io_failure("failed to read database store", e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match name.strip_suffix(schema.suffix()) {
            Some(pod) if !pod.is_empty() => {
                files.insert(pod.to_string(), name);
            }
            Some(_) => warn!("Skipping database file with unexpected name: {}", name),
            None => {}
        }
    }
    Ok(files)
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMeta,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Deserialize)]
struct PodMeta {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default, rename = "nodeName")]
    node_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseNode {
    pub database: String,
    pub node: String,
}

/// Pair database files with the node their ovnkube-node pod ran on
pub fn map_to_nodes(
    mut files: BTreeMap<String, String>,
    pods_json: &str,
) -> DiagResult<Vec<DatabaseNode>> {
    let pods: PodList = serde_json::from_str(pods_json).map_err(|e| {
        DiagError::execution(format!("failed to parse ovnkube-node pod list: {}", e), "", None)
    })?;

    let mut mapped = Vec::new();
    for pod in pods.items {
        let Some(database) = files.remove(&pod.metadata.name) else {
            continue;
        };
        match pod.spec.node_name.filter(|n| !n.is_empty()) {
            Some(node) => mapped.push(DatabaseNode { database, node }),
            None => warn!("Pod {} has no node assignment, skipping", pod.metadata.name),
        }
    }
    if !files.is_empty() {
        warn!("{} database files matched no ovnkube-node pod: {:?}", files.len(), files.values());
    }
    Ok(mapped)
}

pub async fn list_databases(
    ctx: &OfflineContext,
    params: MustGatherParams,
    schema: Schema,
) -> DiagResult<ToolOutput> {
    let root = params.root()?;
    let files = blocking(move || {
        let store = extract_databases(&network_logs_dir(&root)?)?;
        database_files(&store, schema)
    })
    .await?;
    if files.is_empty() {
        return Err(DiagError::ResourceNotFound(format!(
            "no {} databases found",
            schema.name()
        )));
    }

    let pods = list_resources_text(
        ctx,
        &ListResourcesParams {
            archive: params,
            kind: "pod".to_string(),
            namespace: None,
            label_selector: Some(OVNKUBE_NODE_SELECTOR.to_string()),
            output_type: Some("json".to_string()),
        },
    )
    .await?;

    let mapped = map_to_nodes(files, &pods)?;
    let value = serde_json::to_value(mapped)
        .map_err(|e| DiagError::execution(format!("failed to encode databases: {}", e), "", None))?;
    Ok(ToolOutput::data(value, false))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDatabaseParams {
    #[serde(flatten)]
    pub archive: MustGatherParams,
    #[serde(default)]
    pub database_name: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// The `ovsdb-tool query` transaction for a select
pub fn build_query(
    schema: Schema,
    table: &str,
    conditions: &[String],
    columns: &[String],
) -> DiagResult<String> {
    if !TABLE_NAME.is_match(table) {
        return Err(DiagError::invalid_input(
            "table",
            format!("invalid OVN table name: {}", table),
        ));
    }
    if let Some(column) = columns.iter().find(|c| !COLUMN_NAME.is_match(c)) {
        return Err(DiagError::invalid_input("columns", format!("invalid column name: {}", column)));
    }

    let mut clauses = Vec::with_capacity(conditions.len());
    for raw in conditions {
        let clause: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            DiagError::invalid_input("conditions", format!("failed to parse {:?}: {}", raw, e))
        })?;
        if !clause.is_array() {
            return Err(DiagError::invalid_input(
                "conditions",
                format!("condition must be a JSON array like [\"name\",\"==\",\"x\"]: {}", raw),
            ));
        }
        clauses.push(clause);
    }

    let mut operation = serde_json::json!({
        "op": "select",
        "table": table,
        "where": clauses,
    });
    if !columns.is_empty() {
        operation["columns"] = serde_json::json!(columns);
    }
    Ok(serde_json::json!([schema.name(), operation]).to_string())
}

pub async fn query_database(
    ctx: &OfflineContext,
    params: QueryDatabaseParams,
) -> DiagResult<ToolOutput> {
    let (database, schema) = check_database_name(&params.database_name)?;
    let query = build_query(schema, params.table.trim(), &params.conditions, &params.columns)?;
    let root = params.archive.root()?;

    let database = database.to_string();
    let db_path = blocking(move || {
        let store = extract_databases(&network_logs_dir(&root)?)?;
        let db_path = store.join(&database);
        if !db_path.is_file() {
            return Err(DiagError::ResourceNotFound(format!(
                "database file not found: {}",
                database
            )));
        }
        Ok(db_path)
    })
    .await?;

    let args = vec!["query".to_string(), db_path.display().to_string(), query];
    let out = ctx.runner.run(&ctx.ovsdb_tool_path, &args, None).await?;
    let stdout = finish("ovsdb-tool", out, false)?;

    let value = serde_json::from_str(&stdout).unwrap_or(serde_json::Value::String(stdout));
    Ok(ToolOutput::data(value, false))
}
