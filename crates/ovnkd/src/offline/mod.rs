//! Readers for offline support bundles: sosreports and must-gathers.
//!
//! sosreport files are read directly. must-gather queries go through the
//! `omc` session, and OVN database snapshots through `ovsdb-tool`.

pub mod archive;
pub mod must_gather;
pub mod omc;
pub mod ovsdb;
pub mod sosreport;

use crate::config::Config;
use crate::executor::ProcessRunner;
use ovnk_common::{DiagError, DiagResult};
use std::sync::Arc;

pub use omc::{OmcSession, SessionEvent, SessionEventKind};

/// What the offline tools need at run time
pub struct OfflineContext {
    pub session: OmcSession,
    pub runner: Arc<dyn ProcessRunner>,
    pub ovsdb_tool_path: String,
    pub default_max_lines: usize,
}

impl OfflineContext {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &Config) -> Self {
        Self {
            session: OmcSession::new(Arc::clone(&runner), &config.offline.omc_path),
            runner,
            ovsdb_tool_path: config.offline.ovsdb_tool_path.clone(),
            default_max_lines: config.output.default_max_lines,
        }
    }
}

/// Run filesystem work off the async workers
pub async fn blocking<T, F>(work: F) -> DiagResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> DiagResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DiagError::execution(format!("archive worker failed: {}", e), "", None))?
}
