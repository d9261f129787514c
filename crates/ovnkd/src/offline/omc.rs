//! The `omc` session.
//!
//! `omc` keeps the selected must-gather in its own global state, so a read
//! is only meaningful right after `omc use` for the same archive. The
//! session holds one async lock across both steps and exposes nothing else.

use crate::executor::{ExecOutput, ProcessRunner};
use ovnk_common::output::filter_noise;
use ovnk_common::{DiagError, DiagResult};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Events kept for inspection
pub const HISTORY_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Select,
    Read,
}

/// One step taken while the session lock was held
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub seq: u64,
    pub kind: SessionEventKind,
    pub snapshot: PathBuf,
}

#[derive(Default)]
struct SessionState {
    selected: Option<PathBuf>,
    next_seq: u64,
    history: VecDeque<SessionEvent>,
}

impl SessionState {
    fn record(&mut self, kind: SessionEventKind, snapshot: &Path) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(SessionEvent {
            seq: self.next_seq,
            kind,
            snapshot: snapshot.to_path_buf(),
        });
        self.next_seq += 1;
    }
}

pub struct OmcSession {
    runner: Arc<dyn ProcessRunner>,
    omc_path: String,
    state: Mutex<SessionState>,
}

impl OmcSession {
    pub fn new(runner: Arc<dyn ProcessRunner>, omc_path: &str) -> Self {
        Self {
            runner,
            omc_path: omc_path.to_string(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Select `root` and run one read against it, atomically
    pub async fn select_then_read(&self, root: &Path, args: &[String]) -> DiagResult<ExecOutput> {
        let mut state = self.state.lock().await;

        let select = vec!["use".to_string(), root.display().to_string()];
        debug!(snapshot = %root.display(), "omc use");
        let out = self.runner.run(&self.omc_path, &select, None).await?;
        if !out.success() {
            state.selected = None;
            return Err(DiagError::execution(
                format!("omc could not select must-gather {}", root.display()),
                combined(&out),
                out.exit_code,
            ));
        }
        state.selected = Some(root.to_path_buf());
        state.record(SessionEventKind::Select, root);

        debug!(snapshot = %root.display(), "omc {}", args.join(" "));
        let out = self.runner.run(&self.omc_path, args, None).await;
        state.record(SessionEventKind::Read, root);
        out
    }

    /// Snapshot selected by the last successful select
    pub async fn selected(&self) -> Option<PathBuf> {
        self.state.lock().await.selected.clone()
    }

    pub async fn history(&self) -> Vec<SessionEvent> {
        self.state.lock().await.history.iter().cloned().collect()
    }
}

/// stdout and noise-filtered stderr together, as omc prints both
pub fn combined(out: &ExecOutput) -> String {
    let stderr = filter_noise(&out.stderr);
    if stderr.trim().is_empty() {
        return out.stdout.clone();
    }
    if out.stdout.is_empty() || out.stdout.ends_with('\n') {
        format!("{}{}", out.stdout, stderr)
    } else {
        format!("{}\n{}", out.stdout, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake::FakeProcessRunner;

    #[tokio::test]
    async fn test_select_precedes_read() {
        let runner =
            Arc::new(FakeProcessRunner::new().respond(&["get"], ExecOutput::ok("pod-a\n")));
        let session = OmcSession::new(runner.clone(), "omc");

        let out = session
            .select_then_read(Path::new("/data/mg"), &["get".to_string(), "pods".to_string()])
            .await
            .unwrap();
        assert_eq!(out.stdout, "pod-a\n");

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec!["use", "/data/mg"]);
        assert_eq!(calls[1].args, vec!["get", "pods"]);
        assert_eq!(session.selected().await, Some(PathBuf::from("/data/mg")));

        let kinds: Vec<SessionEventKind> = session.history().await.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SessionEventKind::Select, SessionEventKind::Read]);
    }

    #[tokio::test]
    async fn test_failed_select_skips_read() {
        let failing = ExecOutput::failed(1, "bad path");
        let runner = Arc::new(FakeProcessRunner::new().respond(&["use"], failing));
        let session = OmcSession::new(runner.clone(), "omc");

        let err = session
            .select_then_read(Path::new("/data/mg"), &["get".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, DiagError::ExecutionFailure { .. }));
        assert_eq!(runner.call_count(), 1);
        assert!(session.history().await.is_empty());
        assert_eq!(session.selected().await, None);
    }

    #[tokio::test]
    async fn test_missing_omc() {
        let runner = Arc::new(FakeProcessRunner::new().without_program("omc"));
        let session = OmcSession::new(runner, "omc");
        let err = session
            .select_then_read(Path::new("/data/mg"), &["get".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, DiagError::UnavailableTool(_)));
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(
            combined(&ExecOutput::ok("a\n").with_stderr("No resources found\n")),
            "a\nNo resources found\n"
        );
        assert_eq!(combined(&ExecOutput::ok("a").with_stderr("warning: stale\n")), "a");
    }
}
