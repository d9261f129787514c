//! Executor seams.
//!
//! Everything that leaves the process goes through one of two traits:
//! [`ClusterExecutor`] for the cluster API and [`ProcessRunner`] for local
//! archive tools. Production code uses [`KubectlExecutor`] and
//! [`LocalProcessRunner`]; tests use the fakes in [`fake`].

pub mod fake;
pub mod kubectl;
pub mod process;

use crate::debug_pod::DebugPodSpec;
use async_trait::async_trait;
use ovnk_common::target::PodTarget;
use ovnk_common::{DiagError, DiagResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub use kubectl::KubectlExecutor;
pub use process::LocalProcessRunner;

/// Pod phase as reported by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// The pod will never reach Running from here
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Identity of a created debug pod
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostHandle {
    pub name: String,
    pub namespace: String,
    pub node: String,
}

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Stopped when its time window closed; stdout holds what came before
    pub cut_short: bool,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// Output of a command stopped at the end of its window
    pub fn window_closed(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: None,
            cut_short: true,
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Cluster API as seen by the daemon
#[async_trait]
pub trait ClusterExecutor: Send + Sync {
    /// Create a debug pod; returns once the API accepted it
    async fn create_ephemeral_host(&self, spec: &DebugPodSpec) -> DiagResult<HostHandle>;

    async fn host_phase(&self, host: &HostHandle) -> DiagResult<PodPhase>;

    /// Poll the phase until Running, bounded by `timeout`
    async fn await_running(
        &self,
        host: &HostHandle,
        poll: Duration,
        timeout: Duration,
    ) -> DiagResult<()> {
        let wait = async {
            loop {
                let phase = self.host_phase(host).await?;
                debug!(pod = %host.name, %phase, "Debug pod phase");
                if phase == PodPhase::Running {
                    return Ok(());
                }
                if phase.is_terminal() {
                    return Err(DiagError::execution(
                        format!("debug pod {} ended in phase {} before running", host.name, phase),
                        "",
                        None,
                    ));
                }
                tokio::time::sleep(poll).await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(DiagError::ProvisioningTimeout {
                pod: host.name.clone(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Run one command in the debug container
    async fn exec(&self, host: &HostHandle, argv: &[String]) -> DiagResult<ExecOutput>;

    /// Run one command in the debug container for at most `window`.
    ///
    /// This version can only give up on the exec, so nothing captured
    /// survives; executors that stream output keep what arrived in time.
    async fn exec_for(
        &self,
        host: &HostHandle,
        argv: &[String],
        window: Duration,
    ) -> DiagResult<ExecOutput> {
        match tokio::time::timeout(window, self.exec(host, argv)).await {
            Ok(result) => result,
            Err(_) => Ok(ExecOutput::window_closed("", "")),
        }
    }

    async fn delete(&self, host: &HostHandle) -> DiagResult<()>;

    /// Run one command in an existing pod
    async fn exec_in_pod(&self, pod: &PodTarget, argv: &[String]) -> DiagResult<ExecOutput>;

    /// [`ClusterExecutor::exec_for`] against an existing pod
    async fn exec_in_pod_for(
        &self,
        pod: &PodTarget,
        argv: &[String],
        window: Duration,
    ) -> DiagResult<ExecOutput> {
        match tokio::time::timeout(window, self.exec_in_pod(pod, argv)).await {
            Ok(result) => result,
            Err(_) => Ok(ExecOutput::window_closed("", "")),
        }
    }
}

/// Local process execution, for tools run against an unpacked archive
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> DiagResult<ExecOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parsing() {
        assert_eq!(PodPhase::parse("Running\n"), PodPhase::Running);
        assert_eq!(PodPhase::parse(""), PodPhase::Unknown);
        assert!(PodPhase::parse("Failed").is_terminal());
        assert!(!PodPhase::parse("Pending").is_terminal());
    }

    #[test]
    fn test_exec_output_success() {
        assert!(ExecOutput::ok("x").success());
        assert!(!ExecOutput::failed(1, "boom").success());
        assert!(!ExecOutput::default().success());
        assert!(!ExecOutput::window_closed("packet 1\n", "").success());
    }
}
