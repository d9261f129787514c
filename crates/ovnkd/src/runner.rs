//! Run a built command on a resolved target and turn the raw result into
//! stdout or a classified failure.

use crate::debug_pod::{DebugPodManager, DebugPodSpec, LifecycleSettings};
use crate::executor::{ClusterExecutor, ExecOutput, ProcessRunner};
use ovnk_common::output::filter_noise;
use ovnk_common::{CommandSpec, DiagError, DiagResult, ExecutionTarget};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How a command runs inside a node debug pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    /// `chroot <mountPath> argv`, using the host's binaries
    #[default]
    Chroot,
    /// argv as is, using the debug image's binaries
    InImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub node_mode: NodeMode,
    /// Any stderr left after noise filtering is a failure
    pub strict_stderr: bool,
    /// Stop the command this long after it starts and keep its output
    pub window: Option<Duration>,
}

impl RunOptions {
    pub fn strict() -> Self {
        Self {
            strict_stderr: true,
            ..Self::default()
        }
    }

    pub fn in_image() -> Self {
        Self {
            node_mode: NodeMode::InImage,
            ..Self::default()
        }
    }

    pub fn within(window: Duration) -> Self {
        Self {
            window: Some(window),
            ..Self::default()
        }
    }
}

pub struct CommandRunner {
    executor: Arc<dyn ClusterExecutor>,
    pods: DebugPodManager,
    local: Arc<dyn ProcessRunner>,
    debug_namespace: String,
}

impl CommandRunner {
    pub fn new(
        executor: Arc<dyn ClusterExecutor>,
        local: Arc<dyn ProcessRunner>,
        settings: LifecycleSettings,
        debug_namespace: &str,
    ) -> Self {
        Self {
            pods: DebugPodManager::new(Arc::clone(&executor), settings),
            executor,
            local,
            debug_namespace: debug_namespace.to_string(),
        }
    }

    pub fn pods(&self) -> &DebugPodManager {
        &self.pods
    }

    /// Run and return the raw result
    pub async fn execute(
        &self,
        command: &CommandSpec,
        target: &ExecutionTarget,
        options: RunOptions,
    ) -> DiagResult<ExecOutput> {
        let argv = command.build();
        debug!(target = %target.kind(), "Running {}", command);

        match target {
            ExecutionTarget::Node(node) => {
                let argv = match options.node_mode {
                    NodeMode::Chroot => node.chroot_argv(&argv),
                    NodeMode::InImage => argv,
                };
                let spec = DebugPodSpec::for_node(node, &self.debug_namespace);
                self.pods.run_for(&spec, &argv, options.window).await
            }
            ExecutionTarget::Pod(pod) => match options.window {
                Some(window) => self.executor.exec_in_pod_for(pod, &argv, window).await,
                None => self.executor.exec_in_pod(pod, &argv).await,
            },
            ExecutionTarget::LocalArchive(archive) => {
                self.local
                    .run(command.program(), command.args(), Some(archive.root.as_path()))
                    .await
            }
        }
    }

    /// Run and return stdout, or the classified failure
    pub async fn run(
        &self,
        command: &CommandSpec,
        target: &ExecutionTarget,
        options: RunOptions,
    ) -> DiagResult<String> {
        let out = self.execute(command, target, options).await?;
        finish(command.program(), out, options.strict_stderr)
    }
}

/// The tool binary itself could not be found on the target
pub fn is_missing_tool(out: &ExecOutput) -> bool {
    if out.exit_code == Some(127) {
        return true;
    }
    let stderr = out.stderr.to_lowercase();
    !out.success()
        && (stderr.contains("executable file not found")
            || stderr.contains("command not found")
            || (stderr.contains("failed to run command") && stderr.contains("no such file")))
}

/// Classify a raw result; a command stopped at the end of its window
/// succeeds with whatever it wrote
pub fn finish(program: &str, out: ExecOutput, strict_stderr: bool) -> DiagResult<String> {
    if is_missing_tool(&out) {
        return Err(DiagError::UnavailableTool(format!(
            "{} is not available on the target",
            program
        )));
    }
    if out.cut_short {
        return Ok(out.stdout);
    }

    let stderr = filter_noise(&out.stderr).trim().to_string();
    match out.exit_code {
        Some(0) => {}
        Some(code) => {
            return Err(DiagError::execution(
                format!("{} exited with status {}", program, code),
                stderr,
                Some(code),
            ))
        }
        None => {
            return Err(DiagError::execution(
                format!("{} was terminated by a signal", program),
                stderr,
                None,
            ))
        }
    }

    if strict_stderr && !stderr.is_empty() {
        return Err(DiagError::execution(
            format!("{} reported errors", program),
            stderr,
            Some(0),
        ));
    }
    Ok(out.stdout)
}
