//! Fake executors for deterministic testing.
//!
//! Both fakes record every call so tests can assert on exactly what would
//! have reached the cluster or the local machine, and both can be scripted.
//!
//! ```rust,ignore
//! let fake = Arc::new(FakeClusterExecutor::new().with_output(ExecOutput::ok("eth0\n")));
//! let runner = CommandRunner::new(fake.clone(), LifecycleSettings::default());
//! // ... run something ...
//! assert_eq!(fake.delete_count(), 1);
//! ```

use super::{ClusterExecutor, ExecOutput, HostHandle, PodPhase, ProcessRunner};
use crate::debug_pod::DebugPodSpec;
use async_trait::async_trait;
use ovnk_common::target::PodTarget;
use ovnk_common::{DiagError, DiagResult};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded cluster call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Create { node: String, image: String },
    Phase(String),
    Exec { pod: String, argv: Vec<String> },
    Delete(String),
    ExecInPod { pod: String, namespace: String, argv: Vec<String> },
}

/// Spy cluster executor with scripted phases and outputs
pub struct FakeClusterExecutor {
    calls: Mutex<Vec<ExecutorCall>>,
    specs: Mutex<Vec<DebugPodSpec>>,
    phases: Mutex<VecDeque<PodPhase>>,
    /// Phase reported once the script is exhausted
    settled_phase: PodPhase,
    outputs: Mutex<VecDeque<ExecOutput>>,
    exec_delay: Duration,
    fail_delete: bool,
    next_id: AtomicUsize,
}

impl FakeClusterExecutor {
    /// Pods become Running immediately; commands succeed with empty output
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            specs: Mutex::new(Vec::new()),
            phases: Mutex::new(VecDeque::new()),
            settled_phase: PodPhase::Running,
            outputs: Mutex::new(VecDeque::new()),
            exec_delay: Duration::ZERO,
            fail_delete: false,
            next_id: AtomicUsize::new(0),
        }
    }

    /// Phases reported by successive `host_phase` calls
    pub fn with_phases(self, phases: impl IntoIterator<Item = PodPhase>) -> Self {
        *self.phases.lock().unwrap_or_else(|e| e.into_inner()) = phases.into_iter().collect();
        self
    }

    /// Pods stay Pending forever
    pub fn never_running(mut self) -> Self {
        self.settled_phase = PodPhase::Pending;
        self
    }

    /// Queue the result of the next `exec` or `exec_in_pod`
    pub fn with_output(self, output: ExecOutput) -> Self {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(output);
        self
    }

    /// Make every exec take this long
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn created_specs(&self) -> Vec<DebugPodSpec> {
        self.specs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn delete_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ExecutorCall::Delete(_)))
            .count()
    }

    /// Every argv that was executed, in order
    pub fn executed(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ExecutorCall::Exec { argv, .. } | ExecutorCall::ExecInPod { argv, .. } => {
                    Some(argv)
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ExecutorCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    /// Sleep out the scripted delay, or only `window` of it; a closed window
    /// hands back the scripted output as what was captured so far
    async fn respond(&self, window: Option<Duration>) -> ExecOutput {
        match window {
            Some(window) if self.exec_delay > window => {
                tokio::time::sleep(window).await;
                let out = self.next_output();
                ExecOutput::window_closed(out.stdout, out.stderr)
            }
            _ => {
                if !self.exec_delay.is_zero() {
                    tokio::time::sleep(self.exec_delay).await;
                }
                self.next_output()
            }
        }
    }

    fn next_output(&self) -> ExecOutput {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| ExecOutput::ok(""))
    }
}

impl Default for FakeClusterExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterExecutor for FakeClusterExecutor {
    async fn create_ephemeral_host(&self, spec: &DebugPodSpec) -> DiagResult<HostHandle> {
        self.record(ExecutorCall::Create {
            node: spec.node.clone(),
            image: spec.image.clone(),
        });
        self.specs.lock().unwrap_or_else(|e| e.into_inner()).push(spec.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(HostHandle {
            name: format!("{}{:05}", spec.generate_name(), id),
            namespace: spec.namespace.clone(),
            node: spec.node.clone(),
        })
    }

    async fn host_phase(&self, host: &HostHandle) -> DiagResult<PodPhase> {
        self.record(ExecutorCall::Phase(host.name.clone()));
        let scripted = self.phases.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        Ok(scripted.unwrap_or(self.settled_phase))
    }

    async fn exec(&self, host: &HostHandle, argv: &[String]) -> DiagResult<ExecOutput> {
        self.record(ExecutorCall::Exec {
            pod: host.name.clone(),
            argv: argv.to_vec(),
        });
        Ok(self.respond(None).await)
    }

    async fn exec_for(
        &self,
        host: &HostHandle,
        argv: &[String],
        window: Duration,
    ) -> DiagResult<ExecOutput> {
        self.record(ExecutorCall::Exec {
            pod: host.name.clone(),
            argv: argv.to_vec(),
        });
        Ok(self.respond(Some(window)).await)
    }

    async fn delete(&self, host: &HostHandle) -> DiagResult<()> {
        self.record(ExecutorCall::Delete(host.name.clone()));
        if self.fail_delete {
            return Err(DiagError::execution(
                "kubectl delete pod failed",
                "connection refused",
                Some(1),
            ));
        }
        Ok(())
    }

    async fn exec_in_pod(&self, pod: &PodTarget, argv: &[String]) -> DiagResult<ExecOutput> {
        self.record(ExecutorCall::ExecInPod {
            pod: pod.name.clone(),
            namespace: pod.namespace.clone(),
            argv: argv.to_vec(),
        });
        Ok(self.respond(None).await)
    }

    async fn exec_in_pod_for(
        &self,
        pod: &PodTarget,
        argv: &[String],
        window: Duration,
    ) -> DiagResult<ExecOutput> {
        self.record(ExecutorCall::ExecInPod {
            pod: pod.name.clone(),
            namespace: pod.namespace.clone(),
            argv: argv.to_vec(),
        });
        Ok(self.respond(Some(window)).await)
    }
}

/// One recorded local process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCall {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// Local runner answering from a table of argument prefixes
pub struct FakeProcessRunner {
    calls: Mutex<Vec<ProcessCall>>,
    responses: Mutex<Vec<(Vec<String>, ExecOutput)>>,
    fallback: ExecOutput,
    delay: Duration,
    missing: Option<String>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            fallback: ExecOutput::ok(""),
            delay: Duration::ZERO,
            missing: None,
        }
    }

    /// Answer calls whose arguments start with `prefix`; first match wins
    pub fn respond(self, prefix: &[&str], output: ExecOutput) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((prefix.iter().map(|s| s.to_string()).collect(), output));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Pretend `program` is not installed
    pub fn without_program(mut self, program: &str) -> Self {
        self.missing = Some(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ProcessCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for FakeProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for FakeProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> DiagResult<ExecOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ProcessCall {
                program: program.to_string(),
                args: args.to_vec(),
                cwd: cwd.map(Path::to_path_buf),
            });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.missing.as_deref() == Some(program) {
            return Err(DiagError::UnavailableTool(format!(
                "{} is not installed or not in PATH",
                program
            )));
        }

        let responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        let output = responses
            .iter()
            .find(|(prefix, _)| args.starts_with(prefix))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| self.fallback.clone());
        Ok(output)
    }
}
