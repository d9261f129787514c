//! Debug pod lifecycle.
//!
//! A debug pod is created per request, observed until Running, used for
//! exactly one command and then deleted. Deletion is owned by a guard: the
//! normal path releases it explicitly, and if the request future is dropped
//! (cancellation) or unwinds, the guard schedules the delete on the runtime
//! instead. Teardowns run under their own grace period and are tracked so the
//! daemon can wait for them on shutdown.

use crate::config::ClusterConfig;
use crate::executor::{ClusterExecutor, ExecOutput, HostHandle};
use ovnk_common::target::NodeTarget;
use ovnk_common::DiagResult;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const DEBUG_CONTAINER: &str = "debug-container";
const HOST_VOLUME: &str = "host";

/// Everything needed to create one debug pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugPodSpec {
    pub node: String,
    pub namespace: String,
    pub image: String,
    pub host_path: String,
    pub mount_path: String,
}

impl DebugPodSpec {
    pub fn for_node(target: &NodeTarget, namespace: &str) -> Self {
        Self {
            node: target.name.clone(),
            namespace: namespace.to_string(),
            image: target.image.clone(),
            host_path: target.host_path.clone(),
            mount_path: target.mount_path.clone(),
        }
    }

    /// Prefix the API server completes into a unique name
    pub fn generate_name(&self) -> String {
        format!("debug-node-{}-", self.node)
    }

    /// Pod manifest as submitted to the API server
    pub fn manifest(&self) -> serde_json::Value {
        let mut container = json!({
            "name": DEBUG_CONTAINER,
            "image": self.image,
            "command": ["sleep", "infinity"],
            "securityContext": {
                "privileged": true,
                "runAsUser": 0
            },
            "volumeMounts": [{
                "name": HOST_VOLUME,
                "mountPath": self.mount_path
            }]
        });
        // sos collection inside the pod looks for the host root here
        if self.host_path == "/" {
            container["env"] = json!([{ "name": "HOST", "value": self.mount_path }]);
        }

        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "generateName": self.generate_name(),
                "namespace": self.namespace
            },
            "spec": {
                "nodeName": self.node,
                "restartPolicy": "Never",
                "tolerations": [{ "operator": "Exists" }],
                "hostNetwork": true,
                "hostPID": true,
                "hostIPC": true,
                "volumes": [{
                    "name": HOST_VOLUME,
                    "hostPath": {
                        "path": self.host_path,
                        "type": "Directory"
                    }
                }],
                "containers": [container]
            }
        })
    }
}

/// Timing bounds for one debug pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
    pub teardown_grace: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&ClusterConfig::default())
    }
}

impl From<&ClusterConfig> for LifecycleSettings {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            ready_timeout: config.ready_timeout(),
            teardown_grace: config.teardown_grace(),
        }
    }
}

type PendingTeardowns = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Creates, runs in and tears down debug pods
pub struct DebugPodManager {
    executor: Arc<dyn ClusterExecutor>,
    settings: LifecycleSettings,
    pending: PendingTeardowns,
}

impl DebugPodManager {
    pub fn new(executor: Arc<dyn ClusterExecutor>, settings: LifecycleSettings) -> Self {
        Self {
            executor,
            settings,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Run `argv` in a fresh debug pod; the pod is deleted on every path
    pub async fn run(&self, spec: &DebugPodSpec, argv: &[String]) -> DiagResult<ExecOutput> {
        self.run_for(spec, argv, None).await
    }

    /// [`DebugPodManager::run`] with the exec stopped after `window` once the
    /// pod is Running. Provisioning time does not count against the window.
    pub async fn run_for(
        &self,
        spec: &DebugPodSpec,
        argv: &[String],
        window: Option<Duration>,
    ) -> DiagResult<ExecOutput> {
        let host = self.executor.create_ephemeral_host(spec).await?;
        let guard = PodGuard {
            host: Some(host.clone()),
            executor: Arc::clone(&self.executor),
            grace: self.settings.teardown_grace,
            pending: Arc::clone(&self.pending),
        };

        let result = self.run_in(&host, argv, window).await;
        guard.release().await;
        result
    }

    async fn run_in(
        &self,
        host: &HostHandle,
        argv: &[String],
        window: Option<Duration>,
    ) -> DiagResult<ExecOutput> {
        self.executor
            .await_running(host, self.settings.poll_interval, self.settings.ready_timeout)
            .await?;
        match window {
            Some(window) => self.executor.exec_for(host, argv, window).await,
            None => self.executor.exec(host, argv).await,
        }
    }

    /// Teardowns scheduled but not yet finished
    pub fn pending_teardowns(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|task| !task.is_finished());
        pending.len()
    }

    /// Wait for every scheduled teardown
    pub async fn drain_teardowns(&self) {
        loop {
            let tasks: Vec<JoinHandle<()>> =
                std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
            if tasks.is_empty() {
                return;
            }
            info!("Waiting for {} debug pod teardown(s)", tasks.len());
            for task in tasks {
                if let Err(e) = task.await {
                    error!("Teardown task failed: {}", e);
                }
            }
        }
    }
}

/// Owns the deletion of one debug pod
struct PodGuard {
    host: Option<HostHandle>,
    executor: Arc<dyn ClusterExecutor>,
    grace: Duration,
    pending: PendingTeardowns,
}

impl PodGuard {
    /// Delete the pod and wait for it; the delete survives if this future is dropped
    async fn release(mut self) {
        if let Some(host) = self.host.take() {
            if let Some(done) = self.schedule(host) {
                let _ = done.await;
            }
        }
    }

    fn schedule(&self, host: HostHandle) -> Option<oneshot::Receiver<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!(
                    pod = %host.name,
                    node = %host.node,
                    "No runtime to delete debug pod, it is leaked"
                );
                return None;
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        let executor = Arc::clone(&self.executor);
        let grace = self.grace;
        let task = runtime.spawn(async move {
            teardown(executor, host, grace).await;
            let _ = done_tx.send(());
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|task| !task.is_finished());
        pending.push(task);
        Some(done_rx)
    }
}

impl Drop for PodGuard {
    fn drop(&mut self) {
        if let Some(host) = self.host.take() {
            warn!(
                pod = %host.name,
                node = %host.node,
                "Request abandoned, scheduling debug pod teardown"
            );
            let _ = self.schedule(host);
        }
    }
}

async fn teardown(executor: Arc<dyn ClusterExecutor>, host: HostHandle, grace: Duration) {
    match tokio::time::timeout(grace, executor.delete(&host)).await {
        Ok(Ok(())) => info!(pod = %host.name, node = %host.node, "Deleted debug pod"),
        Ok(Err(e)) => {
            warn!(pod = %host.name, node = %host.node, "Failed to delete debug pod: {}", e)
        }
        Err(_) => warn!(
            pod = %host.name,
            node = %host.node,
            "Timed out after {}s deleting debug pod",
            grace.as_secs()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake::FakeClusterExecutor;
    use crate::executor::PodPhase;
    use ovnk_common::DiagError;

    fn spec(host_path: &str) -> DebugPodSpec {
        DebugPodSpec {
            node: "worker-1".into(),
            namespace: "default".into(),
            image: "nicolaka/netshoot:v0.13".into(),
            host_path: host_path.into(),
            mount_path: "/host".into(),
        }
    }

    fn fast() -> LifecycleSettings {
        LifecycleSettings {
            poll_interval: Duration::from_millis(5),
            ready_timeout: Duration::from_millis(100),
            teardown_grace: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_manifest_shape() {
        let manifest = spec("/").manifest();
        assert_eq!(manifest["metadata"]["generateName"], "debug-node-worker-1-");
        assert_eq!(manifest["spec"]["nodeName"], "worker-1");
        assert_eq!(manifest["spec"]["restartPolicy"], "Never");
        assert_eq!(manifest["spec"]["hostPID"], true);
        assert_eq!(manifest["spec"]["tolerations"][0]["operator"], "Exists");
        assert_eq!(manifest["spec"]["volumes"][0]["hostPath"]["type"], "Directory");

        let container = &manifest["spec"]["containers"][0];
        assert_eq!(container["name"], "debug-container");
        assert_eq!(container["command"], json!(["sleep", "infinity"]));
        assert_eq!(container["securityContext"]["privileged"], true);
        assert_eq!(container["env"][0]["value"], "/host");

        let manifest = spec("/sys/kernel/debug").manifest();
        assert!(manifest["spec"]["containers"][0].get("env").is_none());
    }

    #[tokio::test]
    async fn test_run_deletes_after_success() {
        let fake = Arc::new(
            FakeClusterExecutor::new()
                .with_phases([PodPhase::Pending, PodPhase::Running])
                .with_output(ExecOutput::ok("eth0\n")),
        );
        let manager = DebugPodManager::new(fake.clone(), fast());

        let argv = ["ip".to_string(), "link".to_string()];
        let out = manager.run(&spec("/"), &argv).await.unwrap();
        assert_eq!(out.stdout, "eth0\n");
        assert_eq!(fake.delete_count(), 1);
        assert_eq!(manager.pending_teardowns(), 0);
    }

    #[tokio::test]
    async fn test_terminal_phase_fails_early() {
        let fake = Arc::new(FakeClusterExecutor::new().with_phases([PodPhase::Failed]));
        let manager = DebugPodManager::new(fake.clone(), fast());

        let err = manager.run(&spec("/"), &["true".to_string()]).await.unwrap_err();
        assert!(matches!(err, DiagError::ExecutionFailure { .. }));
        assert!(fake.executed().is_empty());
        assert_eq!(fake.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_override_result() {
        let fake = Arc::new(
            FakeClusterExecutor::new()
                .failing_delete()
                .with_output(ExecOutput::ok("ok")),
        );
        let manager = DebugPodManager::new(fake.clone(), fast());
        let out = manager.run(&spec("/"), &["true".to_string()]).await.unwrap();
        assert_eq!(out.stdout, "ok");
        assert_eq!(fake.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_window_starts_once_running() {
        let fake = Arc::new(
            FakeClusterExecutor::new()
                .with_phases([PodPhase::Pending, PodPhase::Pending, PodPhase::Running])
                .with_exec_delay(Duration::from_secs(60))
                .with_output(ExecOutput::ok("packet 1\n")),
        );
        let manager = DebugPodManager::new(fake.clone(), fast());

        let window = Some(Duration::from_millis(50));
        let out = manager.run_for(&spec("/"), &["tcpdump".to_string()], window).await.unwrap();
        assert!(out.cut_short);
        assert_eq!(out.stdout, "packet 1\n");
        assert_eq!(fake.executed().len(), 1);
        assert_eq!(fake.delete_count(), 1);
    }
}
