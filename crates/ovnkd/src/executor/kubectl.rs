//! ClusterExecutor backed by the kubectl binary.

use super::process::{run_command, run_command_for};
use super::{ClusterExecutor, ExecOutput, HostHandle, PodPhase};
use crate::config::ClusterConfig;
use crate::debug_pod::{DebugPodSpec, DEBUG_CONTAINER};
use async_trait::async_trait;
use ovnk_common::output::filter_noise;
use ovnk_common::target::PodTarget;
use ovnk_common::{DiagError, DiagResult};
use std::time::Duration;
use tracing::info;

pub struct KubectlExecutor {
    kubectl: String,
    kubeconfig: Option<String>,
}

impl KubectlExecutor {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            kubectl: config.kubectl_path.clone(),
            kubeconfig: config.kubeconfig.clone(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        match &self.kubeconfig {
            Some(path) => vec!["--kubeconfig".to_string(), path.clone()],
            None => Vec::new(),
        }
    }

    /// Argv (without the kubectl binary) for a command in a container
    pub fn exec_args(
        &self,
        pod: &str,
        namespace: &str,
        container: Option<&str>,
        argv: &[String],
    ) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "exec".to_string(),
            pod.to_string(),
            "-n".to_string(),
            namespace.to_string(),
        ]);
        if let Some(container) = container {
            args.extend(["-c".to_string(), container.to_string()]);
        }
        args.push("--".to_string());
        args.extend(argv.iter().cloned());
        args
    }

    async fn kubectl(&self, args: Vec<String>, stdin: Option<&[u8]>) -> DiagResult<ExecOutput> {
        run_command(&self.kubectl, &args, stdin, None).await
    }

    fn failure(action: &str, out: &ExecOutput) -> DiagError {
        DiagError::execution(
            format!("kubectl {} failed", action),
            filter_noise(out.stderr.trim()),
            out.exit_code,
        )
    }
}

#[async_trait]
impl ClusterExecutor for KubectlExecutor {
    async fn create_ephemeral_host(&self, spec: &DebugPodSpec) -> DiagResult<HostHandle> {
        let manifest = serde_json::to_vec(&spec.manifest()).map_err(|e| {
            DiagError::execution(format!("failed to encode debug pod manifest: {}", e), "", None)
        })?;

        let mut args = self.base_args();
        args.extend(
            ["create", "-f", "-", "-o", "jsonpath={.metadata.name}"]
                .iter()
                .map(|s| s.to_string()),
        );
        let out = self.kubectl(args, Some(&manifest)).await?;
        if !out.success() {
            return Err(Self::failure("create", &out));
        }

        let name = out.stdout.trim().to_string();
        if name.is_empty() {
            return Err(DiagError::execution(
                "kubectl create returned no pod name",
                "",
                out.exit_code,
            ));
        }
        info!(pod = %name, node = %spec.node, "Created debug pod");
        Ok(HostHandle {
            name,
            namespace: spec.namespace.clone(),
            node: spec.node.clone(),
        })
    }

    async fn host_phase(&self, host: &HostHandle) -> DiagResult<PodPhase> {
        let mut args = self.base_args();
        args.extend([
            "get".to_string(),
            "pod".to_string(),
            host.name.clone(),
            "-n".to_string(),
            host.namespace.clone(),
            "-o".to_string(),
            "jsonpath={.status.phase}".to_string(),
        ]);
        let out = self.kubectl(args, None).await?;
        if !out.success() {
            return Err(Self::failure("get pod", &out));
        }
        Ok(PodPhase::parse(&out.stdout))
    }

    async fn exec(&self, host: &HostHandle, argv: &[String]) -> DiagResult<ExecOutput> {
        let args = self.exec_args(&host.name, &host.namespace, Some(DEBUG_CONTAINER), argv);
        self.kubectl(args, None).await
    }

    async fn exec_for(
        &self,
        host: &HostHandle,
        argv: &[String],
        window: Duration,
    ) -> DiagResult<ExecOutput> {
        let args = self.exec_args(&host.name, &host.namespace, Some(DEBUG_CONTAINER), argv);
        run_command_for(&self.kubectl, &args, window).await
    }

    async fn delete(&self, host: &HostHandle) -> DiagResult<()> {
        let mut args = self.base_args();
        args.extend([
            "delete".to_string(),
            "pod".to_string(),
            host.name.clone(),
            "-n".to_string(),
            host.namespace.clone(),
            "--ignore-not-found".to_string(),
            "--wait=false".to_string(),
        ]);
        let out = self.kubectl(args, None).await?;
        if !out.success() {
            return Err(Self::failure("delete pod", &out));
        }
        Ok(())
    }

    async fn exec_in_pod(&self, pod: &PodTarget, argv: &[String]) -> DiagResult<ExecOutput> {
        let args = self.exec_args(&pod.name, &pod.namespace, pod.container.as_deref(), argv);
        self.kubectl(args, None).await
    }

    async fn exec_in_pod_for(
        &self,
        pod: &PodTarget,
        argv: &[String],
        window: Duration,
    ) -> DiagResult<ExecOutput> {
        let args = self.exec_args(&pod.name, &pod.namespace, pod.container.as_deref(), argv);
        run_command_for(&self.kubectl, &args, window).await
    }
}
