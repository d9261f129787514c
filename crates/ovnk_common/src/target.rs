//! Execution targets.
//!
//! Callers describe where a command should run with a flat set of optional
//! fields. Resolution checks that exactly one kind of target is described
//! and that its required companions are present, before anything touches the
//! cluster or the filesystem.

use crate::allow_list;
use crate::error::{DiagError, DiagResult};
use crate::validate::{self, AllowList};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_HOST_PATH: &str = "/";
pub const DEFAULT_MOUNT_PATH: &str = "/host";

allow_list! {
    pub enum TargetKind {
        Node => "node",
        Pod => "pod",
        LocalArchive => "local-archive",
    }
}

/// Target fields as they arrive from the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetParams {
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_image: Option<String>,
    #[serde(default)]
    pub host_path: Option<String>,
    #[serde(default)]
    pub mount_path: Option<String>,
    #[serde(default)]
    pub pod_name: Option<String>,
    #[serde(default)]
    pub pod_namespace: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub archive_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTarget {
    pub name: String,
    pub image: String,
    pub host_path: String,
    pub mount_path: String,
}

impl NodeTarget {
    /// Argv that runs `argv` inside the mounted host root
    pub fn chroot_argv(&self, argv: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(argv.len() + 2);
        full.push("chroot".to_string());
        full.push(self.mount_path.clone());
        full.extend(argv.iter().cloned());
        full
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTarget {
    pub name: String,
    pub namespace: String,
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// Provision a debug pod on the node and run there
    Node(NodeTarget),
    /// Exec into an existing pod container
    Pod(PodTarget),
    /// Run a local tool against an unpacked support archive
    LocalArchive(ArchiveTarget),
}

impl ExecutionTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            ExecutionTarget::Node(_) => TargetKind::Node,
            ExecutionTarget::Pod(_) => TargetKind::Pod,
            ExecutionTarget::LocalArchive(_) => TargetKind::LocalArchive,
        }
    }

    /// Archive target from an already validated root
    pub fn local_archive(root: impl Into<PathBuf>) -> Self {
        ExecutionTarget::LocalArchive(ArchiveTarget { root: root.into() })
    }
}

impl TargetParams {
    pub fn node(name: &str, image: &str) -> Self {
        Self {
            target_type: Some(TargetKind::Node.as_str().to_string()),
            node_name: Some(name.to_string()),
            node_image: Some(image.to_string()),
            ..Self::default()
        }
    }

    pub fn pod(name: &str, namespace: Option<&str>, container: Option<&str>) -> Self {
        Self {
            target_type: Some(TargetKind::Pod.as_str().to_string()),
            pod_name: Some(name.to_string()),
            pod_namespace: namespace.map(str::to_string),
            container_name: container.map(str::to_string),
            ..Self::default()
        }
    }

    /// Resolve to exactly one target variant.
    ///
    /// `default_image` fills in `node_image` for tools that ship their own
    /// debug image.
    pub fn resolve(&self, default_image: Option<&str>) -> DiagResult<ExecutionTarget> {
        let raw_kind = validate::non_blank(self.target_type.as_deref()).ok_or_else(|| {
            DiagError::InvalidTarget("target_type is required (node or pod)".into())
        })?;
        let kind = TargetKind::parse_field("target_type", raw_kind).map_err(|_| {
            DiagError::InvalidTarget(format!(
                "invalid target_type: {} (must be 'node', 'pod' or 'local-archive')",
                raw_kind
            ))
        })?;

        match kind {
            TargetKind::Node => self.resolve_node(default_image),
            TargetKind::Pod => self.resolve_pod(),
            TargetKind::LocalArchive => self.resolve_archive(),
        }
    }

    fn reject_present(
        &self,
        kind: TargetKind,
        fields: &[(&str, &Option<String>)],
    ) -> DiagResult<()> {
        for (name, value) in fields {
            if validate::non_blank(value.as_deref()).is_some() {
                return Err(DiagError::InvalidTarget(format!(
                    "{} cannot be used when target_type is '{}'",
                    name, kind
                )));
            }
        }
        Ok(())
    }

    fn resolve_node(&self, default_image: Option<&str>) -> DiagResult<ExecutionTarget> {
        self.reject_present(
            TargetKind::Node,
            &[
                ("pod_name", &self.pod_name),
                ("pod_namespace", &self.pod_namespace),
                ("container_name", &self.container_name),
                ("archive_path", &self.archive_path),
            ],
        )?;

        let name = validate::non_blank(self.node_name.as_deref()).ok_or_else(|| {
            DiagError::InvalidTarget("node_name is required when target_type is 'node'".into())
        })?;
        validate::kubernetes_name("node_name", name)?;

        let image = validate::non_blank(self.node_image.as_deref())
            .or(default_image)
            .ok_or_else(|| {
                DiagError::InvalidTarget("node_image is required when target_type is 'node'".into())
            })?;
        validate::image_reference("node_image", image)?;

        let host_path = validate::non_blank(self.host_path.as_deref()).unwrap_or(DEFAULT_HOST_PATH);
        validate::absolute_path("host_path", host_path)?;
        let mount_path =
            validate::non_blank(self.mount_path.as_deref()).unwrap_or(DEFAULT_MOUNT_PATH);
        validate::absolute_path("mount_path", mount_path)?;
        if mount_path == "/" {
            return Err(DiagError::invalid_input(
                "mount_path",
                "cannot mount over the container root",
            ));
        }

        Ok(ExecutionTarget::Node(NodeTarget {
            name: name.to_string(),
            image: image.to_string(),
            host_path: host_path.to_string(),
            mount_path: mount_path.to_string(),
        }))
    }

    fn resolve_pod(&self) -> DiagResult<ExecutionTarget> {
        self.reject_present(
            TargetKind::Pod,
            &[
                ("node_name", &self.node_name),
                ("node_image", &self.node_image),
                ("host_path", &self.host_path),
                ("mount_path", &self.mount_path),
                ("archive_path", &self.archive_path),
            ],
        )?;

        let name = validate::non_blank(self.pod_name.as_deref()).ok_or_else(|| {
            DiagError::InvalidTarget("pod_name is required when target_type is 'pod'".into())
        })?;
        validate::kubernetes_name("pod_name", name)?;

        let namespace =
            validate::non_blank(self.pod_namespace.as_deref()).unwrap_or(DEFAULT_NAMESPACE);
        validate::kubernetes_name("pod_namespace", namespace)?;

        let container = validate::non_blank(self.container_name.as_deref());
        if let Some(container) = container {
            validate::kubernetes_name("container_name", container)?;
        }

        Ok(ExecutionTarget::Pod(PodTarget {
            name: name.to_string(),
            namespace: namespace.to_string(),
            container: container.map(str::to_string),
        }))
    }

    fn resolve_archive(&self) -> DiagResult<ExecutionTarget> {
        self.reject_present(
            TargetKind::LocalArchive,
            &[
                ("node_name", &self.node_name),
                ("node_image", &self.node_image),
                ("host_path", &self.host_path),
                ("mount_path", &self.mount_path),
                ("pod_name", &self.pod_name),
                ("pod_namespace", &self.pod_namespace),
                ("container_name", &self.container_name),
            ],
        )?;

        let root = validate::non_blank(self.archive_path.as_deref()).ok_or_else(|| {
            DiagError::InvalidTarget(
                "archive_path is required when target_type is 'local-archive'".into(),
            )
        })?;
        validate::absolute_path("archive_path", root)?;

        Ok(ExecutionTarget::local_archive(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_defaults() {
        let target = TargetParams::node("worker-1", "nicolaka/netshoot:v0.13")
            .resolve(None)
            .unwrap();
        match target {
            ExecutionTarget::Node(node) => {
                assert_eq!(node.host_path, "/");
                assert_eq!(node.mount_path, "/host");
                assert_eq!(
                    node.chroot_argv(&["ip".to_string(), "link".to_string()]),
                    vec!["chroot", "/host", "ip", "link"]
                );
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_node_requires_name_and_image() {
        let mut params = TargetParams::node("worker-1", "");
        params.node_image = None;
        assert!(matches!(params.resolve(None), Err(DiagError::InvalidTarget(_))));
        assert!(params.resolve(Some("busybox:1.36")).is_ok());

        params.node_name = None;
        assert!(matches!(params.resolve(Some("busybox")), Err(DiagError::InvalidTarget(_))));
    }

    #[test]
    fn test_pod_namespace_defaults() {
        let target = TargetParams::pod("client", None, None).resolve(None).unwrap();
        assert_eq!(
            target,
            ExecutionTarget::Pod(PodTarget {
                name: "client".into(),
                namespace: "default".into(),
                container: None,
            })
        );
    }

    #[test]
    fn test_cross_variant_fields_rejected() {
        let mut params = TargetParams::pod("client", None, None);
        params.node_name = Some("worker-1".into());
        assert!(matches!(params.resolve(None), Err(DiagError::InvalidTarget(_))));

        let mut params = TargetParams::node("worker-1", "busybox");
        params.container_name = Some("c".into());
        assert!(matches!(params.resolve(None), Err(DiagError::InvalidTarget(_))));
    }

    #[test]
    fn test_unknown_or_missing_kind() {
        let params = TargetParams {
            target_type: Some("vm".into()),
            ..TargetParams::default()
        };
        assert!(matches!(params.resolve(None), Err(DiagError::InvalidTarget(_))));
        assert!(matches!(TargetParams::default().resolve(None), Err(DiagError::InvalidTarget(_))));
    }

    #[test]
    fn test_unsafe_paths_rejected() {
        let mut params = TargetParams::node("worker-1", "busybox");
        params.host_path = Some("/etc/../".into());
        assert!(params.resolve(None).unwrap_err().is_invalid_input());

        let params = TargetParams {
            target_type: Some("local-archive".into()),
            archive_path: Some("relative/bundle".into()),
            ..TargetParams::default()
        };
        assert!(params.resolve(None).unwrap_err().is_invalid_input());
    }
}
