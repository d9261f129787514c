//! Offline archive requests routed through the RPC handler.

use ovnk_common::{RpcMethod, RpcRequest};
use ovnkd::config::{Config, Mode};
use ovnkd::executor::fake::{FakeClusterExecutor, FakeProcessRunner};
use ovnkd::executor::ExecOutput;
use ovnkd::offline::SessionEventKind;
use ovnkd::rpc_handler::{handle_request, session_history, AppState};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

fn app(local: Arc<FakeProcessRunner>) -> AppState {
    let mut config = Config::default();
    config.daemon.mode = Mode::Offline;
    AppState::new(&config, Arc::new(FakeClusterExecutor::new()), local)
}

async fn call(state: &AppState, method: RpcMethod, params: Value) -> Result<Value, Value> {
    let response = handle_request(state, RpcRequest::new(method, Some(params))).await;
    match response.error {
        Some(error) => Err(serde_json::to_value(error).unwrap()),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

fn must_gather() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("must-gather.log"), "collected\n").unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    (dir, path)
}

fn sosreport() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("sos_commands/networking")).unwrap();
    fs::create_dir_all(root.join("sos_reports")).unwrap();
    let manifest = json!({
        "components": {"report": {"plugins": {
            "networking": {"commands": [
                {"exec": "ip -o addr", "filepath": "sos_commands/networking/ip_-o_addr"}
            ]}
        }}}
    });
    fs::write(root.join("sos_reports/manifest.json"), manifest.to_string()).unwrap();
    let lines: String = (1..=30)
        .map(|i| format!("{}: eth{} inet 10.0.0.{}/24\n", i, i, i))
        .collect();
    fs::write(root.join("sos_commands/networking/ip_-o_addr"), lines).unwrap();
    let path = root.to_str().unwrap().to_string();
    (dir, path)
}

#[tokio::test]
async fn test_get_resource_selects_snapshot_first() {
    let (_dir, path) = must_gather();
    let listing = ExecOutput::ok("NAME  READY\nweb-1 1/1\n");
    let local = Arc::new(FakeProcessRunner::new().respond(&["get", "pod"], listing));
    let state = app(local.clone());

    let result = call(
        &state,
        RpcMethod::MustGatherGetResource,
        json!({"must_gather_path": path, "kind": "pod", "name": "web-1", "namespace": "shop"}),
    )
    .await
    .unwrap();
    assert_eq!(result["data"], "NAME  READY\nweb-1 1/1\n");

    let calls = local.calls();
    assert_eq!(calls[0].args, vec!["use".to_string(), path.clone()]);
    assert_eq!(calls[1].args, vec!["get", "pod", "web-1", "-n", "shop"]);

    let history = session_history(&state).await;
    let kinds: Vec<SessionEventKind> = history.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![SessionEventKind::Select, SessionEventKind::Read]);
    assert_eq!(session_history(&state).await[0].snapshot, PathBuf::from(&path));
}

#[tokio::test]
async fn test_missing_resource_and_empty_list() {
    let (_dir, path) = must_gather();
    let nothing = ExecOutput::ok("No resources found in shop namespace.\n");
    let local = Arc::new(FakeProcessRunner::new().respond(&["get"], nothing));
    let state = app(local);

    let err = call(
        &state,
        RpcMethod::MustGatherGetResource,
        json!({"must_gather_path": path, "kind": "pod", "name": "gone", "namespace": "shop"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err["data"]["kind"], "resource_not_found");

    let listed = call(
        &state,
        RpcMethod::MustGatherListResources,
        json!({
            "must_gather_path": path,
            "kind": "pods",
            "namespace": "shop",
            "output_type": "yaml"
        }),
    )
    .await
    .unwrap();
    assert_eq!(listed["data"], "apiVersion: v1\nkind: List\nitems: []");
}

#[tokio::test]
async fn test_pod_logs_tail() {
    let (_dir, path) = must_gather();
    let body: String = (1..=10).map(|i| format!("line {}\n\n", i)).collect();
    let local = Arc::new(FakeProcessRunner::new().respond(&["logs"], ExecOutput::ok(body)));
    let state = app(local.clone());

    let result = call(
        &state,
        RpcMethod::MustGatherPodLogs,
        json!({
            "must_gather_path": path,
            "name": "ovnkube-node-abc",
            "namespace": "openshift-ovn-kubernetes",
            "container": "ovnkube-controller",
            "previous": true,
            "tail": 3
        }),
    )
    .await
    .unwrap();
    assert_eq!(result["logs"], json!(["line 8", "line 9", "line 10"]));
    assert_eq!(result["truncated"], true);
    assert_eq!(
        local.calls()[1].args,
        vec![
            "logs",
            "ovnkube-node-abc",
            "-c",
            "ovnkube-controller",
            "-n",
            "openshift-ovn-kubernetes",
            "-p"
        ]
    );

    let err = call(
        &state,
        RpcMethod::MustGatherPodLogs,
        json!({"must_gather_path": path, "name": "x", "head": 2, "tail": 3}),
    )
    .await
    .unwrap_err();
    assert_eq!(err["code"], -32602);
}

#[tokio::test]
async fn test_missing_archive_is_not_found() {
    let state = app(Arc::new(FakeProcessRunner::new()));
    let err = call(
        &state,
        RpcMethod::MustGatherOvnkInfo,
        json!({"must_gather_path": "/nonexistent/must-gather", "info_type": "subnets"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err["data"]["kind"], "resource_not_found");

    let err = call(
        &state,
        RpcMethod::MustGatherOvnkInfo,
        json!({"must_gather_path": "/nonexistent/must-gather", "info_type": "routes"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err["code"], -32602);
}

#[tokio::test]
async fn test_sosreport_browsing() {
    let (_dir, path) = sosreport();
    let state = app(Arc::new(FakeProcessRunner::new()));

    let plugins = call(&state, RpcMethod::SosreportListPlugins, json!({"sosreport_path": path}))
        .await
        .unwrap();
    assert_eq!(plugins["total_commands"], 1);
    assert_eq!(plugins["plugins"][0]["name"], "networking");

    let output = call(
        &state,
        RpcMethod::SosreportGetCommand,
        json!({
            "sosreport_path": path,
            "filepath": "sos_commands/networking/ip_-o_addr",
            "max_lines": 5
        }),
    )
    .await
    .unwrap();
    assert_eq!(output["truncated"], true);
    let text = output["output"].as_str().unwrap();
    assert!(text.ends_with("Showing first 5 lines out of 30 total lines."));

    let err = call(
        &state,
        RpcMethod::SosreportGetCommand,
        json!({"sosreport_path": path, "filepath": "../../etc/passwd"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err["code"], -32602);
}

/// A must-gather whose network logs carry a database store for `nodes` pods
fn must_gather_with_databases(nodes: usize) -> (TempDir, String) {
    let (dir, path) = must_gather();
    let network_logs = dir.path().join("quay-io-release-sha256/network_logs");
    fs::create_dir_all(&network_logs).unwrap();

    let tarball = File::create(network_logs.join("ovnk_database_store.tar.gz")).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(tarball, Compression::default()));
    for i in 0..nodes {
        for suffix in ["nbdb", "sbdb"] {
            let body = vec![b'x'; 8192];
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            let name = format!("ovnk_database_store/ovnkube-node-{}_{}", i, suffix);
            builder.append_data(&mut header, name, body.as_slice()).unwrap();
        }
    }
    builder.into_inner().unwrap().finish().unwrap();
    (dir, path)
}

fn ovnkube_node_pods(nodes: usize) -> String {
    let items: Vec<Value> = (0..nodes)
        .map(|i| {
            json!({
                "metadata": {"name": format!("ovnkube-node-{}", i)},
                "spec": {"nodeName": format!("worker-{}", i)}
            })
        })
        .collect();
    json!({"apiVersion": "v1", "kind": "List", "items": items}).to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_database_listings_share_one_extraction() {
    let nodes = 50;
    let (dir, path) = must_gather_with_databases(nodes);
    let pods = ExecOutput::ok(ovnkube_node_pods(nodes));
    let state = app(Arc::new(FakeProcessRunner::new().respond(&["get", "pod"], pods)));

    let params = json!({"must_gather_path": path});
    let (a, b, c, d) = tokio::join!(
        call(&state, RpcMethod::MustGatherListNorthboundDatabases, params.clone()),
        call(&state, RpcMethod::MustGatherListSouthboundDatabases, params.clone()),
        call(&state, RpcMethod::MustGatherListNorthboundDatabases, params.clone()),
        call(&state, RpcMethod::MustGatherListSouthboundDatabases, params.clone()),
    );
    for result in [a, b, c, d] {
        let listed = result.unwrap();
        assert_eq!(listed["data"].as_array().unwrap().len(), nodes, "{}", listed);
    }

    let network_logs = dir.path().join("quay-io-release-sha256/network_logs");
    let leftovers: Vec<String> = fs::read_dir(&network_logs)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != "ovnk_database_store" && name != "ovnk_database_store.tar.gz")
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

#[cfg(unix)]
#[tokio::test]
async fn test_sosreport_symlinks_are_not_followed() {
    let (dir, path) = sosreport();
    let outside = tempfile::tempdir().unwrap();
    fs::write(outside.path().join("shadow"), "root:x:0:0\n").unwrap();
    std::os::unix::fs::symlink(
        outside.path().join("shadow"),
        dir.path().join("sos_commands/networking/shadow"),
    )
    .unwrap();
    let state = app(Arc::new(FakeProcessRunner::new()));

    let err = call(
        &state,
        RpcMethod::SosreportGetCommand,
        json!({"sosreport_path": path, "filepath": "sos_commands/networking/shadow"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err["code"], -32602);
}
