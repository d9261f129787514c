//! End-to-end behaviour of the daemon against fake executors.

use ovnk_common::{DiagError, RpcMethod, RpcRequest, RpcResponse, TargetParams};
use ovnkd::config::{Config, Mode};
use ovnkd::debug_pod::LifecycleSettings;
use ovnkd::executor::fake::{ExecutorCall, FakeClusterExecutor, FakeProcessRunner};
use ovnkd::executor::{ExecOutput, PodPhase};
use ovnkd::offline::{OmcSession, SessionEventKind};
use ovnkd::rpc_handler::{handle_request, AppState};
use ovnkd::rpc_server::serve_lines;
use ovnkd::runner::CommandRunner;
use ovnkd::tools::capture::{tcpdump, TcpdumpParams};
use ovnkd::tools::LiveContext;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn fast_settings() -> LifecycleSettings {
    LifecycleSettings {
        poll_interval: Duration::from_millis(5),
        ready_timeout: Duration::from_millis(100),
        teardown_grace: Duration::from_secs(1),
    }
}

fn live(executor: Arc<FakeClusterExecutor>) -> LiveContext {
    let config = Config::default();
    let runner = CommandRunner::new(
        executor,
        Arc::new(FakeProcessRunner::new()),
        fast_settings(),
        &config.cluster.debug_namespace,
    );
    LiveContext::new(runner, &config)
}

fn app(
    mode: Mode,
    executor: Arc<FakeClusterExecutor>,
    local: Arc<FakeProcessRunner>,
) -> AppState {
    let mut config = Config::default();
    config.daemon.mode = mode;
    AppState::new(&config, executor, local)
}

async fn call(state: &AppState, method: RpcMethod, params: Value) -> Result<Value, i32> {
    let response = handle_request(state, RpcRequest::new(method, Some(params))).await;
    match response.error {
        Some(error) => Err(error.code),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

#[tokio::test]
async fn test_unbounded_capture_on_any_is_rejected_before_provisioning() {
    let executor = Arc::new(FakeClusterExecutor::new());
    let state = app(Mode::LiveCluster, executor.clone(), Arc::new(FakeProcessRunner::new()));

    let code = call(
        &state,
        RpcMethod::Tcpdump,
        json!({"target_type": "node", "node_name": "worker-1", "interface": "any"}),
    )
    .await
    .unwrap_err();

    assert_eq!(code, -32602);
    assert_eq!(executor.call_count(), 0);
    assert_eq!(executor.delete_count(), 0);
}

#[tokio::test]
async fn test_rejected_inputs_never_reach_an_executor() {
    let executor = Arc::new(FakeClusterExecutor::new());
    let local = Arc::new(FakeProcessRunner::new());
    let state = app(Mode::Both, executor.clone(), local.clone());

    let pod = |extra: Value| {
        let mut params = json!({"target_type": "pod", "pod_name": "client"});
        params.as_object_mut().unwrap().extend(extra.as_object().unwrap().clone());
        params
    };
    let rejected = [
        (RpcMethod::IpAddrShow, pod(json!({"interface": "eth0;reboot"}))),
        (RpcMethod::IpLinkShow, pod(json!({"interface": "averyveryverylongif"}))),
        (RpcMethod::Ping, pod(json!({"target": "$(id)"}))),
        (RpcMethod::Ping, json!({"target_type": "vm", "target": "10.0.0.1"})),
        (RpcMethod::GetIp, json!({"node": "worker-1", "command": "link delete"})),
        (RpcMethod::GetIp, json!({"node": "worker-1", "command": "l s"})),
        (
            RpcMethod::MustGatherQueryDatabase,
            json!({"must_gather_path": "relative/mg", "database_name": "a_nbdb", "table": "ACL"}),
        ),
    ];
    for (method, params) in rejected {
        assert!(call(&state, method, params.clone()).await.is_err(), "{:?} {}", method, params);
    }
    assert_eq!(executor.call_count(), 0);
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_capture_argv_on_pod_and_node() {
    let params = |target: TargetParams| TcpdumpParams {
        target,
        interface: "eth0".into(),
        duration: Some(5),
        bpf_filter: Some("port 53".into()),
        ..TcpdumpParams::default()
    };
    let expected = vec!["tcpdump", "-i", "eth0", "-n", "-s", "96", "-v", "port 53"];

    let executor =
        Arc::new(FakeClusterExecutor::new().with_output(ExecOutput::ok("1 packet captured\n")));
    let ctx = live(executor.clone());
    let out = tcpdump(&ctx, params(TargetParams::pod("client", Some("demo"), None)))
        .await
        .unwrap();
    assert_eq!(out.output.as_deref(), Some("1 packet captured\n"));
    assert_eq!(
        executor.calls(),
        vec![ExecutorCall::ExecInPod {
            pod: "client".into(),
            namespace: "demo".into(),
            argv: expected.iter().map(|s| s.to_string()).collect(),
        }]
    );

    let executor = Arc::new(FakeClusterExecutor::new());
    let ctx = live(executor.clone());
    let mut node = TargetParams::node("worker-1", "");
    node.node_image = None;
    tcpdump(&ctx, params(node)).await.unwrap();

    let mut chrooted = vec!["chroot", "/host"];
    chrooted.extend(expected.iter());
    let chrooted: Vec<String> = chrooted.iter().map(|s| s.to_string()).collect();
    assert_eq!(executor.executed(), vec![chrooted]);
    assert_eq!(executor.created_specs()[0].image, Config::default().images.tcpdump_image);
    assert_eq!(executor.delete_count(), 1);
}

#[tokio::test]
async fn test_host_never_running_times_out_and_is_deleted_once() {
    let executor = Arc::new(FakeClusterExecutor::new().never_running());
    let ctx = live(executor.clone());

    let err = tcpdump(
        &ctx,
        TcpdumpParams {
            target: TargetParams::node("worker-1", "nicolaka/netshoot:v0.13"),
            interface: "eth0".into(),
            packet_count: Some(10),
            bpf_filter: Some("icmp".into()),
            ..TcpdumpParams::default()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DiagError::ProvisioningTimeout { .. }), "{:?}", err);
    ctx.runner.pods().drain_teardowns().await;
    assert_eq!(executor.delete_count(), 1);
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn test_abandoned_request_still_tears_down() {
    let executor = Arc::new(
        FakeClusterExecutor::new()
            .with_phases([PodPhase::Pending, PodPhase::Running])
            .with_exec_delay(Duration::from_secs(30)),
    );
    let ctx = Arc::new(live(executor.clone()));

    let request = tokio::spawn({
        let ctx = Arc::clone(&ctx);
        async move {
            let params = TcpdumpParams {
                target: TargetParams::node("worker-1", "busybox:1.36"),
                interface: "eth0".into(),
                packet_count: Some(10),
                bpf_filter: Some("icmp".into()),
                ..TcpdumpParams::default()
            };
            tcpdump(&ctx, params).await
        }
    });

    for _ in 0..200 {
        if !executor.executed().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(executor.executed().len(), 1);

    request.abort();
    let _ = request.await;
    ctx.runner.pods().drain_teardowns().await;

    assert_eq!(executor.delete_count(), 1);
    assert_eq!(ctx.runner.pods().pending_teardowns(), 0);
}

#[tokio::test]
async fn test_bad_database_names_never_touch_the_filesystem() {
    let local = Arc::new(FakeProcessRunner::new());
    let state = app(Mode::Offline, Arc::new(FakeClusterExecutor::new()), local.clone());

    let names = ["ovnkube-node-abc.db", "ovnkube-node-abc_nbdb.bak", "../etc/x_nbdb", "a\\b_sbdb"];
    for name in names {
        // The archive path does not exist, so a missing-path error would mean
        // the name was checked too late.
        let code = call(
            &state,
            RpcMethod::MustGatherQueryDatabase,
            json!({
                "must_gather_path": "/nonexistent/must-gather",
                "database_name": name,
                "table": "Logical_Switch",
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(code, -32602, "{}", name);
    }
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_concurrent_session_requests_never_interleave() {
    let runner = Arc::new(
        FakeProcessRunner::new()
            .respond(&["get"], ExecOutput::ok("NAME\n"))
            .with_delay(Duration::from_millis(20)),
    );
    let session = Arc::new(OmcSession::new(runner.clone(), "omc"));

    let mut tasks = Vec::new();
    for snapshot in ["/data/mg-a", "/data/mg-b", "/data/mg-c"] {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            session
                .select_then_read(Path::new(snapshot), &["get".to_string(), "pods".to_string()])
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let calls = runner.calls();
    assert_eq!(calls.len(), 6);
    for pair in calls.chunks(2) {
        assert_eq!(pair[0].args[0], "use");
        assert_eq!(pair[1].args, vec!["get", "pods"]);
    }

    let history = session.history().await;
    assert_eq!(history.len(), 6);
    for (i, pair) in history.chunks(2).enumerate() {
        assert_eq!(pair[0].kind, SessionEventKind::Select);
        assert_eq!(pair[1].kind, SessionEventKind::Read);
        assert_eq!(pair[0].snapshot, pair[1].snapshot, "pair {}", i);
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }
    assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test]
async fn test_status_reports_mode() {
    let state = app(
        Mode::Offline,
        Arc::new(FakeClusterExecutor::new()),
        Arc::new(FakeProcessRunner::new()),
    );
    let status = call(&state, RpcMethod::Status, Value::Null).await.unwrap();
    assert_eq!(status["mode"], "offline");
    assert_eq!(status["pending_teardowns"], 0);
}

#[tokio::test]
async fn test_firewall_and_conntrack_mutations_never_reach_a_node() {
    let executor = Arc::new(FakeClusterExecutor::new());
    let state = app(Mode::LiveCluster, executor.clone(), Arc::new(FakeProcessRunner::new()));
    let node = json!({"node": "worker-1", "image": "busybox:1.36"});

    let iptables = ["-Z --modprobe=/tmp/x", "-n --zero", "INPUT -F", "-D INPUT 1", "-P INPUT DROP"];
    for filters in iptables {
        let mut params = node.clone();
        params["filter_parameters"] = json!(filters);
        let code = call(&state, RpcMethod::GetIptables, params).await.unwrap_err();
        assert_eq!(code, -32602, "{}", filters);
    }
    for filters in ["-D -p tcp", "-F", "-U -m 1", "-p tcp -E"] {
        let mut params = node.clone();
        params["filter_parameters"] = json!(filters);
        let code = call(&state, RpcMethod::GetConntrack, params).await.unwrap_err();
        assert_eq!(code, -32602, "{}", filters);
    }
    assert_eq!(executor.call_count(), 0);

    let mut listing = node.clone();
    listing["filter_parameters"] = json!("OVN-KUBE-NODEPORT -n -v --line-numbers");
    listing["table"] = json!("nat");
    call(&state, RpcMethod::GetIptables, listing).await.unwrap();
    assert_eq!(
        executor.executed()[0],
        vec![
            "chroot",
            "/host",
            "iptables",
            "-t",
            "nat",
            "-L",
            "OVN-KUBE-NODEPORT",
            "-n",
            "-v",
            "--line-numbers"
        ]
    );
}

#[tokio::test]
async fn test_quiet_capture_stops_at_its_window() {
    let executor = Arc::new(
        FakeClusterExecutor::new()
            .with_phases([PodPhase::Pending, PodPhase::Running])
            .with_exec_delay(Duration::from_secs(60))
            .with_output(ExecOutput::ok("packet 1\npacket 2\n")),
    );
    let ctx = live(executor.clone());

    let started = Instant::now();
    let out = tcpdump(
        &ctx,
        TcpdumpParams {
            target: TargetParams::node("worker-1", "nicolaka/netshoot:v0.13"),
            interface: "eth0".into(),
            duration: Some(1),
            bpf_filter: Some("port 53".into()),
            ..TcpdumpParams::default()
        },
    )
    .await
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());
    assert_eq!(out.output.as_deref(), Some("packet 1\npacket 2\n"));
    assert!(out.truncated);
    assert_eq!(executor.delete_count(), 1);
}

#[tokio::test]
async fn test_one_connection_serves_requests_concurrently() {
    let executor = Arc::new(
        FakeClusterExecutor::new()
            .with_exec_delay(Duration::from_secs(60))
            .with_output(ExecOutput::ok("packet 1\n")),
    );
    let state = Arc::new(app(Mode::Both, executor, Arc::new(FakeProcessRunner::new())));

    let (client, server) = tokio::io::duplex(8192);
    let (server_read, server_write) = tokio::io::split(server);
    let serving = tokio::spawn(serve_lines(state, BufReader::new(server_read), server_write));
    let (client_read, mut client_write) = tokio::io::split(client);

    let capture = json!({
        "jsonrpc": "2.0",
        "method": "tcpdump",
        "params": {
            "target_type": "pod",
            "pod_name": "client",
            "interface": "eth0",
            "duration": 2,
            "bpf_filter": "port 53"
        },
        "id": "capture"
    });
    let status = json!({"jsonrpc": "2.0", "method": "status", "id": "status"});
    for request in [capture, status] {
        let line = format!("{}\n", request);
        client_write.write_all(line.as_bytes()).await.unwrap();
    }

    let mut lines = BufReader::new(client_read).lines();
    let mut ids = Vec::new();
    for _ in 0..2 {
        let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
            .await
            .expect("no response")
            .unwrap()
            .unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert!(response.error.is_none(), "{:?}", response.error);
        if response.id.as_deref() == Some("capture") {
            assert_eq!(response.result.as_ref().unwrap()["output"], "packet 1\n");
        }
        ids.push(response.id.unwrap());
    }
    assert_eq!(ids, vec!["status", "capture"]);

    client_write.shutdown().await.unwrap();
    serving.await.unwrap().unwrap();
}
