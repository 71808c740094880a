//! Integration tests for the whatif-bridge server.
//!
//! The request transport is driven with reqwest and the stream transport with
//! raw tokio-tungstenite sockets so the wire format itself is asserted.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use whatif_bridge::{desktop_router, BridgeServer, ServerState};
use whatif_core::{BridgeError, ProcedureRouter, ServerOptions};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Create an application directory with one visible and one hidden entry.
fn create_app_dir() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(
        temp_dir.path().join("editor.desktop"),
        "[Desktop Entry]\nName=Editor\nType=Application\nExec=editor %F\nIcon=editor\n",
    )
    .unwrap();
    std::fs::write(
        temp_dir.path().join("daemon.desktop"),
        "[Desktop Entry]\nName=Daemon\nType=Application\nNoDisplay=true\n",
    )
    .unwrap();
    temp_dir
}

async fn start_server(app_dir: &TempDir) -> (BridgeServer, SocketAddr) {
    let router = desktop_router(vec![app_dir.path().to_path_buf()]).unwrap();
    let server = BridgeServer::new(router);
    let options = ServerOptions {
        shutdown_timeout_ms: Some(2_000),
        ..ServerOptions::with_port(0)
    };
    let addr = server.start(&options).await.unwrap();
    (server, addr)
}

/// Procedures that keep a connection busy: a slow query and an endless
/// subscription of large events.
fn busy_router() -> ProcedureRouter {
    ProcedureRouter::builder()
        .query("healthCheck", |_: ()| async { Ok::<_, BridgeError>("ok") })
        .query("slow", |_: ()| async {
            tokio::time::sleep(Duration::from_millis(800)).await;
            Ok::<_, BridgeError>("done")
        })
        .subscription("flood", |_: ()| async {
            let chunk = "x".repeat(64 * 1024);
            Ok::<_, BridgeError>(futures::stream::repeat_with(move || {
                Ok::<_, BridgeError>(chunk.clone())
            }))
        })
        .build()
        .unwrap()
}

async fn start_busy_server(shutdown_timeout_ms: u64) -> (Arc<BridgeServer>, SocketAddr, ServerOptions) {
    let server = Arc::new(BridgeServer::new(busy_router()));
    let options = ServerOptions {
        shutdown_timeout_ms: Some(shutdown_timeout_ms),
        ..ServerOptions::with_port(0)
    };
    let addr = server.start(&options).await.unwrap();
    (server, addr, options)
}

/// Make an RPC call and return the full JSON-RPC payload.
async fn rpc_call_raw(addr: SocketAddr, method: &str, path: &str, input: Option<Value>) -> Result<Value, String> {
    let mut params = json!({"path": path});
    if let Some(input) = input {
        params["input"] = input;
    }
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/rpc", addr))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .timeout(TIMEOUT)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response.json::<Value>().await.map_err(|e| e.to_string())
}

async fn health_check(addr: SocketAddr) -> Result<Value, String> {
    rpc_call_raw(addr, "query", "healthCheck", None).await
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

/// Wait until the server has registered `n` stream connections.
async fn wait_for_connections(server: &BridgeServer, n: usize) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while server.open_connections() != n {
        assert!(tokio::time::Instant::now() < deadline, "connections never reached {}", n);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Read the next text message as JSON, or `None` once the socket closes.
async fn read_json(ws: &mut WsStream) -> Option<Value> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")?;
        match msg {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Drain the socket until it closes, returning every JSON message seen.
async fn read_until_closed(ws: &mut WsStream) -> Vec<Value> {
    let mut seen = Vec::new();
    while let Some(value) = read_json(ws).await {
        seen.push(value);
    }
    seen
}

fn is_reconnect(value: &Value) -> bool {
    value == &json!({"jsonrpc": "2.0", "id": null, "method": "reconnect"})
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

// =============================================================================
// Request transport
// =============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let apps = create_app_dir();
    let (server, addr) = start_server(&apps).await;

    let health: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "ok"}));

    let response = health_check(addr).await.unwrap();
    assert_eq!(response["result"], json!({"type": "data", "data": {"json": "ok"}}));

    server.stop().await;
}

#[tokio::test]
async fn test_health_check_fails_after_stop() {
    let apps = create_app_dir();
    let (server, addr) = start_server(&apps).await;
    assert!(health_check(addr).await.is_ok());

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(health_check(addr).await.is_err());
}

#[tokio::test]
async fn test_apps_keep_rich_dates() {
    let apps = create_app_dir();
    let (server, addr) = start_server(&apps).await;

    let response = rpc_call_raw(addr, "query", "apps.installed", None).await.unwrap();
    let data = &response["result"]["data"];
    let list = data["json"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], "editor");
    assert_eq!(list[0]["exec"], "editor %F");
    assert_eq!(data["meta"]["values"]["0.modified"], "Date");

    let response = rpc_call_raw(addr, "query", "apps.get", Some(json!({"json": {"id": "editor"}})))
        .await
        .unwrap();
    assert_eq!(response["result"]["data"]["meta"]["values"]["modified"], "Date");

    server.stop().await;
}

#[tokio::test]
async fn test_request_errors_use_rpc_codes() {
    let apps = create_app_dir();
    let (server, addr) = start_server(&apps).await;

    let missing = rpc_call_raw(addr, "query", "apps.nope", None).await.unwrap();
    assert_eq!(missing["error"]["code"], -32601);

    let wrong_kind = rpc_call_raw(addr, "mutation", "apps.installed", None).await.unwrap();
    assert_eq!(wrong_kind["error"]["code"], -32600);

    let bad_input = rpc_call_raw(addr, "query", "apps.get", Some(json!({"json": {"name": 1}})))
        .await
        .unwrap();
    assert_eq!(bad_input["error"]["code"], -32602);

    let not_found = rpc_call_raw(addr, "query", "apps.get", Some(json!({"json": {"id": "daemon"}})))
        .await
        .unwrap();
    assert_eq!(not_found["error"]["code"], -32004);

    let subscription = rpc_call_raw(addr, "subscription", "system.ticks", None).await.unwrap();
    assert_eq!(subscription["error"]["code"], -32600);

    server.stop().await;
}

// =============================================================================
// Stream transport
// =============================================================================

#[tokio::test]
async fn test_subscription_lifecycle() {
    let apps = create_app_dir();
    let (server, addr) = start_server(&apps).await;
    let mut ws = connect(addr).await;

    send(
        &mut ws,
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "subscription",
            "params": {"path": "system.ticks", "input": {"json": {"intervalMs": 10}}}
        }),
    )
    .await;

    let started = read_json(&mut ws).await.unwrap();
    assert_eq!(started["id"], 7);
    assert_eq!(started["result"]["type"], "started");

    let tick = read_json(&mut ws).await.unwrap();
    assert_eq!(tick["result"]["type"], "data");
    assert_eq!(tick["result"]["data"]["json"]["seq"], 0);
    assert_eq!(tick["result"]["data"]["meta"]["values"]["at"], "Date");

    send(&mut ws, json!({"jsonrpc": "2.0", "id": 7, "method": "subscription.stop"})).await;
    loop {
        let msg = read_json(&mut ws).await.unwrap();
        if msg["result"]["type"] == "stopped" {
            assert_eq!(msg["id"], 7);
            break;
        }
        assert_eq!(msg["result"]["type"], "data");
    }

    server.stop().await;
}

#[tokio::test]
async fn test_queries_accepted_on_stream() {
    let apps = create_app_dir();
    let (server, addr) = start_server(&apps).await;
    let mut ws = connect(addr).await;

    send(
        &mut ws,
        json!({"jsonrpc": "2.0", "id": 3, "method": "query", "params": {"path": "healthCheck"}}),
    )
    .await;
    let response = read_json(&mut ws).await.unwrap();
    assert_eq!(response["id"], 3);
    assert_eq!(response["result"]["data"]["json"], "ok");

    send(&mut ws, json!("not a request")).await;
    let response = read_json(&mut ws).await.unwrap();
    assert_eq!(response["error"]["code"], -32700);

    server.stop().await;
}

#[tokio::test]
async fn test_stop_sends_exactly_one_reconnect() {
    let apps = create_app_dir();
    let (server, addr) = start_server(&apps).await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    wait_for_connections(&server, 2).await;

    server.stop().await;

    for ws in [&mut first, &mut second] {
        let seen = read_until_closed(ws).await;
        assert_eq!(seen.iter().filter(|v| is_reconnect(v)).count(), 1);
    }
    assert_eq!(server.open_connections(), 0);
}

#[tokio::test]
async fn test_fault_sends_exactly_one_reconnect() {
    let apps = create_app_dir();
    let (server, addr) = start_server(&apps).await;
    let mut ws = connect(addr).await;
    wait_for_connections(&server, 1).await;

    server.on_transport_fault("simulated listener failure").await;
    assert_eq!(server.state(), ServerState::Stopped);

    let seen = read_until_closed(&mut ws).await;
    assert_eq!(seen.iter().filter(|v| is_reconnect(v)).count(), 1);

    // A later stop has nothing left to notify.
    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_reconnect_reaches_backlogged_connection() {
    let (server, addr, _) = start_busy_server(10_000).await;
    let mut ws = connect(addr).await;
    wait_for_connections(&server, 1).await;

    send(
        &mut ws,
        json!({"jsonrpc": "2.0", "id": 1, "method": "subscription", "params": {"path": "flood"}}),
    )
    .await;
    // Not reading lets the outbound queue and the socket buffers fill up.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stopping = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.stop().await }
    });

    let seen = read_until_closed(&mut ws).await;
    assert!(seen.len() > 1);
    assert_eq!(seen.iter().filter(|v| is_reconnect(v)).count(), 1);
    assert!(is_reconnect(seen.last().unwrap()));

    stopping.await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.open_connections(), 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_start_waits_for_stop_in_progress() {
    let (server, addr, options) = start_busy_server(5_000).await;

    let slow = tokio::spawn(rpc_call_raw(addr, "query", "slow", None));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopping = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.stop().await }
    });
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while server.local_addr().await.is_some() {
        assert!(tokio::time::Instant::now() < deadline, "stop never began");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let restarted = server.start(&options).await.unwrap();
    stopping.await.unwrap();

    assert_eq!(server.state(), ServerState::Listening);
    assert_eq!(server.local_addr().await, Some(restarted));
    let response = slow.await.unwrap().unwrap();
    assert_eq!(response["result"]["data"]["json"], "done");
    assert!(health_check(restarted).await.is_ok());

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

// =============================================================================
// Binary
// =============================================================================

fn bridge_binary() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_whatif-bridge") {
        return Ok(PathBuf::from(path));
    }
    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("whatif-bridge");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_whatif-bridge not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

#[tokio::test]
async fn test_binary_announces_port() {
    let apps = create_app_dir();
    let binary = bridge_binary().unwrap();

    let mut child = tokio::process::Command::new(&binary)
        .arg("--port")
        .arg("0")
        .arg("--app-dir")
        .arg(apps.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to spawn whatif-bridge");

    let stdout = child.stdout.take().expect("failed to capture stdout");
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut port = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("BRIDGE_PORT=") {
                    port = Some(value.trim().parse::<u16>().unwrap());
                    break;
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) => break,
            Err(_) => continue,
        }
    }

    let port = port.expect("BRIDGE_PORT line not emitted");
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let response = health_check(addr).await.unwrap();
    assert_eq!(response["result"]["data"]["json"], "ok");

    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[tokio::test]
async fn test_binary_rejects_negative_port() {
    let binary = bridge_binary().unwrap();
    let status = tokio::process::Command::new(&binary)
        .arg("--port")
        .arg("-1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .unwrap();
    assert!(!status.success());
}
