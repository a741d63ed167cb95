use assert_cmd::prelude::*;
use assert_cmd::Command;
use marionette_core::transport::FramedTransport;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use std::process::Output;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

/// A loopback port with nothing listening on it.
fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn marionette() -> Command {
    let mut cmd = Command::cargo_bin("marionette").unwrap();
    cmd.env_remove("MARIONETTE_HOST")
        .env_remove("MARIONETTE_PORT")
        .env("HOME", std::env::temp_dir().join("marionette-cli-test-home"));
    cmd
}

/// A scripted reply from the mock listener.
enum Reply {
    Json(Value),
    /// Raw bytes written without framing; ends the script.
    Raw(&'static [u8]),
}

/// Accept one connection, greet, answer the actor request with `actor1`,
/// then answer each later request with the next reply. Resolves to every
/// request received after the handshake.
async fn scripted_peer(replies: Vec<Reply>) -> (SocketAddr, JoinHandle<Vec<Value>>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut peer = FramedTransport::new(stream);
        let mut requests = Vec::new();

        peer.send(br#"{"applicationType":"gecko","traits":[]}"#).await.unwrap();
        peer.receive().await.unwrap();
        peer.send(br#"{"from":"root","id":"actor1"}"#).await.unwrap();

        for reply in replies {
            let Ok(raw) = peer.receive().await else {
                break;
            };
            requests.push(serde_json::from_slice(&raw).unwrap_or(Value::Null));
            match reply {
                Reply::Json(value) => {
                    if peer.send(value.to_string().as_bytes()).await.is_err() {
                        break;
                    }
                }
                Reply::Raw(bytes) => {
                    let mut stream = peer.into_inner();
                    let _ = stream.write_all(bytes).await;
                    let _ = stream.flush().await;
                    break;
                }
            }
        }
        requests
    });

    (addr, handle)
}

/// Run the binary against `addr` off the async runtime.
async fn run_against(addr: SocketAddr, args: &[&str]) -> Output {
    let mut full = vec![
        "--host".to_string(),
        addr.ip().to_string(),
        "--port".to_string(),
        addr.port().to_string(),
        "--connect-timeout-ms".to_string(),
        "2000".to_string(),
    ];
    full.extend(args.iter().map(|a| a.to_string()));
    tokio::task::spawn_blocking(move || marionette().args(full).output().unwrap())
        .await
        .unwrap()
}

#[test]
fn test_help_exits_zero() {
    marionette()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("marionette"))
        .stdout(predicate::str::contains("dispatch"));
}

#[test]
fn test_text_help_lists_locator_flags() {
    marionette()
        .args(["text", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--using"))
        .stdout(predicate::str::contains("--child-tag"));
}

#[test]
fn test_connection_failure_exits_two() {
    let port = unused_port();
    marionette()
        .args([
            "--host",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--connect-timeout-ms",
            "300",
            "dispatch",
            "newSession",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Connection error"));
}

#[test]
fn test_port_from_environment() {
    let port = unused_port();
    marionette()
        .env("MARIONETTE_HOST", "127.0.0.1")
        .env("MARIONETTE_PORT", port.to_string())
        .args(["--connect-timeout-ms", "300", "dispatch", "getCurrentUrl"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains(format!("127.0.0.1:{}", port)));
}

#[test]
fn test_params_must_be_object() {
    marionette()
        .args(["dispatch", "get", "--params", "[1, 2]"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("JSON object"));
}

#[test]
fn test_missing_subcommand_fails() {
    marionette().assert().failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_error_exits_one() {
    let (addr, peer) = scripted_peer(vec![Reply::Json(json!({
        "error": {"status": 7, "message": "Unable to locate element: x"}
    }))])
    .await;

    let output = run_against(
        addr,
        &["dispatch", "findElement", "--params", r#"{"using":"id","value":"x"}"#],
    )
    .await;
    output
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Command failed"))
        .stderr(predicate::str::contains("Unable to locate element"));

    let requests = peer.await.unwrap();
    assert_eq!(requests[0], json!({"to": "actor1", "type": "findElement", "using": "id", "value": "x"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_garbage_header_exits_three() {
    let (addr, _peer) = scripted_peer(vec![Reply::Raw(b"12x:{\"value\":1}")]).await;

    let output = run_against(addr, &["dispatch", "getCurrentUrl"]).await;
    output
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Protocol error"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_text_prints_element_text_and_quits() {
    let (addr, peer) = scripted_peer(vec![
        Reply::Json(json!({"value": "s-1"})),
        Reply::Json(json!({"value": null})),
        Reply::Json(json!({"value": "el-1"})),
        Reply::Json(json!({"value": "Hello, world"})),
        Reply::Json(json!({"value": null})),
    ])
    .await;

    let output = run_against(
        addr,
        &["text", "http://example.test/", "--using", "id", "--value", "x"],
    )
    .await;
    output
        .assert()
        .success()
        .stdout(predicate::str::diff("Hello, world\n"));

    let requests = peer.await.unwrap();
    let kinds: Vec<&str> = requests.iter().filter_map(|r| r["type"].as_str()).collect();
    assert_eq!(
        kinds,
        ["newSession", "goUrl", "findElement", "getElementText", "deleteSession"]
    );
    assert_eq!(requests[1]["value"], "http://example.test/");
    assert_eq!(requests[3]["element"], "el-1");
    assert_eq!(requests[4]["session"], "s-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_session_wraps_dispatch() {
    let (addr, peer) = scripted_peer(vec![
        Reply::Json(json!({"value": "s-9"})),
        Reply::Json(json!({"value": ["w-1", "w-2"]})),
        Reply::Json(json!({"value": null})),
    ])
    .await;

    let output = run_against(addr, &["--format", "json", "dispatch", "getWindowHandles", "--new-session"]).await;
    output
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""value":["w-1","w-2"]"#));

    let requests = peer.await.unwrap();
    assert_eq!(requests[1], json!({"to": "actor1", "type": "getWindows", "session": "s-9"}));
    assert_eq!(requests[2], json!({"to": "actor1", "type": "deleteSession", "session": "s-9"}));
}
