//! Shared test helpers for marionette-core integration tests.
//!
//! The mock peer speaks real Marionette framing over a loopback TCP socket
//! and follows a script of [`MockBehavior`] steps, recording everything the
//! client sent so tests can assert on the exact wire envelopes.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use marionette_core::config::BridgeConfig;
use marionette_core::transport::MarionetteCodec;

/// One scripted step of the mock peer.
pub enum MockBehavior {
    /// Send an unsolicited greeting frame.
    Greet(Value),
    /// Wait, record whether the client wrote anything in the meantime, then
    /// send the greeting.
    GreetAfter(Duration, Value),
    /// Read one request frame and reply with the given JSON.
    Respond(Value),
    /// Read one request frame, sleep, then reply.
    Delay(Duration, Value),
    /// Read one request frame and close the connection.
    Drop,
    /// Read one request frame and reply with bytes that are not a frame.
    SendGarbage,
    /// Read one request frame and never reply.
    Hang,
}

/// What the mock peer observed.
#[derive(Debug, Default)]
pub struct MockReport {
    /// Every request frame, parsed as JSON, in arrival order.
    pub requests: Vec<Value>,
    /// Bytes the client sent before the delayed greeting went out.
    pub premature_bytes: usize,
}

/// The greeting Marionette sends on every new connection.
pub fn greeting() -> Value {
    json!({"applicationType": "gecko", "marionetteProtocol": 3, "traits": []})
}

/// Greeting followed by the actor-id reply.
pub fn handshake(actor: &str) -> Vec<MockBehavior> {
    vec![
        MockBehavior::Greet(greeting()),
        MockBehavior::Respond(json!({"from": "root", "id": actor})),
    ]
}

/// Config pointing at `addr` with short deadlines.
pub fn config_for(addr: SocketAddr) -> BridgeConfig {
    BridgeConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        connect_timeout_ms: 2_000,
        retry_interval_ms: 50,
        ..Default::default()
    }
}

/// Start a mock Marionette listener that accepts exactly one connection and
/// runs `behaviors` in order. After the script ends the connection is closed.
///
/// The returned handle resolves to a [`MockReport`] once the script ends.
pub async fn mock_marionette(behaviors: Vec<MockBehavior>) -> (SocketAddr, JoinHandle<MockReport>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, MarionetteCodec);
        let mut report = MockReport::default();

        for behavior in behaviors {
            match behavior {
                MockBehavior::Greet(value) => {
                    if send_json(&mut framed, &value).await.is_err() {
                        break;
                    }
                }
                MockBehavior::GreetAfter(wait, value) => {
                    tokio::time::sleep(wait).await;
                    report.premature_bytes = pending_bytes(framed.get_ref());
                    if send_json(&mut framed, &value).await.is_err() {
                        break;
                    }
                }
                MockBehavior::Respond(value) => {
                    if !read_request(&mut framed, &mut report).await {
                        break;
                    }
                    if send_json(&mut framed, &value).await.is_err() {
                        break;
                    }
                }
                MockBehavior::Delay(wait, value) => {
                    if !read_request(&mut framed, &mut report).await {
                        break;
                    }
                    tokio::time::sleep(wait).await;
                    if send_json(&mut framed, &value).await.is_err() {
                        break;
                    }
                }
                MockBehavior::Drop => {
                    read_request(&mut framed, &mut report).await;
                    break;
                }
                MockBehavior::SendGarbage => {
                    if !read_request(&mut framed, &mut report).await {
                        break;
                    }
                    let _ = framed.get_mut().write_all(b"12x:{\"value\":1}").await;
                    let _ = framed.get_mut().flush().await;
                }
                MockBehavior::Hang => {
                    read_request(&mut framed, &mut report).await;
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
        }

        report
    });

    (addr, handle)
}

async fn send_json(
    framed: &mut Framed<TcpStream, MarionetteCodec>,
    value: &Value,
) -> Result<(), marionette_core::transport::TransportError> {
    framed.send(Bytes::from(value.to_string())).await
}

/// Read one frame into the report. Returns `false` when the client hung up.
async fn read_request(framed: &mut Framed<TcpStream, MarionetteCodec>, report: &mut MockReport) -> bool {
    match framed.next().await {
        Some(Ok(frame)) => {
            let value = serde_json::from_slice(&frame).unwrap_or(Value::Null);
            report.requests.push(value);
            true
        }
        _ => false,
    }
}

/// Bytes readable on `stream` right now, without blocking.
fn pending_bytes(stream: &TcpStream) -> usize {
    let mut buf = [0u8; 1024];
    stream.try_read(&mut buf).unwrap_or(0)
}

/// A loopback port with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
