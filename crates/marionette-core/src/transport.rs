//! Framed message transport over a single stream connection.
//!
//! [`FramedTransport`] owns one bidirectional stream and moves whole
//! Marionette messages across it: [`send`](FramedTransport::send) writes a
//! length-prefixed frame, [`receive`](FramedTransport::receive) reads the
//! socket in fixed-size chunks until the buffered bytes hold one complete
//! frame, then hands back exactly that frame's payload.
//!
//! The stream is abstracted behind [`PeerStream`] so the same transport runs
//! over a [`tokio::net::TcpStream`] in production and over
//! [`tokio::io::duplex`] pipes in tests.
//!
//! # Example
//!
//! ```no_run
//! use marionette_core::transport::FramedTransport;
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:2828").await?;
//! let mut transport = FramedTransport::new(stream);
//!
//! let greeting = transport.receive().await?;
//! transport.send(br#"{"to":"root","type":"getMarionetteID"}"#).await?;
//! let reply = transport.receive().await?;
//! # let _ = (greeting, reply);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::protocol::{decode_frame, encode_frame, ProtocolError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Size of each socket read, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

// ---------------------------------------------------------------------------
// PeerStream trait
// ---------------------------------------------------------------------------

/// A bidirectional async stream that can carry Marionette frames.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Socket-level and framing failures. All of them are fatal to the
/// connection: once one is returned the stream must not be reused.
#[derive(Error, Debug)]
pub enum TransportError {
    /// An I/O error occurred on the stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// The incoming bytes do not form a valid frame header.
    #[error("framing error: {0}")]
    Framing(#[from] ProtocolError),

    /// No complete frame arrived within the configured read timeout.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// [`tokio_util::codec`] adapter for Marionette frames.
///
/// Usable with [`tokio_util::codec::Framed`]; [`FramedTransport`] uses the
/// same decoder over its own chunked read loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarionetteCodec;

impl Decoder for MarionetteCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, TransportError> {
        Ok(decode_frame(src)?)
    }
}

impl Encoder<Bytes> for MarionetteCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), TransportError> {
        encode_frame(&item, dst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FramedTransport
// ---------------------------------------------------------------------------

/// One connection's worth of framed send/receive.
///
/// Requests and responses are strictly sequential; the `&mut self` receivers
/// make it impossible to interleave two senders on one transport.
pub struct FramedTransport<S> {
    stream: S,
    buffer: BytesMut,
    codec: MarionetteCodec,
    chunk_size: usize,
    read_timeout: Option<Duration>,
}

impl<S: PeerStream> FramedTransport<S> {
    /// Wrap a connected stream. Reads use [`DEFAULT_CHUNK_SIZE`] and no
    /// read timeout.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(DEFAULT_CHUNK_SIZE),
            codec: MarionetteCodec,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout: None,
        }
    }

    /// Set the size of each socket read. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Bound each [`receive`](Self::receive) by `read_timeout`, or wait
    /// indefinitely with `None`.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Number of received bytes not yet returned as a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Write one frame carrying `payload`.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut frame = BytesMut::new();
        encode_frame(payload, &mut frame);
        trace!(payload_bytes = payload.len(), "writing frame");
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame and return its payload.
    pub async fn receive(&mut self) -> Result<Bytes, TransportError> {
        match self.read_timeout {
            Some(limit) => timeout(limit, self.read_frame())
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => self.read_frame().await,
        }
    }

    /// Shut down the write half of the stream.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Give back the underlying stream, dropping any buffered bytes.
    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn read_frame(&mut self) -> Result<Bytes, TransportError> {
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            if let Some(payload) = self.codec.decode(&mut self.buffer)? {
                trace!(
                    payload_bytes = payload.len(),
                    leftover = self.buffer.len(),
                    "read frame"
                );
                return Ok(payload);
            }

            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame;

    #[tokio::test]
    async fn send_then_receive_roundtrip() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client = FramedTransport::new(client);
        let mut server = FramedTransport::new(server);

        let payload = br#"{"to":"root","type":"getMarionetteID"}"#;
        client.send(payload).await.unwrap();
        let received = server.receive().await.unwrap();
        assert_eq!(&received[..], &payload[..]);
    }

    #[tokio::test]
    async fn receive_spans_many_chunks() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut client = FramedTransport::new(client).with_chunk_size(16);
        let mut server = FramedTransport::new(server);

        let body = "x".repeat(5000);
        let payload = serde_json::json!({ "value": body }).to_string();
        server.send(payload.as_bytes()).await.unwrap();

        let received = client.receive().await.unwrap();
        assert_eq!(&received[..], payload.as_bytes());
        assert_eq!(client.buffered_len(), 0);
    }

    #[tokio::test]
    async fn receive_handles_payload_of_exactly_one_chunk() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut client = FramedTransport::new(client).with_chunk_size(8);

        // Header and payload arrive in separate writes; the payload is
        // exactly one chunk long.
        server.write_all(b"8:").await.unwrap();
        server.flush().await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(b"{\"a\":12}").await.unwrap();

        let received = client.receive().await.unwrap();
        assert_eq!(&received[..], b"{\"a\":12}");
    }

    #[tokio::test]
    async fn receive_splits_back_to_back_frames() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut client = FramedTransport::new(client);

        let mut both = frame(b"{\"n\":1}").to_vec();
        both.extend_from_slice(&frame(b"{\"n\":2}"));
        server.write_all(&both).await.unwrap();

        assert_eq!(&client.receive().await.unwrap()[..], b"{\"n\":1}");
        assert_eq!(&client.receive().await.unwrap()[..], b"{\"n\":2}");
    }

    #[tokio::test]
    async fn receive_reports_closed_on_eof() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = FramedTransport::new(client);
        drop(server);

        let err = client.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn receive_reports_closed_mid_frame() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut client = FramedTransport::new(client);
        server.write_all(b"40:{\"partial").await.unwrap();
        drop(server);

        let err = client.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn receive_rejects_malformed_header() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut client = FramedTransport::new(client);
        server.write_all(b"abc:{}").await.unwrap();

        let err = client.receive().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Framing(ProtocolError::MalformedHeader(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_honours_read_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let mut client =
            FramedTransport::new(client).with_read_timeout(Some(Duration::from_millis(200)));

        let err = client.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(d) if d == Duration::from_millis(200)));
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let (client, _server) = tokio::io::duplex(64);
        let transport = FramedTransport::new(client).with_chunk_size(0);
        assert_eq!(transport.chunk_size, 1);
    }

    #[test]
    fn codec_encodes_and_decodes() {
        let mut codec = MarionetteCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"{\"value\":true}"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"14:{\"value\":true}");

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"{\"value\":true}");
    }
}
