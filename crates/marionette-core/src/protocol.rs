//! Length-prefixed framing used by the Marionette wire protocol.
//!
//! Every message on the socket is a decimal byte count, a colon, and then
//! exactly that many bytes of UTF-8 JSON:
//!
//! ```text
//! [Header: ASCII decimal length] [':'] [Payload: `length` bytes of JSON]
//! ```
//!
//! The length counts payload *bytes*, not characters, and does not include
//! the header itself. Because the header is self-delimiting, several messages
//! can share one byte stream without any separator.
//!
//! Decoding is driven entirely by the declared length. A partially received
//! frame is left in the buffer untouched until enough bytes have arrived, and
//! bytes beyond the end of one frame stay buffered for the next one.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use marionette_core::protocol::{decode_frame, encode_frame};
//!
//! let mut buf = BytesMut::new();
//! encode_frame(br#"{"to":"root"}"#, &mut buf);
//! assert_eq!(&buf[..], br#"13:{"to":"root"}"#);
//!
//! let payload = decode_frame(&mut buf).unwrap().unwrap();
//! assert_eq!(&payload[..], br#"{"to":"root"}"#);
//! assert!(buf.is_empty());
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Byte separating the decimal length from the payload.
pub const SEPARATOR: u8 = b':';

/// Longest accepted length prefix, in digits.
pub const MAX_HEADER_DIGITS: usize = 20;

/// Largest accepted payload (256 MiB).
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while decoding frames or interpreting their JSON payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The length prefix is empty, non-numeric, or too long.
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),

    /// The declared length exceeds [`MAX_FRAME_LEN`].
    #[error("frame length {0} exceeds the maximum frame size")]
    FrameTooLarge(usize),

    /// The payload is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    /// A field required by the handshake or session creation is absent.
    #[error("missing field `{0}` in peer response")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidJson(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append one framed message carrying `payload` to `dst`.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    let header = payload.len().to_string();
    dst.reserve(header.len() + 1 + payload.len());
    dst.put_slice(header.as_bytes());
    dst.put_u8(SEPARATOR);
    dst.put_slice(payload);
}

/// Frame `payload` into a freshly allocated buffer.
pub fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    encode_frame(payload, &mut buf);
    buf.freeze()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse the length prefix at the start of `buf`.
///
/// Returns `Ok(None)` while the separator has not arrived yet, or
/// `Ok(Some((payload_len, header_len)))` where `header_len` includes the
/// separator byte.
pub fn parse_header(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    for (i, &byte) in buf.iter().enumerate() {
        match byte {
            SEPARATOR if i == 0 => {
                return Err(ProtocolError::MalformedHeader(
                    "empty length prefix".to_string(),
                ));
            }
            SEPARATOR => {
                // Only ASCII digits precede the separator at this point.
                let digits = std::str::from_utf8(&buf[..i])
                    .map_err(|e| ProtocolError::MalformedHeader(e.to_string()))?;
                let len: usize = digits
                    .parse()
                    .map_err(|_| ProtocolError::MalformedHeader(format!("bad length {digits:?}")))?;
                if len > MAX_FRAME_LEN {
                    return Err(ProtocolError::FrameTooLarge(len));
                }
                return Ok(Some((len, i + 1)));
            }
            b'0'..=b'9' if i < MAX_HEADER_DIGITS => {}
            b'0'..=b'9' => {
                return Err(ProtocolError::MalformedHeader(format!(
                    "length prefix longer than {MAX_HEADER_DIGITS} digits"
                )));
            }
            other => {
                return Err(ProtocolError::MalformedHeader(format!(
                    "unexpected byte 0x{other:02X} in length prefix"
                )));
            }
        }
    }
    Ok(None)
}

/// Take one complete frame off the front of `src`.
///
/// Returns `Ok(None)` if `src` does not hold a whole frame yet; nothing is
/// consumed in that case. On success the header and payload are removed from
/// `src` and any following bytes are left in place.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
    let Some((len, header_len)) = parse_header(src)? else {
        return Ok(None);
    };

    let needed = header_len + len;
    if src.len() < needed {
        src.reserve(needed - src.len());
        return Ok(None);
    }

    src.advance(header_len);
    Ok(Some(src.split_to(len).freeze()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
