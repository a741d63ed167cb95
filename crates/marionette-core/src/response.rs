//! Normalization of Marionette replies into conformant responses.
//!
//! Marionette's replies deviate from the standard response shape:
//!
//! - errors arrive as `{"error": {"status": 7, "message": ...}}` instead of
//!   carrying `status` at the top level,
//! - `findElement`/`findElements` return bare id strings instead of
//!   `{"ELEMENT": id}` references,
//! - session creation returns the new session id as `value` instead of in
//!   `sessionId`.
//!
//! [`normalize`] repairs all three and produces a [`NormalizedResponse`].
//! [`decode_actor_id`] handles the one reply that is not a command response,
//! the actor-id answer of the handshake.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

use crate::command::{names, SessionId};
use crate::element::{ElementReference, ELEMENT_KEY};
use crate::protocol::ProtocolError;
use crate::rewrite::ActorId;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Result codes of the remote-automation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    NoSuchDriver,
    NoSuchElement,
    NoSuchFrame,
    UnknownCommand,
    StaleElementReference,
    ElementNotVisible,
    InvalidElementState,
    UnhandledError,
    ElementNotSelectable,
    JavaScriptError,
    XPathLookupError,
    Timeout,
    NoSuchWindow,
    InvalidCookieDomain,
    UnableToSetCookie,
    UnexpectedAlertOpen,
    NoAlertPresent,
    AsyncScriptTimeout,
    InvalidElementCoordinates,
    ImeNotAvailable,
    ImeEngineActivationFailed,
    InvalidSelector,
    SessionNotCreated,
    MoveTargetOutOfBounds,
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::Success => 0,
            Status::NoSuchDriver => 6,
            Status::NoSuchElement => 7,
            Status::NoSuchFrame => 8,
            Status::UnknownCommand => 9,
            Status::StaleElementReference => 10,
            Status::ElementNotVisible => 11,
            Status::InvalidElementState => 12,
            Status::UnhandledError => 13,
            Status::ElementNotSelectable => 15,
            Status::JavaScriptError => 17,
            Status::XPathLookupError => 19,
            Status::Timeout => 21,
            Status::NoSuchWindow => 23,
            Status::InvalidCookieDomain => 24,
            Status::UnableToSetCookie => 25,
            Status::UnexpectedAlertOpen => 26,
            Status::NoAlertPresent => 27,
            Status::AsyncScriptTimeout => 28,
            Status::InvalidElementCoordinates => 29,
            Status::ImeNotAvailable => 30,
            Status::ImeEngineActivationFailed => 31,
            Status::InvalidSelector => 32,
            Status::SessionNotCreated => 33,
            Status::MoveTargetOutOfBounds => 34,
        }
    }

    /// Look up a known result code.
    pub fn from_code(code: i64) -> Option<Self> {
        let status = match code {
            0 => Status::Success,
            6 => Status::NoSuchDriver,
            7 => Status::NoSuchElement,
            8 => Status::NoSuchFrame,
            9 => Status::UnknownCommand,
            10 => Status::StaleElementReference,
            11 => Status::ElementNotVisible,
            12 => Status::InvalidElementState,
            13 => Status::UnhandledError,
            15 => Status::ElementNotSelectable,
            17 => Status::JavaScriptError,
            19 => Status::XPathLookupError,
            21 => Status::Timeout,
            23 => Status::NoSuchWindow,
            24 => Status::InvalidCookieDomain,
            25 => Status::UnableToSetCookie,
            26 => Status::UnexpectedAlertOpen,
            27 => Status::NoAlertPresent,
            28 => Status::AsyncScriptTimeout,
            29 => Status::InvalidElementCoordinates,
            30 => Status::ImeNotAvailable,
            31 => Status::ImeEngineActivationFailed,
            32 => Status::InvalidSelector,
            33 => Status::SessionNotCreated,
            34 => Status::MoveTargetOutOfBounds,
            _ => return None,
        };
        Some(status)
    }

    /// Map a peer-reported status onto the enumeration. Unknown or
    /// non-numeric codes become [`Status::UnhandledError`].
    pub fn from_peer(raw: Option<&Value>) -> Self {
        let code = match raw {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        match code.and_then(Self::from_code) {
            Some(status) => status,
            None => {
                warn!(status = ?raw, "unrecognized peer status, reporting unhandled error");
                Status::UnhandledError
            }
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Status::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status code {code}")))
    }
}

// ---------------------------------------------------------------------------
// NormalizedResponse
// ---------------------------------------------------------------------------

/// A conformant response. Built only by [`normalize`]; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse {
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    value: Value,
}

impl NormalizedResponse {
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The peer's error message, for non-success responses that carry one.
    pub fn error_message(&self) -> Option<&str> {
        if self.is_success() {
            return None;
        }
        self.value.get("message").and_then(Value::as_str)
    }

    /// The element reference in `value`, if it holds exactly one.
    pub fn element(&self) -> Option<ElementReference> {
        ElementReference::from_value(&self.value)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Commands whose result is a single element id.
pub fn is_single_element_lookup(command_name: &str) -> bool {
    command_name == names::FIND_ELEMENT || command_name == names::FIND_CHILD_ELEMENT
}

/// Commands whose result is a list of element ids.
pub fn is_multi_element_lookup(command_name: &str) -> bool {
    command_name == names::FIND_ELEMENTS || command_name == names::FIND_CHILD_ELEMENTS
}

/// Parse a raw reply to the generic command `command_name` and reshape it.
///
/// Fails only when `raw` is not JSON, or when a session-creation reply has
/// no session id.
pub fn normalize(raw: &[u8], command_name: &str) -> Result<NormalizedResponse, ProtocolError> {
    let parsed: Value = serde_json::from_slice(raw)?;

    if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
        return Ok(normalize_error(error));
    }

    if command_name == names::NEW_SESSION {
        return session_created(parsed);
    }

    let (session_id, value) = match parsed {
        Value::Object(mut map) => {
            let session_id = map
                .get("sessionId")
                .and_then(Value::as_str)
                .map(SessionId::from);
            (session_id, map.shift_remove("value").unwrap_or(Value::Null))
        }
        bare => (None, bare),
    };

    let value = if is_single_element_lookup(command_name) {
        wrap_element(value)
    } else if is_multi_element_lookup(command_name) {
        wrap_elements(value)
    } else {
        value
    };

    Ok(NormalizedResponse {
        status: Status::Success,
        session_id,
        value,
    })
}

fn normalize_error(error: &Value) -> NormalizedResponse {
    match error {
        Value::Object(fields) => {
            let mut fields = fields.clone();
            let status = Status::from_peer(fields.get("status"));
            fields.shift_remove("status");
            NormalizedResponse {
                status,
                session_id: None,
                value: Value::Object(fields),
            }
        }
        other => {
            let message = match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            let mut fields = Map::new();
            fields.insert("message".into(), Value::String(message));
            NormalizedResponse {
                status: Status::UnhandledError,
                session_id: None,
                value: Value::Object(fields),
            }
        }
    }
}

fn session_created(parsed: Value) -> Result<NormalizedResponse, ProtocolError> {
    let id = match parsed {
        Value::Object(mut map) => map.shift_remove("value"),
        bare => Some(bare),
    };
    let id = match id {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => return Err(ProtocolError::MissingField("value")),
        Some(other) => other.to_string(),
    };
    Ok(NormalizedResponse {
        status: Status::Success,
        session_id: Some(SessionId::from(id)),
        value: Value::Object(Map::new()),
    })
}

fn wrap_element(value: Value) -> Value {
    if value.get(ELEMENT_KEY).is_some() {
        return value;
    }
    match value {
        Value::String(id) => ElementReference::new(id).to_value(),
        Value::Number(n) => ElementReference::new(n.to_string()).to_value(),
        Value::Null => Value::Null,
        other => {
            warn!(value = %other, "element lookup returned a non-scalar value, leaving it as is");
            other
        }
    }
}

fn wrap_elements(value: Value) -> Value {
    match value {
        Value::Array(ids) => Value::Array(ids.into_iter().map(wrap_element).collect()),
        Value::Null => Value::Array(Vec::new()),
        single => Value::Array(vec![wrap_element(single)]),
    }
}

/// Extract the actor id from the handshake reply `{"id": "<actor>"}`.
pub fn decode_actor_id(raw: &[u8]) -> Result<ActorId, ProtocolError> {
    let parsed: Value = serde_json::from_slice(raw)?;
    match parsed.get("id") {
        Some(Value::String(id)) => Ok(ActorId::new(id.clone())),
        Some(Value::Number(n)) => Ok(ActorId::new(n.to_string())),
        _ => Err(ProtocolError::MissingField("id")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
