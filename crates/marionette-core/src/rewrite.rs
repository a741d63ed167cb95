//! Translation from the generic command vocabulary to Marionette's.
//!
//! Marionette differs from the standard protocol in three ways that are
//! repaired here:
//!
//! - several commands go by a different name (`get` is `goUrl`),
//! - several parameters go by a different name (`url` is `value`),
//! - parameters are not nested under a `parameters` object but merged into
//!   the top level of the message, next to `to`, `type` and `session`.
//!
//! The first two are pure data: a [`RewriteTable`] maps each command name to a
//! [`RewriteRule`] holding an optional wire name and a list of [`ParamOp`]s.
//! [`RewriteTable::rewrite`] applies the matching rule and flattens the result
//! into a [`WireEnvelope`]. Supporting another command means adding a rule,
//! nothing else.
//!
//! # Example
//!
//! ```
//! use marionette_core::command::{names, Command};
//! use marionette_core::rewrite::{ActorId, RewriteTable};
//! use serde_json::json;
//!
//! let table = RewriteTable::standard();
//! let actor = ActorId::new("actor1");
//! let command = Command::new(names::GET).with_param("url", "http://example.test/");
//!
//! let envelope = table.rewrite(command, Some(&actor));
//! assert_eq!(
//!     envelope.into_value(),
//!     json!({"to": "actor1", "type": "goUrl", "value": "http://example.test/"})
//! );
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::command::{names, Command, Parameters};
use crate::element::ElementReference;

/// Address used until an actor id has been negotiated.
pub const ROOT_ACTOR: &str = "root";

/// Wire command that asks the peer for its actor id.
pub const GET_ACTOR_ID: &str = "getMarionetteID";

/// Routing address issued by the peer once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Parameter operations
// ---------------------------------------------------------------------------

/// One parameter transformation. Operations on absent keys do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOp {
    /// Move the value under `from` to `to`.
    Rename {
        from: &'static str,
        to: &'static str,
    },
    /// Drop the key entirely.
    Remove(&'static str),
    /// If the value under `key` is an element reference, copy its id into
    /// `element` and leave `key` in place; otherwise rename `key` to
    /// `fallback`.
    ElementOrRename {
        key: &'static str,
        element: &'static str,
        fallback: &'static str,
    },
}

impl ParamOp {
    pub fn apply(&self, params: &mut Parameters) {
        match *self {
            ParamOp::Rename { from, to } => rename(params, from, to),
            ParamOp::Remove(key) => {
                params.shift_remove(key);
            }
            ParamOp::ElementOrRename {
                key,
                element,
                fallback,
            } => match params.get(key).and_then(ElementReference::from_value) {
                Some(reference) => {
                    params.insert(element.to_string(), Value::String(reference.id));
                }
                None => rename(params, key, fallback),
            },
        }
    }
}

/// Rename `from` to `to` in place, keeping the position of `from` and the
/// order of every other key. An existing `to` is replaced.
fn rename(params: &mut Parameters, from: &str, to: &str) {
    if from == to || !params.contains_key(from) {
        return;
    }
    for (key, value) in std::mem::take(params) {
        if key == from {
            params.insert(to.to_string(), value);
        } else if key != to {
            params.insert(key, value);
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// How one generic command maps onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteRule {
    pub command: &'static str,
    pub wire_name: Option<&'static str>,
    pub ops: &'static [ParamOp],
}

impl RewriteRule {
    pub const fn new(command: &'static str) -> Self {
        Self {
            command,
            wire_name: None,
            ops: &[],
        }
    }

    pub const fn wire(mut self, wire_name: &'static str) -> Self {
        self.wire_name = Some(wire_name);
        self
    }

    pub const fn ops(mut self, ops: &'static [ParamOp]) -> Self {
        self.ops = ops;
        self
    }
}

const ID_TO_ELEMENT: &[ParamOp] = &[ParamOp::Rename {
    from: "id",
    to: "element",
}];
const MS_TO_VALUE: &[ParamOp] = &[ParamOp::Rename {
    from: "ms",
    to: "value",
}];
const SCRIPT_TO_VALUE: &[ParamOp] = &[ParamOp::Rename {
    from: "script",
    to: "value",
}];

/// The rules Marionette needs for the standard vocabulary.
pub const STANDARD_RULES: &[RewriteRule] = &[
    RewriteRule::new(names::NEW_SESSION).ops(&[ParamOp::Remove("desiredCapabilities")]),
    RewriteRule::new(names::QUIT).wire("deleteSession"),
    RewriteRule::new(names::GET).wire("goUrl").ops(&[ParamOp::Rename {
        from: "url",
        to: "value",
    }]),
    RewriteRule::new(names::GET_CURRENT_URL).wire("getUrl"),
    RewriteRule::new(names::IMPLICITLY_WAIT)
        .wire("setSearchTimeout")
        .ops(MS_TO_VALUE),
    RewriteRule::new(names::SET_ASYNC_SCRIPT_TIMEOUT)
        .wire("setScriptTimeout")
        .ops(MS_TO_VALUE),
    RewriteRule::new(names::EXECUTE_SCRIPT).ops(SCRIPT_TO_VALUE),
    RewriteRule::new(names::EXECUTE_ASYNC_SCRIPT).ops(SCRIPT_TO_VALUE),
    RewriteRule::new(names::GET_CURRENT_WINDOW_HANDLE).wire("getWindow"),
    RewriteRule::new(names::GET_WINDOW_HANDLES).wire("getWindows"),
    RewriteRule::new(names::CLOSE).wire("closeWindow"),
    RewriteRule::new(names::SWITCH_TO_WINDOW).ops(&[ParamOp::Rename {
        from: "name",
        to: "value",
    }]),
    RewriteRule::new(names::SWITCH_TO_FRAME).ops(&[ParamOp::ElementOrRename {
        key: "id",
        element: "element",
        fallback: "frame",
    }]),
    RewriteRule::new(names::FIND_CHILD_ELEMENT)
        .wire("findElement")
        .ops(ID_TO_ELEMENT),
    RewriteRule::new(names::FIND_CHILD_ELEMENTS)
        .wire("findElements")
        .ops(ID_TO_ELEMENT),
    RewriteRule::new(names::CLICK_ELEMENT).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::CLEAR_ELEMENT).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::GET_ELEMENT_ATTRIBUTE).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::GET_ELEMENT_TEXT).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::SEND_KEYS_TO_ELEMENT).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::IS_ELEMENT_SELECTED).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::IS_ELEMENT_ENABLED).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::IS_ELEMENT_DISPLAYED).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::GET_ELEMENT_SIZE).ops(ID_TO_ELEMENT),
    RewriteRule::new(names::GET_ELEMENT_LOCATION)
        .wire("getElementPosition")
        .ops(ID_TO_ELEMENT),
    RewriteRule::new(names::GET_ELEMENT_TAG_NAME).ops(ID_TO_ELEMENT),
];

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The flat JSON object Marionette expects on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEnvelope {
    pub to: String,
    pub kind: String,
    pub session: Option<String>,
    pub params: Parameters,
}

impl WireEnvelope {
    /// The actor-id request sent during the handshake.
    pub fn actor_request() -> Self {
        Self {
            to: ROOT_ACTOR.to_string(),
            kind: GET_ACTOR_ID.to_string(),
            session: None,
            params: Parameters::new(),
        }
    }

    /// Build the top-level object. Parameters are merged last, so a
    /// parameter named `to`, `type` or `session` wins over the routing field.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("to".into(), Value::String(self.to.clone()));
        map.insert("type".into(), Value::String(self.kind.clone()));
        if let Some(session) = &self.session {
            map.insert("session".into(), Value::String(session.clone()));
        }
        for (key, value) in &self.params {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.to_map())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for WireEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// RewriteTable
// ---------------------------------------------------------------------------

/// Lookup table from generic command names to [`RewriteRule`]s.
#[derive(Debug, Clone)]
pub struct RewriteTable {
    rules: HashMap<&'static str, RewriteRule>,
}

impl Default for RewriteTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl RewriteTable {
    /// A table with no rules: every command passes through unchanged.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// A table holding [`STANDARD_RULES`].
    pub fn standard() -> Self {
        let mut table = Self::empty();
        for rule in STANDARD_RULES {
            table.insert(*rule);
        }
        table
    }

    /// Add or replace the rule for `rule.command`, returning the old one.
    pub fn insert(&mut self, rule: RewriteRule) -> Option<RewriteRule> {
        self.rules.insert(rule.command, rule)
    }

    pub fn rule(&self, command: &str) -> Option<&RewriteRule> {
        self.rules.get(command)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The wire name for `command`; unknown commands keep their own name.
    pub fn wire_name<'a>(&self, command: &'a str) -> &'a str {
        match self.rules.get(command).and_then(|rule| rule.wire_name) {
            Some(wire_name) => wire_name,
            None => command,
        }
    }

    /// Rename, transform and flatten `command` into a [`WireEnvelope`]
    /// addressed to `actor`, or to [`ROOT_ACTOR`] before negotiation.
    pub fn rewrite(&self, command: Command, actor: Option<&ActorId>) -> WireEnvelope {
        let Command {
            name,
            session_id,
            mut parameters,
        } = command;

        let kind = match self.rules.get(name.as_str()) {
            Some(rule) => {
                for op in rule.ops {
                    op.apply(&mut parameters);
                }
                rule.wire_name.map(str::to_string).unwrap_or(name)
            }
            None => name,
        };

        WireEnvelope {
            to: actor
                .map(|a| a.as_str().to_string())
                .unwrap_or_else(|| ROOT_ACTOR.to_string()),
            kind,
            session: session_id.map(|id| id.as_str().to_string()),
            params: parameters,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
