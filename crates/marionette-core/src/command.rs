//! Generic remote-automation commands.
//!
//! A [`Command`] is expressed in the standard command vocabulary (see
//! [`names`]) and carries an ordered parameter map. It is built by the caller
//! and only reshaped by [`crate::rewrite`] on its way to the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered command parameters.
pub type Parameters = Map<String, Value>;

/// Standard command names.
pub mod names {
    pub const NEW_SESSION: &str = "newSession";
    pub const QUIT: &str = "quit";
    pub const GET: &str = "get";
    pub const GET_CURRENT_URL: &str = "getCurrentUrl";
    pub const IMPLICITLY_WAIT: &str = "implicitlyWait";
    pub const SET_ASYNC_SCRIPT_TIMEOUT: &str = "setAsyncScriptTimeout";
    pub const EXECUTE_SCRIPT: &str = "executeScript";
    pub const EXECUTE_ASYNC_SCRIPT: &str = "executeAsyncScript";
    pub const GET_CURRENT_WINDOW_HANDLE: &str = "getCurrentWindowHandle";
    pub const GET_WINDOW_HANDLES: &str = "getWindowHandles";
    pub const CLOSE: &str = "close";
    pub const SWITCH_TO_WINDOW: &str = "switchToWindow";
    pub const SWITCH_TO_FRAME: &str = "switchToFrame";
    pub const FIND_ELEMENT: &str = "findElement";
    pub const FIND_ELEMENTS: &str = "findElements";
    pub const FIND_CHILD_ELEMENT: &str = "findChildElement";
    pub const FIND_CHILD_ELEMENTS: &str = "findChildElements";
    pub const CLICK_ELEMENT: &str = "clickElement";
    pub const CLEAR_ELEMENT: &str = "clearElement";
    pub const GET_ELEMENT_ATTRIBUTE: &str = "getElementAttribute";
    pub const GET_ELEMENT_TEXT: &str = "getElementText";
    pub const SEND_KEYS_TO_ELEMENT: &str = "sendKeysToElement";
    pub const IS_ELEMENT_SELECTED: &str = "isElementSelected";
    pub const IS_ELEMENT_ENABLED: &str = "isElementEnabled";
    pub const IS_ELEMENT_DISPLAYED: &str = "isElementDisplayed";
    pub const GET_ELEMENT_SIZE: &str = "getElementSize";
    pub const GET_ELEMENT_LOCATION: &str = "getElementLocation";
    pub const GET_ELEMENT_TAG_NAME: &str = "getElementTagName";
}

/// Opaque session identifier issued by the peer on session creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A command in the generic vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session_id: None,
            parameters: Parameters::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the session id only when one is given.
    pub fn with_optional_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Merge `parameters` into the command, overwriting existing keys.
    pub fn with_params(mut self, parameters: Parameters) -> Self {
        self.parameters.extend(parameters);
        self
    }
}
