//! Element reference wrapper.
//!
//! Remote-automation clients tell element handles apart from plain strings
//! by a single-key object `{"ELEMENT": "<id>"}`. Marionette returns bare ids,
//! so responses are re-wrapped with [`ElementReference`] before they reach
//! the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the single field in an element reference object.
pub const ELEMENT_KEY: &str = "ELEMENT";

/// A handle to an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementReference {
    #[serde(rename = "ELEMENT")]
    pub id: String,
}

impl ElementReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Read an element reference out of a JSON object, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_object()?.get(ELEMENT_KEY)? {
            Value::String(id) => Some(Self::new(id.clone())),
            other => Some(Self::new(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(ELEMENT_KEY.to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }
}
