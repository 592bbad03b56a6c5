use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How an entity's primary key is typed on the application side.
///
/// The store always keys documents by string, so integer keys are rendered to
/// their decimal string form before they reach a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    #[default]
    String,
    Integer,
}

impl KeyType {
    /// Normalizes a key value to the store's string representation.
    ///
    /// Strings pass through, integers become decimal strings, and other values
    /// are returned unchanged.
    pub fn normalize(self, key: &Value) -> Value {
        match key {
            Value::Number(n) if n.is_i64() || n.is_u64() => Value::String(n.to_string()),
            _ => key.clone(),
        }
    }

    /// Converts a stored key back to the application-side representation.
    ///
    /// Integer-keyed entities get numeric strings parsed back into integers;
    /// keys that do not parse are returned unchanged.
    pub fn denormalize(self, key: &Value) -> Value {
        match (self, key) {
            (Self::Integer, Value::String(s)) => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| key.clone()),
            _ => key.clone(),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
        }
    }
}
