use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

const MAX_COLLECTION_NAME_LEN: usize = 256;

/// A validated collection name matching `[A-Za-z_][A-Za-z0-9_-]*`.
///
/// A leading underscore marks a system collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(String);

impl CollectionName {
    /// Creates a new `CollectionName`, validating its characters and length.
    pub fn new(s: impl Into<String>) -> Result<Self, CompileError> {
        let s = s.into();
        if !is_valid_collection_name(&s) {
            return Err(CompileError::InvalidCollectionName(s));
        }
        Ok(Self(s))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns this name with `prefix` prepended.
    ///
    /// The prefix itself is not validated beyond the combined result.
    pub fn with_prefix(&self, prefix: &str) -> Result<Self, CompileError> {
        if prefix.is_empty() {
            return Ok(self.clone());
        }
        Self::new(format!("{prefix}{}", self.0))
    }

    /// True for system collections (leading underscore).
    pub fn is_system(&self) -> bool {
        self.0.starts_with('_')
    }
}

fn is_valid_collection_name(s: &str) -> bool {
    if s.len() > MAX_COLLECTION_NAME_LEN {
        return false;
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CollectionName> for String {
    fn from(n: CollectionName) -> String {
        n.0
    }
}

impl TryFrom<String> for CollectionName {
    type Error = CompileError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for CollectionName {
    type Error = CompileError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in ["characters", "_system", "user_roles", "post-tag", "A1"] {
            assert!(CollectionName::new(name).is_ok(), "expected valid: {name}");
        }
    }

    #[test]
    fn invalid_names() {
        for name in ["", "1characters", "my collection", "a.b", "-dash"] {
            assert!(CollectionName::new(name).is_err(), "expected invalid: {name}");
        }
    }

    #[test]
    fn overlong_name_rejected() {
        let name = "a".repeat(MAX_COLLECTION_NAME_LEN + 1);
        assert!(CollectionName::new(name).is_err());
    }

    #[test]
    fn prefix_is_prepended() {
        let name = CollectionName::new("characters").unwrap();
        assert_eq!(name.with_prefix("got_").unwrap().as_str(), "got_characters");
        assert_eq!(name.with_prefix("").unwrap(), name);
    }

    #[test]
    fn system_collections_detected() {
        assert!(CollectionName::new("_graphs").unwrap().is_system());
        assert!(!CollectionName::new("graphs").unwrap().is_system());
    }

    #[test]
    fn serde_roundtrip() {
        let name = CollectionName::new("characters").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"characters\"");
        let back: CollectionName = serde_json::from_str(&json).unwrap();
        assert_eq!(name, back);
    }

    #[test]
    fn serde_rejects_invalid() {
        assert!(serde_json::from_str::<CollectionName>("\"bad name\"").is_err());
    }
}
