mod collection_name;
mod key_type;

pub use collection_name::CollectionName;
pub use key_type::KeyType;

/// A schemaless document: attribute name to JSON value, in insertion order.
pub type Document = serde_json::Map<String, serde_json::Value>;
