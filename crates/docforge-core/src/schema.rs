use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::FieldPath;
use crate::types::CollectionName;

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Whether a collection stores plain documents or graph edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    #[default]
    Document,
    Edge,
}

impl CollectionKind {
    /// The numeric type code used by the administrative API.
    pub fn type_code(self) -> u8 {
        match self {
            Self::Document => 2,
            Self::Edge => 3,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => write!(f, "document"),
            Self::Edge => write!(f, "edge"),
        }
    }
}

/// Options for collection creation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectionOptions {
    #[serde(default)]
    pub kind: CollectionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_sync: Option<bool>,
    /// Key generator settings, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_options: Option<Value>,
    /// Document validation rule, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl CollectionOptions {
    /// Options for an edge collection.
    pub fn edge() -> Self {
        Self {
            kind: CollectionKind::Edge,
            ..Self::default()
        }
    }
}

/// Mutable collection properties.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_sync: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

/// Index flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Persistent,
    Geo,
    Fulltext,
    Ttl,
    Inverted,
    Zkd,
}

impl IndexKind {
    /// The type name used by the administrative API.
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::Geo => "geo",
            Self::Fulltext => "fulltext",
            Self::Ttl => "ttl",
            Self::Inverted => "inverted",
            Self::Zkd => "zkd",
        }
    }
}

/// A declarative index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub kind: IndexKind,
    pub fields: Vec<FieldPath>,
    /// Defaults to `{collection}_{fields}_{kind}` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    /// Extra index options (e.g. `expireAfter`), passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl IndexDefinition {
    /// A non-unique, non-sparse index of `kind` over `fields`.
    pub fn new(kind: IndexKind, fields: Vec<FieldPath>) -> Self {
        Self {
            kind,
            fields,
            name: None,
            unique: false,
            sparse: false,
            options: None,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Make the index sparse.
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Give the index an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The explicit name, or the conventional one for `collection`.
    pub fn resolved_name(&self, collection: &CollectionName) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| f.segments().join("_"))
            .collect();
        format!("{collection}_{}_{}", fields.join("_"), self.kind.api_name()).to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Search view flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewKind {
    #[default]
    Arangosearch,
    SearchAlias,
}

impl ViewKind {
    /// The type name used by the administrative API.
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Arangosearch => "arangosearch",
            Self::SearchAlias => "search-alias",
        }
    }
}

/// A search view definition; `properties` are passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: ViewKind,
    #[serde(default)]
    pub properties: Value,
}

// ---------------------------------------------------------------------------
// SchemaCommand
// ---------------------------------------------------------------------------

/// A single declarative schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SchemaCommand {
    CreateCollection {
        name: CollectionName,
        #[serde(default)]
        options: CollectionOptions,
    },
    /// With `if_exists`, a missing collection is not an error.
    DropCollection {
        name: CollectionName,
        #[serde(default)]
        if_exists: bool,
    },
    RenameCollection {
        from: CollectionName,
        to: CollectionName,
    },
    AlterCollection {
        name: CollectionName,
        properties: CollectionProperties,
    },
    /// Convert a collection between document and edge kinds.
    AlterCollectionType {
        name: CollectionName,
        kind: CollectionKind,
    },
    TruncateCollection { name: CollectionName },
    CreateIndex {
        collection: CollectionName,
        definition: IndexDefinition,
    },
    DropIndex {
        collection: CollectionName,
        name: String,
    },
    CreateView { definition: ViewDefinition },
    /// With `if_exists`, a missing view is not an error.
    DropView {
        name: String,
        #[serde(default)]
        if_exists: bool,
    },
    RenameAttribute {
        collection: CollectionName,
        from: FieldPath,
        to: FieldPath,
    },
}

impl SchemaCommand {
    /// The collection or view this command targets.
    pub fn target(&self) -> &str {
        match self {
            Self::CreateCollection { name, .. }
            | Self::DropCollection { name, .. }
            | Self::AlterCollection { name, .. }
            | Self::AlterCollectionType { name, .. }
            | Self::TruncateCollection { name } => name.as_str(),
            Self::RenameCollection { from, .. } => from.as_str(),
            Self::CreateIndex { collection, .. }
            | Self::DropIndex { collection, .. }
            | Self::RenameAttribute { collection, .. } => collection.as_str(),
            Self::CreateView { definition } => &definition.name,
            Self::DropView { name, .. } => name,
        }
    }
}

impl fmt::Display for SchemaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCollection { name, options } => {
                write!(f, "create {} collection {name}", options.kind)
            }
            Self::DropCollection { name, if_exists } => {
                if *if_exists {
                    write!(f, "drop collection {name} if exists")
                } else {
                    write!(f, "drop collection {name}")
                }
            }
            Self::RenameCollection { from, to } => write!(f, "rename collection {from} to {to}"),
            Self::AlterCollection { name, .. } => write!(f, "alter collection {name}"),
            Self::AlterCollectionType { name, kind } => {
                write!(f, "change collection {name} to {kind}")
            }
            Self::TruncateCollection { name } => write!(f, "truncate collection {name}"),
            Self::CreateIndex {
                collection,
                definition,
            } => write!(
                f,
                "create {} index on {collection}",
                definition.kind.api_name()
            ),
            Self::DropIndex { collection, name } => {
                write!(f, "drop index {name} on {collection}")
            }
            Self::CreateView { definition } => write!(f, "create view {}", definition.name),
            Self::DropView { name, .. } => write!(f, "drop view {name}"),
            Self::RenameAttribute {
                collection,
                from,
                to,
            } => write!(f, "rename attribute {from} to {to} on {collection}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn characters() -> CollectionName {
        CollectionName::new("characters").unwrap()
    }

    #[test]
    fn index_name_defaults_to_convention() {
        let def = IndexDefinition::new(
            IndexKind::Persistent,
            vec![FieldPath::single("name"), FieldPath::from("residence.city")],
        );
        assert_eq!(
            def.resolved_name(&characters()),
            "characters_name_residence_city_persistent"
        );
        assert_eq!(def.named("by_name").resolved_name(&characters()), "by_name");
    }

    #[test]
    fn collection_kind_type_codes() {
        assert_eq!(CollectionKind::Document.type_code(), 2);
        assert_eq!(CollectionKind::Edge.type_code(), 3);
    }

    #[test]
    fn command_target() {
        let cmd = SchemaCommand::CreateView {
            definition: ViewDefinition {
                name: "search".into(),
                kind: ViewKind::Arangosearch,
                properties: json!({}),
            },
        };
        assert_eq!(cmd.target(), "search");
        let cmd = SchemaCommand::DropCollection {
            name: characters(),
            if_exists: true,
        };
        assert_eq!(cmd.target(), "characters");
        assert_eq!(cmd.to_string(), "drop collection characters if exists");
    }

    #[test]
    fn command_serde_roundtrip() {
        let cmd = SchemaCommand::CreateIndex {
            collection: characters(),
            definition: IndexDefinition::new(IndexKind::Ttl, vec![FieldPath::single("expires")])
                .sparse(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"create_index\""));
        let back: SchemaCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn drop_if_exists_defaults_to_false() {
        let cmd: SchemaCommand =
            serde_json::from_value(json!({"command": "drop_collection", "name": "characters"}))
                .unwrap();
        assert_eq!(
            cmd,
            SchemaCommand::DropCollection {
                name: characters(),
                if_exists: false
            }
        );
    }
}
