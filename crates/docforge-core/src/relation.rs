use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{CollectionName, KeyType};

/// One or many related records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "one"),
            Self::Many => write!(f, "many"),
        }
    }
}

/// A junction collection recording many-to-many membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pivot {
    pub collection: CollectionName,
    /// Pivot attribute holding the parent's key.
    pub foreign_pivot_key: String,
    /// Pivot attribute holding the related record's key.
    pub related_pivot_key: String,
}

/// How the related collection links to the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationLink {
    /// `related.foreign_key == parent.local_key`.
    HasOneOrMany {
        foreign_key: String,
        local_key: String,
    },
    /// `related.owner_key == parent.foreign_key`.
    BelongsTo {
        foreign_key: String,
        owner_key: String,
    },
    /// Membership recorded in a pivot collection.
    BelongsToMany {
        pivot: Pivot,
        parent_key: String,
        related_key: String,
    },
}

/// Polymorphic type discriminator stored on the related side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Morph {
    /// Attribute holding the parent's type name.
    pub type_attribute: String,
    /// Value identifying the parent type.
    pub type_value: String,
}

/// A named relation from a parent collection to a related one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub parent: CollectionName,
    pub related: CollectionName,
    pub link: RelationLink,
    pub cardinality: Cardinality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morph: Option<Morph>,
    #[serde(default)]
    pub key_type: KeyType,
}

impl RelationDescriptor {
    /// `parent` has one `related` whose `foreign_key` holds the parent `_key`.
    pub fn has_one(
        name: impl Into<String>,
        parent: CollectionName,
        related: CollectionName,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::has(name, parent, related, foreign_key, Cardinality::One)
    }

    /// `parent` has many `related` whose `foreign_key` holds the parent `_key`.
    pub fn has_many(
        name: impl Into<String>,
        parent: CollectionName,
        related: CollectionName,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::has(name, parent, related, foreign_key, Cardinality::Many)
    }

    fn has(
        name: impl Into<String>,
        parent: CollectionName,
        related: CollectionName,
        foreign_key: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            parent,
            related,
            link: RelationLink::HasOneOrMany {
                foreign_key: foreign_key.into(),
                local_key: "_key".to_string(),
            },
            cardinality,
            morph: None,
            key_type: KeyType::default(),
        }
    }

    /// `parent.foreign_key` holds the `_key` of one `related`.
    pub fn belongs_to(
        name: impl Into<String>,
        parent: CollectionName,
        related: CollectionName,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parent,
            related,
            link: RelationLink::BelongsTo {
                foreign_key: foreign_key.into(),
                owner_key: "_key".to_string(),
            },
            cardinality: Cardinality::One,
            morph: None,
            key_type: KeyType::default(),
        }
    }

    /// Many-to-many membership through `pivot`.
    pub fn belongs_to_many(
        name: impl Into<String>,
        parent: CollectionName,
        related: CollectionName,
        pivot: Pivot,
    ) -> Self {
        Self {
            name: name.into(),
            parent,
            related,
            link: RelationLink::BelongsToMany {
                pivot,
                parent_key: "_key".to_string(),
                related_key: "_key".to_string(),
            },
            cardinality: Cardinality::Many,
            morph: None,
            key_type: KeyType::default(),
        }
    }

    /// Restrict related records to those tagged with the parent's type.
    pub fn with_morph(mut self, type_attribute: impl Into<String>, type_value: impl Into<String>) -> Self {
        self.morph = Some(Morph {
            type_attribute: type_attribute.into(),
            type_value: type_value.into(),
        });
        self
    }

    /// Override the local (has-one/many) or owner (belongs-to) key.
    pub fn with_local_key(mut self, key: impl Into<String>) -> Self {
        match &mut self.link {
            RelationLink::HasOneOrMany { local_key, .. } => *local_key = key.into(),
            RelationLink::BelongsTo { owner_key, .. } => *owner_key = key.into(),
            RelationLink::BelongsToMany { parent_key, .. } => *parent_key = key.into(),
        }
        self
    }

    /// Declare how keys are typed on the application side.
    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    /// The pivot collection, for many-to-many relations.
    pub fn pivot(&self) -> Option<&Pivot> {
        match &self.link {
            RelationLink::BelongsToMany { pivot, .. } => Some(pivot),
            _ => None,
        }
    }
}

/// Relations declared on one parent collection, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRegistry {
    relations: BTreeMap<String, RelationDescriptor>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relation under its own name, replacing any previous one.
    pub fn register(mut self, relation: RelationDescriptor) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    /// Look up a relation by name.
    pub fn get(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.get(name)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
