use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CollectionName, Document, KeyType};

/// Attribute names of managed creation/update timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampColumns {
    #[serde(default = "default_created_at")]
    pub created_at: String,
    #[serde(default = "default_updated_at")]
    pub updated_at: String,
}

fn default_created_at() -> String {
    "created_at".to_string()
}

fn default_updated_at() -> String {
    "updated_at".to_string()
}

impl Default for TimestampColumns {
    fn default() -> Self {
        Self {
            created_at: default_created_at(),
            updated_at: default_updated_at(),
        }
    }
}

/// Persistence metadata of an entity type: where it lives and how it is stamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub collection: CollectionName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<TimestampColumns>,
    #[serde(default)]
    pub key_type: KeyType,
}

impl EntityMeta {
    /// An entity without managed timestamps.
    pub fn new(collection: CollectionName) -> Self {
        Self {
            collection,
            timestamps: None,
            key_type: KeyType::default(),
        }
    }

    /// Enable managed timestamps with the conventional attribute names.
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = Some(TimestampColumns::default());
        self
    }

    /// Declare how keys are typed on the application side.
    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    /// Stamp a record about to be inserted.
    ///
    /// The updated attribute is always stamped. The created attribute is
    /// stamped only when neither `values` nor the in-memory `instance` already
    /// carry it. Stamps come first in the returned document; caller values
    /// follow, and only the created attribute may come from the caller.
    pub fn stamp_insert(&self, values: Document, instance: Option<&Document>, now: DateTime<Utc>) -> Document {
        let Some(columns) = &self.timestamps else {
            return values;
        };
        let stamp = timestamp_value(now);
        let mut stamped = Document::new();

        let already_created = values.contains_key(&columns.created_at)
            || instance.is_some_and(|doc| doc.contains_key(&columns.created_at));
        if !already_created {
            stamped.insert(columns.created_at.clone(), stamp.clone());
        }
        stamped.insert(columns.updated_at.clone(), stamp);

        for (key, value) in values {
            if key == columns.updated_at {
                continue;
            }
            stamped.insert(key, value);
        }
        stamped
    }

    /// Stamp the updated attribute of an update payload.
    pub fn stamp_update(&self, mut values: Document, now: DateTime<Utc>) -> Document {
        if let Some(columns) = &self.timestamps {
            values.insert(columns.updated_at.clone(), timestamp_value(now));
        }
        values
    }
}

fn timestamp_value(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true))
}
