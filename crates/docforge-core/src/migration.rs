use std::fmt;

use serde::{Deserialize, Serialize};

/// Conventional name of the ledger collection.
pub const DEFAULT_LEDGER_COLLECTION: &str = "migrations";

/// One applied migration, as stored in the ledger collection.
///
/// No two records should share a `migration` name; the store does not enforce
/// this, callers do.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub migration: String,
    pub batch: u64,
}

impl MigrationRecord {
    pub fn new(migration: impl Into<String>, batch: u64) -> Self {
        Self {
            migration: migration.into(),
            batch,
        }
    }
}

impl fmt::Display for MigrationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (batch {})", self.migration, self.batch)
    }
}
