use std::future::Future;

use docforge_core::migration::MigrationRecord;
use docforge_core::query::{InsertValues, QueryState};
use docforge_core::schema::SchemaCommand;
use docforge_core::{CollectionName, CompileError, Document};
use serde_json::Value;

use crate::error::BackendError;

/// Turns abstract query state into a backend-native statement.
///
/// Compilers hold configuration only: every call is independent, so one
/// instance may be shared across threads and reused across queries.
pub trait StatementCompiler {
    /// A rendered statement plus its bind parameters.
    type Statement;

    /// Compile a read query.
    fn compile_select(&self, query: &QueryState) -> Result<Self::Statement, CompileError>;

    /// Compile an insert. Returns `None` for an empty insert, which callers
    /// must treat as a successful no-op.
    fn compile_insert(
        &self,
        collection: &CollectionName,
        values: InsertValues,
    ) -> Result<Option<Self::Statement>, CompileError>;

    /// Compile an update of every record matching `query`.
    fn compile_update(
        &self,
        query: &QueryState,
        values: &Document,
    ) -> Result<Self::Statement, CompileError>;

    /// Compile a delete of every record matching `query`.
    fn compile_delete(&self, query: &QueryState) -> Result<Self::Statement, CompileError>;

    /// Compile a delete of one record by key, without iterating.
    fn compile_delete_by_key(
        &self,
        collection: &CollectionName,
        key: &Value,
    ) -> Result<Self::Statement, CompileError>;
}

/// Turns schema commands into backend operations.
///
/// A single command may produce several operations, applied in order.
pub trait SchemaCompiler {
    /// A data statement or an administrative call.
    type Operation;

    /// Compile one schema command.
    fn compile_schema(&self, command: &SchemaCommand) -> Result<Vec<Self::Operation>, CompileError>;

    /// Whether schema commands may run inside a transaction.
    ///
    /// The store manages its own multi-document transactions, so this is
    /// `true` unless an implementation knows better.
    fn supports_schema_transactions(&self) -> bool {
        true
    }
}

/// Bookkeeping of which migrations have run, grouped by batch.
///
/// Every operation is one round trip; nothing is cached between calls.
pub trait Ledger: Send + Sync {
    /// Create the ledger collection. Fails if it already exists.
    fn create_ledger(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Whether the ledger collection exists.
    fn exists(&self) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Drop the ledger collection.
    fn drop_ledger(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Record that `migration` ran in `batch`.
    fn append(
        &self,
        migration: &str,
        batch: u64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Remove every record named `migration`.
    fn remove(&self, migration: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Names of all applied migrations, by batch then name.
    fn list_completed(&self) -> impl Future<Output = Result<Vec<String>, BackendError>> + Send;

    /// Up to `steps` records from batch 1 upward, newest first.
    fn list_batch(
        &self,
        steps: u64,
    ) -> impl Future<Output = Result<Vec<MigrationRecord>, BackendError>> + Send;

    /// Records of the highest batch, by name descending.
    fn latest_batch_records(
        &self,
    ) -> impl Future<Output = Result<Vec<MigrationRecord>, BackendError>> + Send;

    /// All records, by batch then name.
    fn batch_map(&self) -> impl Future<Output = Result<Vec<MigrationRecord>, BackendError>> + Send;

    /// Highest batch number; `0` when nothing has run.
    fn max_batch(&self) -> impl Future<Output = Result<u64, BackendError>> + Send;

    /// `max_batch() + 1`.
    fn next_batch_number(&self) -> impl Future<Output = Result<u64, BackendError>> + Send {
        async move { Ok(self.max_batch().await? + 1) }
    }
}
