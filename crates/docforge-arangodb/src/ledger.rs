//! The migration ledger: one `{migration, batch}` document per applied
//! migration, stored in the (prefixed) ledger collection.
//!
//! Every operation is a single round trip built directly with the AQL
//! builder; nothing is cached between calls.

use docforge_backend::{BackendError, Ledger};
use docforge_core::migration::MigrationRecord;
use docforge_core::query::{Direction, Operator};
use docforge_core::schema::CollectionOptions;
use docforge_core::ConnectionConfig;
use serde_json::{json, Value};

use crate::aql::{AqlExpr, AqlQuery, AqlStatement, Bindings, SortKey};
use crate::codegen::AdminCall;
use crate::executor::{AqlExecutor, QueryOutcome, SchemaManager};

const ENTRY: &str = "entry";

/// Migration bookkeeping over any connection that can both execute AQL and
/// manage collections.
#[derive(Debug)]
pub struct MigrationLedger<C> {
    connection: C,
    collection: String,
}

impl<C> MigrationLedger<C>
where
    C: AqlExecutor + SchemaManager,
{
    /// A ledger over `{prefix}{migrations}` from `config`.
    pub fn new(connection: C, config: &ConnectionConfig) -> Self {
        Self {
            connection,
            collection: format!("{}{}", config.prefix, config.migrations),
        }
    }

    /// Stored name of the ledger collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn into_connection(self) -> C {
        self.connection
    }

    fn entries(&self) -> AqlQuery {
        AqlQuery::new().for_in(ENTRY, AqlExpr::Collection(self.collection.clone()))
    }

    fn sorted(&self, direction: Direction) -> Vec<SortKey> {
        ["batch", "migration"]
            .into_iter()
            .map(|attribute| SortKey::Expr {
                expr: AqlExpr::field(ENTRY, attribute),
                direction,
            })
            .collect()
    }

    fn record_projection() -> AqlExpr {
        AqlExpr::Object(vec![
            ("migration".to_string(), AqlExpr::field(ENTRY, "migration")),
            ("batch".to_string(), AqlExpr::field(ENTRY, "batch")),
        ])
    }

    async fn run(&self, query: AqlQuery, bindings: Bindings) -> Result<QueryOutcome, BackendError> {
        let statement = AqlStatement::new(query, bindings);
        tracing::debug!(statement = %statement, "ledger statement");
        self.connection.execute(&statement).await
    }

    async fn records(&self, query: AqlQuery, bindings: Bindings) -> Result<Vec<MigrationRecord>, BackendError> {
        let statement = AqlStatement::new(query, bindings);
        tracing::debug!(statement = %statement, "ledger statement");
        let outcome = self.connection.execute(&statement).await?;
        outcome
            .rows
            .into_iter()
            .map(|row| decode_record(row, &statement))
            .collect()
    }
}

fn decode_record(row: Value, statement: &AqlStatement) -> Result<MigrationRecord, BackendError> {
    serde_json::from_value(row).map_err(|err| BackendError::Execution {
        connection: "ledger".to_string(),
        statement: statement.text(),
        bindings: statement.bind_vars().to_string(),
        message: format!("malformed ledger record: {err}"),
    })
}

impl<C> Ledger for MigrationLedger<C>
where
    C: AqlExecutor + SchemaManager,
{
    async fn create_ledger(&self) -> Result<(), BackendError> {
        self.connection
            .apply(&AdminCall::CreateCollection {
                name: self.collection.clone(),
                options: CollectionOptions::default(),
            })
            .await?;
        tracing::info!(collection = %self.collection, "migration ledger created");
        Ok(())
    }

    async fn exists(&self) -> Result<bool, BackendError> {
        self.connection.has_collection(&self.collection).await
    }

    async fn drop_ledger(&self) -> Result<(), BackendError> {
        self.connection
            .apply(&AdminCall::DropCollection {
                name: self.collection.clone(),
                if_exists: false,
            })
            .await?;
        tracing::info!(collection = %self.collection, "migration ledger dropped");
        Ok(())
    }

    async fn append(&self, migration: &str, batch: u64) -> Result<(), BackendError> {
        let mut bindings = Bindings::new();
        let name = bindings.bind_named("migration", json!(migration))?;
        let number = bindings.bind_named("batch", json!(batch))?;
        let query = AqlQuery::new().insert(
            AqlExpr::Object(vec![
                ("migration".to_string(), name),
                ("batch".to_string(), number),
            ]),
            self.collection.clone(),
        );
        self.run(query, bindings).await?;
        tracing::info!(migration, batch, "migration recorded");
        Ok(())
    }

    async fn remove(&self, migration: &str) -> Result<(), BackendError> {
        let mut bindings = Bindings::new();
        let name = bindings.bind_named("migration", json!(migration))?;
        let query = self
            .entries()
            .filter(AqlExpr::compare(AqlExpr::field(ENTRY, "migration"), Operator::Eq, name))
            .remove(AqlExpr::var(ENTRY), self.collection.clone());
        let outcome = self.run(query, bindings).await?;
        tracing::info!(migration, removed = outcome.writes_executed, "migration record removed");
        Ok(())
    }

    async fn list_completed(&self) -> Result<Vec<String>, BackendError> {
        let query = self
            .entries()
            .sort(self.sorted(Direction::Ascending))
            .return_value(AqlExpr::field(ENTRY, "migration"));
        let outcome = self.run(query, Bindings::new()).await?;
        Ok(outcome
            .rows
            .into_iter()
            .filter_map(|row| match row {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect())
    }

    /// Caps the number of records, not batches: `steps = 2` over batches
    /// `[1, 2, 2, 3]` yields the batch 3 record and one batch 2 record.
    async fn list_batch(&self, steps: u64) -> Result<Vec<MigrationRecord>, BackendError> {
        let mut bindings = Bindings::new();
        let minimum = bindings.bind_named("minimum", json!(1))?;
        let query = self
            .entries()
            .filter(AqlExpr::compare(AqlExpr::field(ENTRY, "batch"), Operator::Gte, minimum))
            .sort(self.sorted(Direction::Descending))
            .limit(None, steps)
            .return_value(Self::record_projection());
        self.records(query, bindings).await
    }

    async fn latest_batch_records(&self) -> Result<Vec<MigrationRecord>, BackendError> {
        let max = AqlQuery::new()
            .for_in("batchEntry", AqlExpr::Collection(self.collection.clone()))
            .return_value(AqlExpr::field("batchEntry", "batch"));
        let query = AqlQuery::new()
            .let_var("maxBatch", AqlExpr::call("MAX", vec![AqlExpr::subquery(max)]))
            .for_in(ENTRY, AqlExpr::Collection(self.collection.clone()))
            .filter(AqlExpr::compare(
                AqlExpr::field(ENTRY, "batch"),
                Operator::Eq,
                AqlExpr::var("maxBatch"),
            ))
            .sort(vec![SortKey::Expr {
                expr: AqlExpr::field(ENTRY, "migration"),
                direction: Direction::Descending,
            }])
            .return_value(Self::record_projection());
        self.records(query, Bindings::new()).await
    }

    async fn batch_map(&self) -> Result<Vec<MigrationRecord>, BackendError> {
        let query = self
            .entries()
            .sort(self.sorted(Direction::Ascending))
            .return_value(Self::record_projection());
        self.records(query, Bindings::new()).await
    }

    async fn max_batch(&self) -> Result<u64, BackendError> {
        let batches = self
            .entries()
            .return_value(AqlExpr::field(ENTRY, "batch"));
        let query = AqlQuery::new().return_value(AqlExpr::call("MAX", vec![AqlExpr::subquery(batches)]));
        let statement = AqlStatement::new(query, Bindings::new());
        tracing::debug!(statement = %statement, "ledger statement");
        let outcome = self.connection.execute(&statement).await?;
        // MAX over an empty ledger is null, which counts as batch 0.
        match outcome.rows.first() {
            None | Some(Value::Null) => Ok(0),
            Some(value) => value.as_u64().ok_or_else(|| BackendError::Execution {
                connection: "ledger".to_string(),
                statement: statement.text(),
                bindings: statement.bind_vars().to_string(),
                message: format!("malformed ledger record: batch {value} is not a non-negative integer"),
            }),
        }
    }
}
