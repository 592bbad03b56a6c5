//! Execution collaborators: the seams between compiled output and a store.

use std::future::Future;

use docforge_backend::BackendError;
use serde_json::Value;

use crate::aql::AqlStatement;
use crate::codegen::{AdminCall, SchemaOperation};

/// Result of executing one AQL statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    /// Values produced by the statement's top-level `RETURN`.
    pub rows: Vec<Value>,
    /// Documents written by `INSERT`, `UPDATE` and `REMOVE`.
    pub writes_executed: u64,
}

impl QueryOutcome {
    pub fn new(rows: Vec<Value>, writes_executed: u64) -> Self {
        Self {
            rows,
            writes_executed,
        }
    }
}

/// Runs AQL statements.
pub trait AqlExecutor: Send + Sync {
    /// Execute `statement` and collect every result.
    fn execute(
        &self,
        statement: &AqlStatement,
    ) -> impl Future<Output = Result<QueryOutcome, BackendError>> + Send;
}

/// Performs administrative calls.
pub trait SchemaManager: Send + Sync {
    /// Apply one administrative call.
    fn apply(&self, call: &AdminCall) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Whether a collection with this stored name exists.
    fn has_collection(&self, name: &str) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Whether a view with this name exists.
    fn has_view(&self, name: &str) -> impl Future<Output = Result<bool, BackendError>> + Send;
}

/// Apply compiled schema operations in order, stopping at the first failure.
pub async fn apply_operations<C>(
    connection: &C,
    operations: &[SchemaOperation],
) -> Result<(), BackendError>
where
    C: AqlExecutor + SchemaManager,
{
    for operation in operations {
        match operation {
            SchemaOperation::Admin(call) => connection.apply(call).await?,
            SchemaOperation::Aql(statement) => {
                connection.execute(statement).await?;
            }
        }
        tracing::info!(operation = %operation, "schema operation applied");
    }
    Ok(())
}
