//! Compile-and-execute glue over one connection.

use chrono::Utc;
use docforge_backend::{BackendError, SchemaCompiler, StatementCompiler};
use docforge_core::entity::EntityMeta;
use docforge_core::query::{AggregateFunction, FieldPath, InsertValues, QueryState};
use docforge_core::schema::SchemaCommand;
use docforge_core::{CollectionName, ConnectionConfig, Document};
use serde_json::Value;

use crate::aql::AqlStatement;
use crate::codegen::AqlSchemaCompiler;
use crate::executor::{apply_operations, AqlExecutor, SchemaManager};
use crate::query::{AqlCompiler, AGGREGATE_ATTRIBUTE};

/// Runs compiled statements against a connection.
///
/// Holds no state beyond its compilers and the connection, so every call is
/// independent.
#[derive(Debug)]
pub struct QueryRunner<C> {
    compiler: AqlCompiler,
    schema: AqlSchemaCompiler,
    connection: C,
}

impl<C> QueryRunner<C>
where
    C: AqlExecutor + SchemaManager,
{
    pub fn new(connection: C, config: &ConnectionConfig) -> Self {
        Self {
            compiler: AqlCompiler::new(config),
            schema: AqlSchemaCompiler::new(config),
            connection,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn compiler(&self) -> &AqlCompiler {
        &self.compiler
    }

    /// Every row the query returns.
    pub async fn get(&self, query: &QueryState) -> Result<Vec<Value>, BackendError> {
        let statement = self.compiler.compile_select(query)?;
        Ok(self.connection.execute(&statement).await?.rows)
    }

    /// The first row, if any.
    pub async fn first(&self, query: &QueryState) -> Result<Option<Value>, BackendError> {
        let mut query = query.clone();
        query.limit = Some(1);
        Ok(self.get(&query).await?.into_iter().next())
    }

    /// Insert records and return their generated keys.
    ///
    /// Nothing reaches the connection when there is nothing to insert.
    pub async fn insert(
        &self,
        collection: &CollectionName,
        values: InsertValues,
    ) -> Result<Vec<Value>, BackendError> {
        let statement = self.compiler.compile_insert(collection, values)?;
        self.insert_statement(collection, statement).await
    }

    /// Insert records of an entity, stamping managed timestamps first.
    ///
    /// Records are normalized to batch form before stamping, so stamps stay
    /// ahead of the caller's fields. `instance` is the in-memory entity being
    /// saved, if any; a created stamp it already carries is not replaced.
    pub async fn insert_entity(
        &self,
        meta: &EntityMeta,
        values: InsertValues,
        instance: Option<&Document>,
    ) -> Result<Vec<Value>, BackendError> {
        let now = Utc::now();
        let batch = values
            .into_batch()
            .into_iter()
            .map(|doc| meta.stamp_insert(doc, instance, now))
            .collect();
        let statement = self.compiler.compile_insert_batch(&meta.collection, batch);
        self.insert_statement(&meta.collection, statement).await
    }

    async fn insert_statement(
        &self,
        collection: &CollectionName,
        statement: Option<AqlStatement>,
    ) -> Result<Vec<Value>, BackendError> {
        let Some(statement) = statement else {
            return Ok(Vec::new());
        };
        let outcome = self.connection.execute(&statement).await?;
        tracing::info!(collection = %collection, inserted = outcome.writes_executed, "records inserted");
        Ok(outcome.rows)
    }

    /// Update every matching record; returns the number written.
    pub async fn update(&self, query: &QueryState, values: &Document) -> Result<u64, BackendError> {
        let statement = self.compiler.compile_update(query, values)?;
        Ok(self.connection.execute(&statement).await?.writes_executed)
    }

    /// Update matching records of an entity, stamping its updated attribute.
    pub async fn update_entity(
        &self,
        meta: &EntityMeta,
        query: &QueryState,
        values: Document,
    ) -> Result<u64, BackendError> {
        let values = meta.stamp_update(values, Utc::now());
        self.update(query, &values).await
    }

    /// Delete every matching record; returns the number removed.
    pub async fn delete(&self, query: &QueryState) -> Result<u64, BackendError> {
        let statement = self.compiler.compile_delete(query)?;
        Ok(self.connection.execute(&statement).await?.writes_executed)
    }

    pub async fn delete_by_key(&self, collection: &CollectionName, key: &Value) -> Result<u64, BackendError> {
        let statement = self.compiler.compile_delete_by_key(collection, key)?;
        Ok(self.connection.execute(&statement).await?.writes_executed)
    }

    /// Run `function` over `columns` of the matching records.
    ///
    /// Returns `null` when the store produced no value.
    pub async fn aggregate(
        &self,
        query: &QueryState,
        function: AggregateFunction,
        columns: Vec<FieldPath>,
    ) -> Result<Value, BackendError> {
        let query = query.clone().with_aggregate(function, columns);
        let rows = self.get(&query).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get(AGGREGATE_ATTRIBUTE).cloned())
            .unwrap_or(Value::Null))
    }

    pub async fn count(&self, query: &QueryState) -> Result<u64, BackendError> {
        let value = self.aggregate(query, AggregateFunction::Count, Vec::new()).await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    pub async fn exists(&self, query: &QueryState) -> Result<bool, BackendError> {
        Ok(self.first(query).await?.is_some())
    }

    /// Remove every document of `collection`.
    pub async fn truncate(&self, collection: &CollectionName) -> Result<(), BackendError> {
        self.connection.apply(&self.schema.truncate(collection)).await
    }

    /// Compile and apply one schema command.
    pub async fn apply_schema(&self, command: &SchemaCommand) -> Result<(), BackendError> {
        let operations = self.schema.compile_schema(command)?;
        apply_operations(&self.connection, &operations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use docforge_core::query::Direction;
    use docforge_core::schema::CollectionOptions;
    use serde_json::json;

    fn name(s: &str) -> CollectionName {
        CollectionName::new(s).unwrap()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    async fn runner() -> QueryRunner<MemoryDatabase> {
        let runner = QueryRunner::new(MemoryDatabase::new(), &ConnectionConfig::default().with_prefix("got_"));
        runner
            .apply_schema(&SchemaCommand::CreateCollection {
                name: name("characters"),
                options: CollectionOptions::default(),
            })
            .await
            .unwrap();
        runner
            .insert(
                &name("characters"),
                InsertValues::Records(vec![
                    doc(json!({"_key": "ned", "name": "Ned", "surname": "Stark", "age": 41})),
                    doc(json!({"_key": "arya", "name": "Arya", "surname": "Stark", "age": 11})),
                    doc(json!({"_key": "tyrion", "name": "Tyrion", "surname": "Lannister", "age": 32})),
                ]),
            )
            .await
            .unwrap();
        runner
    }

    fn characters() -> QueryState {
        QueryState::new(name("characters"))
    }

    #[tokio::test]
    async fn insert_returns_generated_keys() {
        let runner = runner().await;
        let keys = runner
            .insert(&name("characters"), InsertValues::Record(doc(json!({"name": "Sansa"}))))
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].is_string());
    }

    #[tokio::test]
    async fn empty_insert_skips_the_connection() {
        let runner = runner().await;
        let before = runner.connection().execution_count();
        let keys = runner
            .insert(&name("characters"), InsertValues::Records(Vec::new()))
            .await
            .unwrap();
        assert!(keys.is_empty());
        assert_eq!(runner.connection().execution_count(), before);
    }

    #[tokio::test]
    async fn get_filters_and_sorts() {
        let runner = runner().await;
        let query = characters()
            .where_eq("surname", json!("Stark"))
            .order_by("age", Direction::Ascending)
            .select(&["name"]);
        let rows = runner.get(&query).await.unwrap();
        assert_eq!(rows, vec![json!({"name": "Arya"}), json!({"name": "Ned"})]);
    }

    #[tokio::test]
    async fn count_and_aggregate() {
        let runner = runner().await;
        assert_eq!(runner.count(&characters()).await.unwrap(), 3);
        let oldest = runner
            .aggregate(&characters(), AggregateFunction::Max, vec![FieldPath::single("age")])
            .await
            .unwrap();
        assert_eq!(oldest, json!(41));
    }

    #[tokio::test]
    async fn update_and_delete_report_writes() {
        let runner = runner().await;
        let updated = runner
            .update(&characters().where_eq("surname", json!("Stark")), &doc(json!({"alive": true})))
            .await
            .unwrap();
        assert_eq!(updated, 2);
        let removed = runner.delete_by_key(&name("characters"), &json!("tyrion")).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(runner.count(&characters()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn entity_inserts_are_stamped() {
        let runner = runner().await;
        let meta = EntityMeta::new(name("characters")).with_timestamps();
        runner
            .insert_entity(&meta, InsertValues::Record(doc(json!({"_key": "jon", "name": "Jon"}))), None)
            .await
            .unwrap();
        let jon = runner
            .first(&characters().where_eq("_key", json!("jon")))
            .await
            .unwrap()
            .unwrap();
        assert!(jon.get("created_at").is_some());
        assert!(jon.get("updated_at").is_some());
    }

    fn field_names(doc: &Document) -> Vec<&str> {
        doc.keys()
            .map(String::as_str)
            .filter(|name| !name.starts_with('_'))
            .collect()
    }

    #[tokio::test]
    async fn batch_entity_inserts_keep_stamps_first() {
        let runner = runner().await;
        let meta = EntityMeta::new(name("houses")).with_timestamps();
        runner
            .apply_schema(&SchemaCommand::CreateCollection {
                name: name("houses"),
                options: CollectionOptions::default(),
            })
            .await
            .unwrap();
        runner
            .insert_entity(
                &meta,
                InsertValues::Records(vec![
                    doc(json!({"words": "Winter is coming", "age": 8000})),
                    doc(json!({"age": 300, "words": "Hear me roar"})),
                ]),
                None,
            )
            .await
            .unwrap();
        for house in runner.connection().documents("got_houses").unwrap() {
            assert_eq!(field_names(&house), ["created_at", "updated_at", "age", "words"]);
        }
    }

    #[tokio::test]
    async fn entity_insert_respects_instance_created_stamp() {
        let runner = runner().await;
        let meta = EntityMeta::new(name("characters")).with_timestamps();
        let instance = doc(json!({"created_at": "2020-01-01T00:00:00Z"}));
        runner
            .insert_entity(
                &meta,
                InsertValues::Record(doc(json!({"_key": "bran", "name": "Bran"}))),
                Some(&instance),
            )
            .await
            .unwrap();
        let bran = runner
            .first(&characters().where_eq("_key", json!("bran")))
            .await
            .unwrap()
            .unwrap();
        assert!(bran.get("created_at").is_none());
        assert!(bran.get("updated_at").is_some());
    }

    #[tokio::test]
    async fn truncate_empties_the_collection() {
        let runner = runner().await;
        runner.truncate(&name("characters")).await.unwrap();
        assert!(!runner.exists(&characters()).await.unwrap());
    }
}
