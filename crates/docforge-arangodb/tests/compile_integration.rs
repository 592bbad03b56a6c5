use docforge_arangodb::relation::{where_doesnt_have, with_count, with_exists};
use docforge_arangodb::{AqlCompiler, MemoryDatabase, QueryRunner, SchemaOperation};
use docforge_backend::{SchemaCompiler, StatementCompiler};
use docforge_core::query::{Direction, InsertValues, Operator, Predicate, QueryState};
use docforge_core::relation::{RelationDescriptor, RelationRegistry};
use docforge_core::schema::{
    CollectionKind, CollectionOptions, IndexDefinition, IndexKind, SchemaCommand,
};
use docforge_core::{CollectionName, ConnectionConfig, Document};
use serde_json::{json, Value};

fn name(s: &str) -> CollectionName {
    CollectionName::new(s).unwrap()
}

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn characters() -> QueryState {
    QueryState::new(name("characters"))
}

fn compile(query: &QueryState) -> String {
    AqlCompiler::with_prefix("got_")
        .compile_select(query)
        .unwrap()
        .text()
}

// ---------------------------------------------------------------------------
// Compilation properties
// ---------------------------------------------------------------------------

#[test]
fn empty_predicates_emit_no_filter() {
    let text = compile(&characters().order_by("name", Direction::Ascending));
    assert!(!text.contains("FILTER"));
}

#[test]
fn parsed_single_equals_renders_double_equals() {
    let op: Operator = "=".parse().unwrap();
    let text = compile(&characters().where_op("name", op, json!("Ned")));
    assert!(text.contains("characterDoc.name == @value1"));
    assert!(!text.contains(" = @"));
}

#[test]
fn limit_and_offset_forms() {
    assert!(compile(&characters().with_offset(10).with_limit(5)).contains("LIMIT 10, 5"));
    let limit_only = compile(&characters().with_limit(5));
    assert!(limit_only.contains("LIMIT 5"));
    assert!(!limit_only.contains(','));
}

#[test]
fn offset_without_limit_emits_nothing() {
    let text = compile(&characters().with_offset(10));
    assert_eq!(text, "FOR characterDoc IN got_characters RETURN characterDoc");
}

#[test]
fn nested_or_groups_are_parenthesized() {
    let query = characters().where_eq("alive", json!(true)).where_nested(
        docforge_core::query::Boolean::And,
        vec![
            Predicate::basic("surname", Operator::Eq, json!("Stark")),
            Predicate::basic("surname", Operator::Eq, json!("Snow")).or_else(),
        ],
    );
    assert!(compile(&query).contains(
        "FILTER characterDoc.alive == @value1 AND (characterDoc.surname == @value2 OR characterDoc.surname == @value3)"
    ));
}

#[test]
fn batch_insert_field_order_is_stable() {
    let compiler = AqlCompiler::with_prefix("got_");
    let batch = || {
        InsertValues::Records(vec![
            doc(json!({"surname": "Stark", "name": "Ned", "age": 41})),
            doc(json!({"name": "Arya", "age": 11, "surname": "Stark"})),
        ])
    };
    let first = compiler.compile_insert(&name("characters"), batch()).unwrap().unwrap();
    let second = compiler.compile_insert(&name("characters"), batch()).unwrap().unwrap();
    let rendered = |stmt: &docforge_arangodb::AqlStatement| stmt.bind_vars().to_string();
    assert_eq!(rendered(&first), rendered(&second));
    let records = first.bindings.get("value1").unwrap().as_array().unwrap().clone();
    for record in records {
        let keys: Vec<&String> = record.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["age", "name", "surname"]);
    }
}

#[test]
fn schema_commands_report_transaction_support() {
    let compiler = docforge_arangodb::AqlSchemaCompiler::with_prefix("got_");
    assert!(compiler.supports_schema_transactions());
    let ops = compiler
        .compile_schema(&SchemaCommand::CreateIndex {
            collection: name("characters"),
            definition: IndexDefinition::new(IndexKind::Persistent, vec!["name".into()]),
        })
        .unwrap();
    assert!(matches!(ops.as_slice(), [SchemaOperation::Admin(_)]));
}

// ---------------------------------------------------------------------------
// End to end against the in-memory engine
// ---------------------------------------------------------------------------

fn registry() -> RelationRegistry {
    RelationRegistry::new().register(RelationDescriptor::has_many(
        "children",
        name("characters"),
        name("characters"),
        "parent_key",
    ))
}

async fn westeros() -> QueryRunner<MemoryDatabase> {
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
                doc(json!({"_key": "ned", "name": "Ned"})),
                doc(json!({"_key": "robb", "name": "Robb", "parent_key": "ned"})),
                doc(json!({"_key": "arya", "name": "Arya", "parent_key": "ned"})),
                doc(json!({"_key": "jon", "name": "Jon"})),
            ]),
        )
        .await
        .unwrap();
    runner
}

#[tokio::test]
async fn empty_insert_never_reaches_the_executor() {
    let runner = westeros().await;
    let before = runner.connection().execution_count();
    let keys = runner
        .insert(&name("characters"), InsertValues::Record(Document::new()))
        .await
        .unwrap();
    assert!(keys.is_empty());
    assert_eq!(runner.connection().execution_count(), before);
}

#[tokio::test]
async fn with_count_runs_in_one_round_trip() {
    let runner = westeros().await;
    let query = with_count(
        characters()
            .select(&["name"])
            .order_by("name", Direction::Ascending),
        &registry(),
        &["children"],
    )
    .unwrap();
    let before = runner.connection().execution_count();
    let rows = runner.get(&query).await.unwrap();
    assert_eq!(runner.connection().execution_count(), before + 1);
    assert_eq!(
        rows,
        vec![
            json!({"name": "Arya", "children_count": 0}),
            json!({"name": "Jon", "children_count": 0}),
            json!({"name": "Ned", "children_count": 2}),
            json!({"name": "Robb", "children_count": 0}),
        ]
    );
}

#[tokio::test]
async fn with_exists_and_where_doesnt_have() {
    let runner = westeros().await;
    let parents = with_exists(characters().select(&["name"]), &registry(), &["children"]).unwrap();
    let rows = runner
        .get(&parents.where_eq("_key", json!("ned")))
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"name": "Ned", "children_exists": true})]);

    let childless = where_doesnt_have(characters(), &registry(), "children").unwrap();
    assert_eq!(runner.count(&childless).await.unwrap(), 3);
}

#[tokio::test]
async fn where_has_count_filters_parents() {
    let runner = westeros().await;
    let query = docforge_arangodb::relation::where_has(
        characters().select(&["name"]),
        &registry(),
        "children",
        Operator::Gte,
        2,
    )
    .unwrap();
    assert_eq!(runner.get(&query).await.unwrap(), vec![json!({"name": "Ned"})]);
}

#[tokio::test]
async fn alter_to_edge_rejects_plain_documents() {
    let runner = westeros().await;
    runner
        .apply_schema(&SchemaCommand::AlterCollectionType {
            name: name("characters"),
            kind: CollectionKind::Edge,
        })
        .await
        .unwrap_err();
    // The copy fails before the source is dropped.
    assert_eq!(runner.count(&characters()).await.unwrap(), 4);
    assert_eq!(
        runner.connection().collection_kind("got_characters").unwrap(),
        CollectionKind::Document
    );
}

#[tokio::test]
async fn alter_to_edge_moves_edges() {
    let runner = QueryRunner::new(MemoryDatabase::new(), &ConnectionConfig::default());
    runner
        .apply_schema(&SchemaCommand::CreateCollection {
            name: name("allegiances"),
            options: CollectionOptions::default(),
        })
        .await
        .unwrap();
    runner
        .insert(
            &name("allegiances"),
            InsertValues::Record(doc(json!({
                "_key": "ned-stark",
                "_from": "characters/ned",
                "_to": "houses/stark",
            }))),
        )
        .await
        .unwrap();
    runner
        .apply_schema(&SchemaCommand::AlterCollectionType {
            name: name("allegiances"),
            kind: CollectionKind::Edge,
        })
        .await
        .unwrap();

    let db = runner.connection();
    assert_eq!(db.collection_kind("allegiances").unwrap(), CollectionKind::Edge);
    let edges = db.documents("allegiances").unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["_key"], "ned-stark");
    assert_eq!(edges[0]["_to"], "houses/stark");
}

#[tokio::test]
async fn rename_attribute_moves_values() {
    let runner = westeros().await;
    runner
        .apply_schema(&SchemaCommand::RenameAttribute {
            collection: name("characters"),
            from: "parent_key".into(),
            to: "father_key".into(),
        })
        .await
        .unwrap();
    let robb = runner
        .first(&characters().where_eq("_key", json!("robb")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(robb["father_key"], json!("ned"));
    assert!(robb.get("parent_key").is_none());
    let jon = runner
        .first(&characters().where_eq("_key", json!("jon")))
        .await
        .unwrap()
        .unwrap();
    assert!(jon.get("father_key").is_none());
}
