//! In-process engine that evaluates the AQL this crate produces.
//!
//! Supports the operations and functions the compilers emit; raw expressions
//! and regular expressions are reported as unsupported. Every executed
//! statement is recorded so tests can assert on round trips.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use docforge_backend::BackendError;
use docforge_core::query::{Direction, Operator};
use docforge_core::schema::{CollectionKind, CollectionProperties, IndexDefinition, ViewDefinition};
use docforge_core::Document;
use serde_json::Value;

use crate::aql::{AqlExpr, AqlOperation, AqlQuery, AqlStatement, Collect, Logical, SortKey};
use crate::codegen::AdminCall;
use crate::executor::{AqlExecutor, QueryOutcome, SchemaManager};
use crate::value::{aggregate, compare_values, is_truthy, like, values_equal};

const CONNECTION_NAME: &str = "memory";

type Env = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
struct StoredCollection {
    kind: CollectionKind,
    properties: CollectionProperties,
    documents: Vec<Document>,
    indexes: BTreeMap<String, IndexDefinition>,
}

#[derive(Debug, Clone, Default)]
struct Store {
    collections: BTreeMap<String, StoredCollection>,
    views: BTreeMap<String, ViewDefinition>,
    next_key: u64,
}

/// An in-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    store: Mutex<Store>,
    executed: Mutex<Vec<String>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> Result<MutexGuard<'_, Store>, BackendError> {
        self.store.lock().map_err(|_| BackendError::Internal {
            message: "memory store lock poisoned".to_string(),
        })
    }

    /// Texts of every statement executed so far, oldest first.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Number of statements executed so far.
    pub fn execution_count(&self) -> usize {
        self.executed.lock().map(|log| log.len()).unwrap_or_default()
    }

    /// A snapshot of the documents in `collection`.
    pub fn documents(&self, collection: &str) -> Result<Vec<Document>, BackendError> {
        let store = self.store()?;
        store
            .collections
            .get(collection)
            .map(|c| c.documents.clone())
            .ok_or_else(|| BackendError::CollectionNotFound {
                collection: collection.to_string(),
            })
    }

    /// The kind of `collection`.
    pub fn collection_kind(&self, collection: &str) -> Result<CollectionKind, BackendError> {
        let store = self.store()?;
        store
            .collections
            .get(collection)
            .map(|c| c.kind)
            .ok_or_else(|| BackendError::CollectionNotFound {
                collection: collection.to_string(),
            })
    }

    /// Names of the indexes on `collection`.
    pub fn index_names(&self, collection: &str) -> Result<Vec<String>, BackendError> {
        let store = self.store()?;
        store
            .collections
            .get(collection)
            .map(|c| c.indexes.keys().cloned().collect())
            .ok_or_else(|| BackendError::CollectionNotFound {
                collection: collection.to_string(),
            })
    }

    fn record(&self, statement: &AqlStatement) {
        if let Ok(mut log) = self.executed.lock() {
            log.push(statement.text());
        }
    }

    fn run(&self, statement: &AqlStatement) -> Result<QueryOutcome, BackendError> {
        self.record(statement);
        let mut store = self.store()?;
        // Writes land in a staged copy that replaces the store only on success.
        let mut staged = store.clone();
        let mut evaluator = Evaluator {
            store: &mut staged,
            statement,
            writes: 0,
        };
        let rows = evaluator.run(&statement.query, &Env::new())?;
        let writes = evaluator.writes;
        *store = staged;
        tracing::debug!(statement = %statement, rows = rows.len(), writes, "memory statement executed");
        Ok(QueryOutcome::new(rows, writes))
    }

    fn admin(&self, call: &AdminCall) -> Result<(), BackendError> {
        let mut store = self.store()?;
        match call {
            AdminCall::CreateCollection { name, options } => {
                if store.collections.contains_key(name) {
                    return Err(BackendError::CollectionAlreadyExists {
                        collection: name.clone(),
                    });
                }
                store.collections.insert(
                    name.clone(),
                    StoredCollection {
                        kind: options.kind,
                        properties: CollectionProperties {
                            wait_for_sync: options.wait_for_sync,
                            schema: options.schema.clone(),
                        },
                        ..StoredCollection::default()
                    },
                );
            }
            AdminCall::DropCollection { name, if_exists } => {
                if store.collections.remove(name).is_none() && !if_exists {
                    return Err(not_found(name));
                }
            }
            AdminCall::RenameCollection { from, to } => {
                if store.collections.contains_key(to) {
                    return Err(BackendError::CollectionAlreadyExists {
                        collection: to.clone(),
                    });
                }
                let mut collection = store.collections.remove(from).ok_or_else(|| not_found(from))?;
                for doc in &mut collection.documents {
                    let key = doc.get("_key").and_then(Value::as_str).unwrap_or_default().to_string();
                    doc.insert("_id".to_string(), Value::String(format!("{to}/{key}")));
                }
                store.collections.insert(to.clone(), collection);
            }
            AdminCall::UpdateProperties { name, properties } => {
                let collection = store.collections.get_mut(name).ok_or_else(|| not_found(name))?;
                if properties.wait_for_sync.is_some() {
                    collection.properties.wait_for_sync = properties.wait_for_sync;
                }
                if properties.schema.is_some() {
                    collection.properties.schema = properties.schema.clone();
                }
            }
            AdminCall::TruncateCollection { name } => {
                let collection = store.collections.get_mut(name).ok_or_else(|| not_found(name))?;
                collection.documents.clear();
            }
            AdminCall::CreateIndex {
                collection,
                name,
                definition,
            } => {
                let target = store
                    .collections
                    .get_mut(collection)
                    .ok_or_else(|| not_found(collection))?;
                target.indexes.insert(name.clone(), definition.clone());
            }
            AdminCall::DropIndex { collection, name } => {
                let target = store
                    .collections
                    .get_mut(collection)
                    .ok_or_else(|| not_found(collection))?;
                if target.indexes.remove(name).is_none() {
                    return Err(BackendError::IndexNotFound {
                        collection: collection.clone(),
                        index: name.clone(),
                    });
                }
            }
            AdminCall::CreateView { definition } => {
                if store.views.contains_key(&definition.name) {
                    return Err(BackendError::ViewAlreadyExists {
                        view: definition.name.clone(),
                    });
                }
                store.views.insert(definition.name.clone(), definition.clone());
            }
            AdminCall::DropView { name, if_exists } => {
                if store.views.remove(name).is_none() && !if_exists {
                    return Err(BackendError::ViewNotFound { view: name.clone() });
                }
            }
        }
        tracing::info!(call = %call, "memory admin call applied");
        Ok(())
    }
}

fn same_group(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

fn not_found(collection: &str) -> BackendError {
    BackendError::CollectionNotFound {
        collection: collection.to_string(),
    }
}

impl AqlExecutor for MemoryDatabase {
    async fn execute(&self, statement: &AqlStatement) -> Result<QueryOutcome, BackendError> {
        self.run(statement)
    }
}

impl SchemaManager for MemoryDatabase {
    async fn apply(&self, call: &AdminCall) -> Result<(), BackendError> {
        self.admin(call)
    }

    async fn has_collection(&self, name: &str) -> Result<bool, BackendError> {
        Ok(self.store()?.collections.contains_key(name))
    }

    async fn has_view(&self, name: &str) -> Result<bool, BackendError> {
        Ok(self.store()?.views.contains_key(name))
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

struct Evaluator<'a> {
    store: &'a mut Store,
    statement: &'a AqlStatement,
    writes: u64,
}

impl Evaluator<'_> {
    fn fail(&self, message: impl Into<String>) -> BackendError {
        BackendError::Execution {
            connection: CONNECTION_NAME.to_string(),
            statement: self.statement.text(),
            bindings: self.statement.bind_vars().to_string(),
            message: message.into(),
        }
    }

    fn collection(&self, name: &str) -> Result<&StoredCollection, BackendError> {
        self.store.collections.get(name).ok_or_else(|| not_found(name))
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut StoredCollection, BackendError> {
        self.store
            .collections
            .get_mut(name)
            .ok_or_else(|| not_found(name))
    }

    /// Run a query with `outer` variables visible; returns its `RETURN` values.
    fn run(&mut self, query: &AqlQuery, outer: &Env) -> Result<Vec<Value>, BackendError> {
        let mut rows = vec![outer.clone()];
        let mut output = Vec::new();
        for operation in query.operations() {
            match operation {
                AqlOperation::For { variable, source } => {
                    let mut next = Vec::new();
                    for env in rows {
                        for item in self.iterate(source, &env)? {
                            let mut row = env.clone();
                            row.insert(variable.clone(), item);
                            next.push(row);
                        }
                    }
                    rows = next;
                }
                AqlOperation::Filter(condition) => {
                    let mut kept = Vec::with_capacity(rows.len());
                    for env in rows {
                        if is_truthy(&self.eval(condition, &env)?) {
                            kept.push(env);
                        }
                    }
                    rows = kept;
                }
                AqlOperation::Let { variable, value } => {
                    for env in &mut rows {
                        let computed = self.eval(value, env)?;
                        env.insert(variable.clone(), computed);
                    }
                }
                AqlOperation::Collect(collect) => rows = self.collect(collect, rows, outer)?,
                AqlOperation::Sort(keys) => rows = self.sort(keys, rows)?,
                AqlOperation::Limit { offset, count } => {
                    let skip = usize::try_from(offset.unwrap_or(0)).unwrap_or(usize::MAX);
                    let take = usize::try_from(*count).unwrap_or(usize::MAX);
                    rows = rows.into_iter().skip(skip).take(take).collect();
                }
                AqlOperation::Return { distinct, value } => {
                    for env in &rows {
                        let result = self.eval(value, env)?;
                        if *distinct && output.iter().any(|seen| values_equal(seen, &result)) {
                            continue;
                        }
                        output.push(result);
                    }
                }
                AqlOperation::Insert {
                    document,
                    collection,
                } => {
                    for env in &mut rows {
                        let doc = match self.eval(document, env)? {
                            Value::Object(doc) => doc,
                            other => return Err(self.fail(format!("cannot insert non-object {other}"))),
                        };
                        let stored = self.insert(collection, doc)?;
                        env.insert("NEW".to_string(), Value::Object(stored));
                    }
                }
                AqlOperation::Update {
                    key,
                    with,
                    collection,
                    options,
                } => {
                    for env in &mut rows {
                        let target = self.document_key(key, env)?;
                        let changes = match self.eval(with, env)? {
                            Value::Object(doc) => doc,
                            other => return Err(self.fail(format!("cannot update with non-object {other}"))),
                        };
                        let keep_null = match options {
                            Some(options) => self
                                .eval(options, env)?
                                .get("keepNull")
                                .map(is_truthy)
                                .unwrap_or(true),
                            None => true,
                        };
                        let updated = self.update(collection, &target, changes, keep_null)?;
                        env.insert("NEW".to_string(), Value::Object(updated));
                    }
                }
                AqlOperation::Remove { key, collection } => {
                    for env in &mut rows {
                        let target = self.document_key(key, env)?;
                        let removed = self.remove(collection, &target)?;
                        env.insert("OLD".to_string(), Value::Object(removed));
                    }
                }
            }
        }
        Ok(output)
    }

    fn iterate(&mut self, source: &AqlExpr, env: &Env) -> Result<Vec<Value>, BackendError> {
        if let AqlExpr::Collection(name) = source {
            return Ok(self
                .collection(name)?
                .documents
                .iter()
                .cloned()
                .map(Value::Object)
                .collect());
        }
        match self.eval(source, env)? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(self.fail(format!("cannot iterate over {other}"))),
        }
    }

    /// Groups rows by the group expressions. Without groups, exactly one
    /// row comes out, even for empty input.
    fn collect(&mut self, collect: &Collect, rows: Vec<Env>, outer: &Env) -> Result<Vec<Env>, BackendError> {
        let mut groups: Vec<(Vec<Value>, Vec<Env>)> = Vec::new();
        for env in rows {
            let mut key = Vec::with_capacity(collect.groups.len());
            for (_, expr) in &collect.groups {
                key.push(self.eval(expr, &env)?);
            }
            match groups.iter().position(|(existing, _)| same_group(existing, &key)) {
                Some(index) => groups[index].1.push(env),
                None => groups.push((key, vec![env])),
            }
        }
        if collect.groups.is_empty() && groups.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }
        groups.sort_by(|(a, _), (b, _)| compare_values(&Value::Array(a.clone()), &Value::Array(b.clone())));

        let mut out = Vec::with_capacity(groups.len());
        for (key, members) in groups {
            let mut row = outer.clone();
            for ((name, _), value) in collect.groups.iter().zip(key) {
                row.insert(name.clone(), value);
            }
            for (name, expr) in &collect.aggregates {
                let value = self.aggregate_over(expr, &members)?;
                row.insert(name.clone(), value);
            }
            if let Some(name) = &collect.count_into {
                row.insert(name.clone(), Value::from(members.len()));
            }
            out.push(row);
        }
        Ok(out)
    }

    fn aggregate_over(&mut self, expr: &AqlExpr, members: &[Env]) -> Result<Value, BackendError> {
        let AqlExpr::Call { function, args } = expr else {
            return Err(self.fail(format!("aggregate expression must be a function call: {expr}")));
        };
        let [arg] = args.as_slice() else {
            return Err(self.fail(format!("{function} takes exactly one argument")));
        };
        let mut values = Vec::with_capacity(members.len());
        for env in members {
            values.push(self.eval(arg, env)?);
        }
        aggregate(function, &values).ok_or_else(|| BackendError::Unsupported {
            construct: format!("aggregate function {function}"),
        })
    }

    fn sort(&mut self, keys: &[SortKey], rows: Vec<Env>) -> Result<Vec<Env>, BackendError> {
        let mut keyed = Vec::with_capacity(rows.len());
        for env in rows {
            let mut values = Vec::with_capacity(keys.len());
            for key in keys {
                match key {
                    SortKey::Expr { expr, direction } => values.push((self.eval(expr, &env)?, *direction)),
                    SortKey::Raw(text) => {
                        return Err(BackendError::Unsupported {
                            construct: format!("raw sort expression {text}"),
                        })
                    }
                }
            }
            keyed.push((values, env));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, direction), (y, _)) in a.iter().zip(b) {
                let ord = compare_values(x, y);
                let ord = match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, env)| env).collect())
    }

    // -- expressions --

    fn eval(&mut self, expr: &AqlExpr, env: &Env) -> Result<Value, BackendError> {
        match expr {
            AqlExpr::Literal(value) => Ok(value.clone()),
            AqlExpr::Bind(name) => self
                .statement
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| self.fail(format!("bind parameter '{name}' was not declared"))),
            AqlExpr::Variable(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| self.fail(format!("variable '{name}' is not declared"))),
            AqlExpr::Collection(_) => Ok(Value::Array(self.iterate(expr, env)?)),
            AqlExpr::Attribute { base, path } => {
                let mut value = self.eval(base, env)?;
                for segment in path {
                    value = match value {
                        Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
                        _ => Value::Null,
                    };
                }
                Ok(value)
            }
            AqlExpr::Compare { left, op, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.compare(&left, *op, &right).map(Value::Bool)
            }
            AqlExpr::Chain { first, rest } => {
                // AND binds tighter than OR.
                let mut any = false;
                let mut current = is_truthy(&self.eval(first, env)?);
                for (op, expr) in rest {
                    let value = is_truthy(&self.eval(expr, env)?);
                    match op {
                        Logical::And => current = current && value,
                        Logical::Or => {
                            any = any || current;
                            current = value;
                        }
                    }
                }
                Ok(Value::Bool(any || current))
            }
            AqlExpr::Group(inner) => self.eval(inner, env),
            AqlExpr::Not(inner) => Ok(Value::Bool(!is_truthy(&self.eval(inner, env)?))),
            AqlExpr::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, env)?);
                }
                self.call(function, values)
            }
            AqlExpr::Subquery(query) => Ok(Value::Array(self.run(query, env)?)),
            AqlExpr::Object(entries) => {
                let mut object = Document::new();
                for (key, value) in entries {
                    let value = self.eval(value, env)?;
                    object.insert(key.clone(), value);
                }
                Ok(Value::Object(object))
            }
            AqlExpr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Ok(Value::Array(values))
            }
            AqlExpr::Raw(text) => Err(BackendError::Unsupported {
                construct: format!("raw expression {text}"),
            }),
        }
    }

    fn compare(&self, left: &Value, op: Operator, right: &Value) -> Result<bool, BackendError> {
        use std::cmp::Ordering::{Equal, Greater, Less};
        let ord = compare_values(left, right);
        Ok(match op {
            Operator::Eq => ord == Equal,
            Operator::Ne => ord != Equal,
            Operator::Lt => ord == Less,
            Operator::Lte => ord != Greater,
            Operator::Gt => ord == Greater,
            Operator::Gte => ord != Less,
            Operator::In | Operator::NotIn => {
                let found = right
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| values_equal(item, left)));
                found == (op == Operator::In)
            }
            Operator::Like | Operator::NotLike => {
                let matched = match (left, right) {
                    (Value::String(text), Value::String(pattern)) => like(text, pattern),
                    _ => false,
                };
                matched == (op == Operator::Like)
            }
            Operator::RegexMatch | Operator::RegexNotMatch => {
                return Err(BackendError::Unsupported {
                    construct: "regular expression match".to_string(),
                })
            }
        })
    }

    fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, BackendError> {
        match function {
            "LENGTH" | "COUNT" => Ok(Value::from(match args.first() {
                Some(Value::Array(items)) => items.len(),
                Some(Value::Object(map)) => map.len(),
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Null) | None => 0,
                Some(_) => 1,
            })),
            "MAX" | "MIN" | "SUM" | "AVERAGE" | "AVG" | "COUNT_DISTINCT" => {
                let items = match args.into_iter().next() {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => return Err(self.fail(format!("{function} expects an array, got {other}"))),
                };
                aggregate(function, &items).ok_or_else(|| self.fail(format!("unknown function {function}")))
            }
            "FIRST" => Ok(match args.into_iter().next() {
                Some(Value::Array(items)) => items.into_iter().next().unwrap_or(Value::Null),
                _ => Value::Null,
            }),
            "MERGE" => {
                let mut merged = Document::new();
                for arg in args {
                    match arg {
                        Value::Object(map) => merged.extend(map),
                        other => return Err(self.fail(format!("MERGE expects objects, got {other}"))),
                    }
                }
                Ok(Value::Object(merged))
            }
            "HAS" => Ok(Value::Bool(match (args.first(), args.get(1)) {
                (Some(Value::Object(map)), Some(Value::String(name))) => map.contains_key(name),
                _ => false,
            })),
            "UNSET" => {
                let mut args = args.into_iter();
                let Some(Value::Object(mut map)) = args.next() else {
                    return Err(self.fail("UNSET expects an object"));
                };
                for name in args {
                    if let Value::String(name) = name {
                        map.remove(&name);
                    }
                }
                Ok(Value::Object(map))
            }
            other => Err(BackendError::Unsupported {
                construct: format!("function {other}"),
            }),
        }
    }

    // -- writes --

    fn document_key(&mut self, key: &AqlExpr, env: &Env) -> Result<String, BackendError> {
        match self.eval(key, env)? {
            Value::String(key) => Ok(key),
            Value::Object(doc) => match doc.get("_key") {
                Some(Value::String(key)) => Ok(key.clone()),
                _ => Err(self.fail("document has no _key")),
            },
            other => Err(self.fail(format!("invalid document key {other}"))),
        }
    }

    fn insert(&mut self, collection: &str, document: Document) -> Result<Document, BackendError> {
        let generated = self.store.next_key + 1;
        let target = self.collection(collection)?;
        let key = match document.get("_key") {
            Some(Value::String(key)) => key.clone(),
            Some(other) => return Err(self.fail(format!("illegal document key {other}"))),
            None => generated.to_string(),
        };
        if target
            .documents
            .iter()
            .any(|doc| doc.get("_key").and_then(Value::as_str) == Some(key.as_str()))
        {
            return Err(self.fail(format!("unique constraint violated: _key '{key}' in {collection}")));
        }
        if target.kind == CollectionKind::Edge
            && !(document.get("_from").is_some_and(Value::is_string) && document.get("_to").is_some_and(Value::is_string))
        {
            return Err(self.fail(format!("edge attribute missing or invalid in {collection}")));
        }

        let mut stored = Document::new();
        stored.insert("_key".to_string(), Value::String(key.clone()));
        stored.insert("_id".to_string(), Value::String(format!("{collection}/{key}")));
        for (name, value) in document {
            if name != "_key" && name != "_id" && name != "_rev" {
                stored.insert(name, value);
            }
        }
        self.store.next_key = generated;
        self.collection_mut(collection)?.documents.push(stored.clone());
        self.writes += 1;
        Ok(stored)
    }

    fn update(
        &mut self,
        collection: &str,
        key: &str,
        changes: Document,
        keep_null: bool,
    ) -> Result<Document, BackendError> {
        let statement_error = self.fail(format!("document '{key}' not found in {collection}"));
        let target = self.collection_mut(collection)?;
        let doc = target
            .documents
            .iter_mut()
            .find(|doc| doc.get("_key").and_then(Value::as_str) == Some(key))
            .ok_or(statement_error)?;
        for (name, value) in changes {
            if name == "_key" || name == "_id" {
                continue;
            }
            if value.is_null() && !keep_null {
                doc.remove(&name);
            } else {
                doc.insert(name, value);
            }
        }
        let updated = doc.clone();
        self.writes += 1;
        Ok(updated)
    }

    fn remove(&mut self, collection: &str, key: &str) -> Result<Document, BackendError> {
        let statement_error = self.fail(format!("document '{key}' not found in {collection}"));
        let target = self.collection_mut(collection)?;
        let position = target
            .documents
            .iter()
            .position(|doc| doc.get("_key").and_then(Value::as_str) == Some(key))
            .ok_or(statement_error)?;
        let removed = target.documents.remove(position);
        self.writes += 1;
        Ok(removed)
    }
}
