//! HTTP connection to an ArangoDB server.
//!
//! This is the I/O boundary: statements go through the cursor API and
//! administrative calls through the collection, index and view endpoints.
//! Request shapes are built by pure functions so they can be tested without
//! a server.

use docforge_backend::BackendError;
use docforge_core::ConnectionConfig;
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};

use crate::aql::AqlStatement;
use crate::codegen::AdminCall;
use crate::executor::{AqlExecutor, QueryOutcome, SchemaManager};

/// Failures below the level of a statement or administrative call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server responded {status}: {message}")]
    Status {
        status: StatusCode,
        error_num: Option<u64>,
        message: String,
    },

    #[error("malformed response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl TransportError {
    fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// `errorNum` of "collection or view not found".
const ERROR_COLLECTION_NOT_FOUND: u64 = 1203;

/// Status failure from a response body that may not be JSON at all.
fn status_error(status: StatusCode, body: &str) -> TransportError {
    let payload: Option<Value> = serde_json::from_str(body).ok();
    let field = |name: &str| payload.as_ref().and_then(|p| p.get(name));
    TransportError::Status {
        status,
        error_num: field("errorNum").and_then(Value::as_u64),
        message: field("errorMessage")
            .and_then(Value::as_str)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
            .to_string(),
    }
}

/// The collection named in "collection or view not found: <name> ...".
fn missing_collection(message: &str) -> Option<&str> {
    let (_, rest) = message.split_once("not found: ")?;
    rest.split_whitespace().next().filter(|name| !name.is_empty())
}

/// One administrative request: method, database-relative path and body.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl AdminRequest {
    fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

/// The request performing `call`.
pub fn admin_request(call: &AdminCall) -> AdminRequest {
    match call {
        AdminCall::CreateCollection { name, options } => {
            let mut body = Map::new();
            body.insert("name".into(), json!(name));
            body.insert("type".into(), json!(options.kind.type_code()));
            if let Some(wait) = options.wait_for_sync {
                body.insert("waitForSync".into(), json!(wait));
            }
            if let Some(key_options) = &options.key_options {
                body.insert("keyOptions".into(), key_options.clone());
            }
            if let Some(schema) = &options.schema {
                body.insert("schema".into(), schema.clone());
            }
            AdminRequest::new(Method::POST, "_api/collection", Some(Value::Object(body)))
        }
        AdminCall::DropCollection { name, .. } => {
            AdminRequest::new(Method::DELETE, format!("_api/collection/{name}"), None)
        }
        AdminCall::RenameCollection { from, to } => AdminRequest::new(
            Method::PUT,
            format!("_api/collection/{from}/rename"),
            Some(json!({ "name": to })),
        ),
        AdminCall::UpdateProperties { name, properties } => {
            let mut body = Map::new();
            if let Some(wait) = properties.wait_for_sync {
                body.insert("waitForSync".into(), json!(wait));
            }
            if let Some(schema) = &properties.schema {
                body.insert("schema".into(), schema.clone());
            }
            AdminRequest::new(
                Method::PUT,
                format!("_api/collection/{name}/properties"),
                Some(Value::Object(body)),
            )
        }
        AdminCall::TruncateCollection { name } => {
            AdminRequest::new(Method::PUT, format!("_api/collection/{name}/truncate"), None)
        }
        AdminCall::CreateIndex {
            collection,
            name,
            definition,
        } => {
            let mut body = Map::new();
            body.insert("type".into(), json!(definition.kind.api_name()));
            body.insert(
                "fields".into(),
                json!(definition
                    .fields
                    .iter()
                    .map(|f| f.as_dotted())
                    .collect::<Vec<_>>()),
            );
            body.insert("name".into(), json!(name));
            body.insert("unique".into(), json!(definition.unique));
            body.insert("sparse".into(), json!(definition.sparse));
            if let Some(Value::Object(options)) = &definition.options {
                for (key, value) in options {
                    body.insert(key.clone(), value.clone());
                }
            }
            AdminRequest::new(
                Method::POST,
                format!("_api/index?collection={collection}"),
                Some(Value::Object(body)),
            )
        }
        AdminCall::DropIndex { collection, name } => {
            AdminRequest::new(Method::DELETE, format!("_api/index/{collection}/{name}"), None)
        }
        AdminCall::CreateView { definition } => {
            let mut body = match &definition.properties {
                Value::Object(properties) => properties.clone(),
                _ => Map::new(),
            };
            body.insert("name".into(), json!(definition.name));
            body.insert("type".into(), json!(definition.kind.api_name()));
            AdminRequest::new(Method::POST, "_api/view", Some(Value::Object(body)))
        }
        AdminCall::DropView { name, .. } => {
            AdminRequest::new(Method::DELETE, format!("_api/view/{name}"), None)
        }
    }
}

/// Body of the initial cursor request.
pub fn cursor_body(statement: &AqlStatement, batch_size: u32) -> Value {
    json!({
        "query": statement.text(),
        "bindVars": statement.bind_vars(),
        "batchSize": batch_size,
    })
}

/// A connection to one database of an ArangoDB server.
#[derive(Debug, Clone)]
pub struct ArangoConnection {
    client: reqwest::Client,
    config: ConnectionConfig,
}

impl ArangoConnection {
    pub fn new(config: ConnectionConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::ConnectionError {
                message: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Absolute URL of a database-relative API path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/_db/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.database,
            path.trim_start_matches('/')
        )
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, TransportError> {
        let url = self.url(path);
        let mut request = self.client.request(method, &url);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|source| TransportError::Request {
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| TransportError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode {
            url,
            reason: e.to_string(),
        })
    }

    fn execution_error(&self, statement: &AqlStatement, err: &TransportError) -> BackendError {
        let missing = match err {
            TransportError::Request { .. } => {
                return BackendError::ConnectionError {
                    message: err.to_string(),
                }
            }
            TransportError::Status {
                error_num: Some(ERROR_COLLECTION_NOT_FOUND),
                message,
                ..
            } => missing_collection(message),
            TransportError::Status { .. } | TransportError::Decode { .. } => None,
        };
        match missing {
            Some(collection) => BackendError::CollectionNotFound {
                collection: collection.to_string(),
            },
            None => BackendError::Execution {
                connection: self.config.name.clone(),
                statement: statement.text(),
                bindings: statement.bind_vars().to_string(),
                message: err.to_string(),
            },
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, BackendError> {
        match self.send(Method::GET, path, None).await {
            Ok(_) => Ok(true),
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => Ok(false),
            Err(err) => Err(BackendError::ConnectionError {
                message: err.to_string(),
            }),
        }
    }
}

/// Results of one cursor response page.
fn page_rows(page: &Value) -> Vec<Value> {
    page.get("result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn page_writes(page: &Value) -> Option<u64> {
    page.pointer("/extra/stats/writesExecuted").and_then(Value::as_u64)
}

impl AqlExecutor for ArangoConnection {
    async fn execute(&self, statement: &AqlStatement) -> Result<QueryOutcome, BackendError> {
        tracing::debug!(connection = %self.config.name, statement = %statement, "executing statement");
        let body = cursor_body(statement, self.config.batch_size);
        let mut page = self
            .send(Method::POST, "_api/cursor", Some(&body))
            .await
            .map_err(|e| self.execution_error(statement, &e))?;

        let mut rows = page_rows(&page);
        let mut writes = page_writes(&page).unwrap_or(0);
        while page.get("hasMore").and_then(Value::as_bool).unwrap_or(false) {
            let Some(id) = page.get("id").and_then(Value::as_str).map(str::to_string) else {
                return Err(self.execution_error(
                    statement,
                    &TransportError::Decode {
                        url: self.url("_api/cursor"),
                        reason: "cursor has more results but no id".to_string(),
                    },
                ));
            };
            page = self
                .send(Method::PUT, &format!("_api/cursor/{id}"), None)
                .await
                .map_err(|e| self.execution_error(statement, &e))?;
            rows.extend(page_rows(&page));
            if let Some(later) = page_writes(&page) {
                writes = later;
            }
        }
        Ok(QueryOutcome::new(rows, writes))
    }
}

impl SchemaManager for ArangoConnection {
    async fn apply(&self, call: &AdminCall) -> Result<(), BackendError> {
        let request = admin_request(call);
        let result = self
            .send(request.method.clone(), &request.path, request.body.as_ref())
            .await;
        let err = match result {
            Ok(_) => {
                tracing::info!(connection = %self.config.name, call = %call, "admin call applied");
                return Ok(());
            }
            Err(err) => err,
        };

        match (call, err.status().map(|status| status.as_u16())) {
            (AdminCall::DropCollection { if_exists: true, .. }, Some(404))
            | (AdminCall::DropView { if_exists: true, .. }, Some(404)) => {
                tracing::debug!(call = %call, "nothing to drop");
                Ok(())
            }
            (AdminCall::CreateCollection { name, .. }, Some(409)) => {
                Err(BackendError::CollectionAlreadyExists {
                    collection: name.clone(),
                })
            }
            (AdminCall::CreateView { definition }, Some(409)) => {
                Err(BackendError::ViewAlreadyExists {
                    view: definition.name.clone(),
                })
            }
            (AdminCall::DropIndex { collection, name }, Some(404)) => {
                Err(BackendError::IndexNotFound {
                    collection: collection.clone(),
                    index: name.clone(),
                })
            }
            (AdminCall::DropView { name, .. }, Some(404)) => {
                Err(BackendError::ViewNotFound { view: name.clone() })
            }
            (
                AdminCall::DropCollection { name, .. }
                | AdminCall::TruncateCollection { name }
                | AdminCall::UpdateProperties { name, .. }
                | AdminCall::RenameCollection { from: name, .. }
                | AdminCall::CreateIndex {
                    collection: name, ..
                },
                Some(404),
            ) => Err(BackendError::CollectionNotFound {
                collection: name.clone(),
            }),
            (_, None) if matches!(err, TransportError::Request { .. }) => {
                Err(BackendError::ConnectionError {
                    message: err.to_string(),
                })
            }
            _ => Err(BackendError::SchemaFailed {
                command: call.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    async fn has_collection(&self, name: &str) -> Result<bool, BackendError> {
        self.exists(&format!("_api/collection/{name}")).await
    }

    async fn has_view(&self, name: &str) -> Result<bool, BackendError> {
        self.exists(&format!("_api/view/{name}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aql::{AqlExpr, AqlQuery, Bindings};
    use docforge_core::query::FieldPath;
    use docforge_core::schema::{CollectionOptions, IndexDefinition, IndexKind, ViewDefinition, ViewKind};

    fn connection() -> ArangoConnection {
        ArangoConnection::new(ConnectionConfig {
            endpoint: "http://localhost:8529/".into(),
            database: "got".into(),
            ..ConnectionConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn url_joins_database_path() {
        assert_eq!(
            connection().url("/_api/cursor"),
            "http://localhost:8529/_db/got/_api/cursor"
        );
    }

    #[test]
    fn cursor_body_carries_bindings_and_batch_size() {
        let mut bindings = Bindings::new();
        let value = bindings.bind(json!("Stark"));
        let query = AqlQuery::new()
            .for_in("c", AqlExpr::Collection("characters".into()))
            .filter(AqlExpr::compare(
                AqlExpr::field("c", "surname"),
                docforge_core::query::Operator::Eq,
                value,
            ))
            .return_value(AqlExpr::var("c"));
        let body = cursor_body(&AqlStatement::new(query, bindings), 500);
        assert_eq!(
            body,
            json!({
                "query": "FOR c IN characters FILTER c.surname == @value1 RETURN c",
                "bindVars": {"value1": "Stark"},
                "batchSize": 500,
            })
        );
    }

    #[test]
    fn create_edge_collection_request() {
        let request = admin_request(&AdminCall::CreateCollection {
            name: "got_relations".into(),
            options: CollectionOptions::edge(),
        });
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "_api/collection");
        assert_eq!(request.body, Some(json!({"name": "got_relations", "type": 3})));
    }

    #[test]
    fn index_request_targets_collection() {
        let definition = IndexDefinition::new(IndexKind::Persistent, vec![FieldPath::from("residence.city")]).unique();
        let request = admin_request(&AdminCall::CreateIndex {
            collection: "got_characters".into(),
            name: "by_city".into(),
            definition,
        });
        assert_eq!(request.path, "_api/index?collection=got_characters");
        assert_eq!(
            request.body,
            Some(json!({
                "type": "persistent",
                "fields": ["residence.city"],
                "name": "by_city",
                "unique": true,
                "sparse": false,
            }))
        );
    }

    #[test]
    fn view_request_merges_properties() {
        let request = admin_request(&AdminCall::CreateView {
            definition: ViewDefinition {
                name: "search".into(),
                kind: ViewKind::Arangosearch,
                properties: json!({"links": {}}),
            },
        });
        assert_eq!(
            request.body,
            Some(json!({"links": {}, "name": "search", "type": "arangosearch"}))
        );
    }

    #[test]
    fn maintenance_requests() {
        assert_eq!(
            admin_request(&AdminCall::TruncateCollection { name: "got_characters".into() }),
            AdminRequest::new(Method::PUT, "_api/collection/got_characters/truncate", None)
        );
        assert_eq!(
            admin_request(&AdminCall::RenameCollection {
                from: "a".into(),
                to: "b".into()
            })
            .body,
            Some(json!({"name": "b"}))
        );
        assert_eq!(
            admin_request(&AdminCall::DropIndex {
                collection: "got_characters".into(),
                name: "by_city".into()
            })
            .path,
            "_api/index/got_characters/by_city"
        );
    }

    fn statement() -> AqlStatement {
        let query = AqlQuery::new()
            .for_in("entry", AqlExpr::Collection("got_migrations".into()))
            .return_value(AqlExpr::var("entry"));
        AqlStatement::new(query, Bindings::new())
    }

    #[test]
    fn unknown_collection_maps_to_not_found() {
        let err = status_error(
            StatusCode::NOT_FOUND,
            r#"{"error":true,"errorNum":1203,"errorMessage":"AQL: collection or view not found: got_migrations (while parsing)","code":404}"#,
        );
        assert_eq!(
            connection().execution_error(&statement(), &err),
            BackendError::CollectionNotFound {
                collection: "got_migrations".into()
            }
        );
    }

    #[test]
    fn other_server_errors_keep_statement_context() {
        let err = status_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":true,"errorNum":1501,"errorMessage":"AQL: syntax error","code":400}"#,
        );
        match connection().execution_error(&statement(), &err) {
            BackendError::Execution { statement, message, .. } => {
                assert!(statement.starts_with("FOR entry IN got_migrations"));
                assert!(message.contains("syntax error"));
            }
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[test]
    fn non_json_error_body_keeps_status() {
        let err = status_error(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        match err {
            TransportError::Status { error_num, message, .. } => {
                assert_eq!(error_num, None);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, "").status(),
            Some(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn cursor_pages_expose_rows_and_writes() {
        let page = json!({"result": [1, 2], "hasMore": false, "extra": {"stats": {"writesExecuted": 2}}});
        assert_eq!(page_rows(&page), vec![json!(1), json!(2)]);
        assert_eq!(page_writes(&page), Some(2));
        assert_eq!(page_writes(&json!({"result": []})), None);
    }
}
