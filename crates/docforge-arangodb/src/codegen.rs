//! Compile `SchemaCommand` values into administrative calls and AQL.
//!
//! No I/O. Collection, index and view changes are metadata operations and
//! become `AdminCall`s; only data rewrites become AQL statements.

use std::fmt;

use docforge_backend::SchemaCompiler;
use docforge_core::query::FieldPath;
use docforge_core::schema::{
    CollectionKind, CollectionOptions, CollectionProperties, IndexDefinition, SchemaCommand,
    ViewDefinition,
};
use docforge_core::{CollectionName, CompileError, ConnectionConfig};
use serde_json::Value;

use crate::aql::{AqlExpr, AqlOperation, AqlQuery, AqlStatement, Bindings};
use crate::query::iteration_variable;

/// A call to the store's administrative API. Names are already prefixed.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCall {
    CreateCollection {
        name: String,
        options: CollectionOptions,
    },
    DropCollection {
        name: String,
        if_exists: bool,
    },
    RenameCollection {
        from: String,
        to: String,
    },
    UpdateProperties {
        name: String,
        properties: CollectionProperties,
    },
    TruncateCollection {
        name: String,
    },
    CreateIndex {
        collection: String,
        name: String,
        definition: IndexDefinition,
    },
    DropIndex {
        collection: String,
        name: String,
    },
    CreateView {
        definition: ViewDefinition,
    },
    DropView {
        name: String,
        if_exists: bool,
    },
}

impl fmt::Display for AdminCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCollection { name, options } => {
                write!(f, "create {} collection {name}", options.kind)
            }
            Self::DropCollection { name, .. } => write!(f, "drop collection {name}"),
            Self::RenameCollection { from, to } => write!(f, "rename collection {from} to {to}"),
            Self::UpdateProperties { name, .. } => write!(f, "update properties of {name}"),
            Self::TruncateCollection { name } => write!(f, "truncate collection {name}"),
            Self::CreateIndex {
                collection, name, ..
            } => write!(f, "create index {name} on {collection}"),
            Self::DropIndex { collection, name } => write!(f, "drop index {name} on {collection}"),
            Self::CreateView { definition } => write!(f, "create view {}", definition.name),
            Self::DropView { name, .. } => write!(f, "drop view {name}"),
        }
    }
}

/// One step of a compiled schema command.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    Aql(AqlStatement),
    Admin(AdminCall),
}

impl fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aql(statement) => write!(f, "{statement}"),
            Self::Admin(call) => write!(f, "{call}"),
        }
    }
}

/// Compiles schema commands for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AqlSchemaCompiler {
    prefix: String,
}

impl AqlSchemaCompiler {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self::with_prefix(config.prefix.clone())
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn prefixed(&self, name: &CollectionName) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// The administrative truncate call for `collection`.
    pub fn truncate(&self, collection: &CollectionName) -> AdminCall {
        AdminCall::TruncateCollection {
            name: self.prefixed(collection),
        }
    }

    /// A document collection cannot become an edge collection in place, so
    /// the data moves through a temporary collection of the new kind.
    fn alter_collection_type(
        &self,
        name: &CollectionName,
        kind: CollectionKind,
    ) -> Vec<SchemaOperation> {
        let target = self.prefixed(name);
        let temporary = format!("{target}_{kind}_tmp");
        let variable = iteration_variable(name.as_str());
        let copy = AqlQuery::new()
            .for_in(variable.clone(), AqlExpr::Collection(target.clone()))
            .insert(
                AqlExpr::call(
                    "UNSET",
                    vec![
                        AqlExpr::var(variable),
                        AqlExpr::Literal(Value::from("_id")),
                        AqlExpr::Literal(Value::from("_rev")),
                    ],
                ),
                temporary.clone(),
            );
        vec![
            SchemaOperation::Admin(AdminCall::CreateCollection {
                name: temporary.clone(),
                options: CollectionOptions {
                    kind,
                    ..CollectionOptions::default()
                },
            }),
            SchemaOperation::Aql(AqlStatement::new(copy, Bindings::new())),
            SchemaOperation::Admin(AdminCall::DropCollection {
                name: target.clone(),
                if_exists: false,
            }),
            SchemaOperation::Admin(AdminCall::RenameCollection {
                from: temporary,
                to: target,
            }),
        ]
    }

    /// Copies `from` into `to` and unsets `from` on every document that has
    /// it. Only top-level attributes can be renamed.
    fn rename_attribute(
        &self,
        collection: &CollectionName,
        from: &FieldPath,
        to: &FieldPath,
    ) -> Result<Vec<SchemaOperation>, CompileError> {
        from.validate()?;
        to.validate()?;
        if !from.is_simple() || !to.is_simple() {
            return Err(CompileError::unsupported(
                format!("rename of nested attribute {from} to {to}"),
                "renameAttribute",
            ));
        }
        if from == to {
            tracing::debug!(attribute = %from, "attribute renamed to itself, nothing to do");
            return Ok(Vec::new());
        }
        let target = self.prefixed(collection);
        let variable = iteration_variable(collection.as_str());
        let from = from.root();
        let to = to.root();

        let mut query = AqlQuery::new()
            .for_in(variable.clone(), AqlExpr::Collection(target.clone()))
            .filter(AqlExpr::call(
                "HAS",
                vec![AqlExpr::var(variable.clone()), AqlExpr::Literal(Value::from(from))],
            ));
        query.push(AqlOperation::Update {
            key: AqlExpr::var(variable.clone()),
            with: AqlExpr::Object(vec![
                (to.to_string(), AqlExpr::field(&variable, from)),
                (from.to_string(), AqlExpr::Literal(Value::Null)),
            ]),
            collection: target,
            options: Some(AqlExpr::Object(vec![(
                "keepNull".to_string(),
                AqlExpr::Literal(Value::Bool(false)),
            )])),
        });
        Ok(vec![SchemaOperation::Aql(AqlStatement::new(
            query,
            Bindings::new(),
        ))])
    }
}

impl SchemaCompiler for AqlSchemaCompiler {
    type Operation = SchemaOperation;

    fn compile_schema(&self, command: &SchemaCommand) -> Result<Vec<SchemaOperation>, CompileError> {
        let admin = |call| Ok(vec![SchemaOperation::Admin(call)]);
        let operations = match command {
            SchemaCommand::CreateCollection { name, options } => {
                admin(AdminCall::CreateCollection {
                    name: self.prefixed(name),
                    options: options.clone(),
                })
            }
            SchemaCommand::DropCollection { name, if_exists } => admin(AdminCall::DropCollection {
                name: self.prefixed(name),
                if_exists: *if_exists,
            }),
            SchemaCommand::RenameCollection { from, to } => admin(AdminCall::RenameCollection {
                from: self.prefixed(from),
                to: self.prefixed(to),
            }),
            SchemaCommand::AlterCollection { name, properties } => {
                admin(AdminCall::UpdateProperties {
                    name: self.prefixed(name),
                    properties: properties.clone(),
                })
            }
            SchemaCommand::AlterCollectionType { name, kind } => {
                Ok(self.alter_collection_type(name, *kind))
            }
            SchemaCommand::TruncateCollection { name } => admin(self.truncate(name)),
            SchemaCommand::CreateIndex {
                collection,
                definition,
            } => {
                for field in &definition.fields {
                    field.validate()?;
                }
                admin(AdminCall::CreateIndex {
                    collection: self.prefixed(collection),
                    name: definition.resolved_name(collection),
                    definition: definition.clone(),
                })
            }
            SchemaCommand::DropIndex { collection, name } => admin(AdminCall::DropIndex {
                collection: self.prefixed(collection),
                name: name.clone(),
            }),
            SchemaCommand::CreateView { definition } => admin(AdminCall::CreateView {
                definition: definition.clone(),
            }),
            SchemaCommand::DropView { name, if_exists } => admin(AdminCall::DropView {
                name: name.clone(),
                if_exists: *if_exists,
            }),
            SchemaCommand::RenameAttribute {
                collection,
                from,
                to,
            } => self.rename_attribute(collection, from, to),
            other => Err(CompileError::unsupported(other.to_string(), "schema compiler")),
        }?;
        tracing::debug!(command = %command, steps = operations.len(), "compiled schema command");
        Ok(operations)
    }
}
