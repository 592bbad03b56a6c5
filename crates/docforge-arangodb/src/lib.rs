//! # docforge-arangodb
//!
//! ArangoDB backend: compiles query state and schema commands into AQL and
//! administrative calls, and keeps the migration ledger.
//!
//! This crate provides:
//! - A structured AQL builder with per-statement bind parameters
//! - The query compiler (`AqlCompiler`) and schema compiler (`AqlSchemaCompiler`)
//! - Relation sub-selects (`with_count`, `where_has`, ...)
//! - The migration ledger over any executor
//! - An HTTP connection and an in-memory engine for tests
//!
//! # Example
//!
//! ```
//! use docforge_arangodb::AqlCompiler;
//! use docforge_backend::StatementCompiler;
//! use docforge_core::query::QueryState;
//! use docforge_core::CollectionName;
//! use serde_json::json;
//!
//! let query = QueryState::new(CollectionName::new("characters")?)
//!     .where_eq("surname", json!("Stark"));
//! let statement = AqlCompiler::with_prefix("got_").compile_select(&query)?;
//! assert_eq!(
//!     statement.text(),
//!     "FOR characterDoc IN got_characters FILTER characterDoc.surname == @value1 RETURN characterDoc"
//! );
//! # Ok::<(), docforge_core::CompileError>(())
//! ```

pub mod aql;
pub mod backend;
pub mod codegen;
pub mod executor;
pub mod ledger;
pub mod memory;
pub mod query;
pub mod relation;
pub mod runner;
pub mod value;

pub use aql::{AqlExpr, AqlQuery, AqlStatement, Bindings};
pub use backend::ArangoConnection;
pub use codegen::{AdminCall, AqlSchemaCompiler, SchemaOperation};
pub use executor::{apply_operations, AqlExecutor, QueryOutcome, SchemaManager};
pub use ledger::MigrationLedger;
pub use memory::MemoryDatabase;
pub use query::AqlCompiler;
pub use runner::QueryRunner;
