//! Storage-agnostic value types for compiling relational-style query and
//! schema intents into document-database operations.
//!
//! Nothing in this crate performs I/O except the configuration loader.

pub mod config;
pub mod entity;
pub mod error;
pub mod migration;
pub mod query;
pub mod relation;
pub mod schema;
pub mod types;

pub use config::{ConnectionConfig, DatabaseConfig};
pub use error::CompileError;
pub use types::{CollectionName, Document, KeyType};
