use std::fmt;

use docforge_core::CompileError;

/// Errors that occur while compiling or executing against a backend.
///
/// All variants carry enough context to produce actionable error messages.
/// Uses `String` for external error details to maintain `Clone` + `Eq`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    /// The statement could not be compiled; nothing was executed.
    Compile(CompileError),
    /// Collection not found by name.
    CollectionNotFound { collection: String },
    /// Collection already exists when attempting creation.
    CollectionAlreadyExists { collection: String },
    /// View not found by name.
    ViewNotFound { view: String },
    /// View already exists when attempting creation.
    ViewAlreadyExists { view: String },
    /// Index not found on a collection.
    IndexNotFound { collection: String, index: String },
    /// The store rejected or failed a statement. Carries the statement and
    /// its bindings for diagnostics.
    Execution {
        connection: String,
        statement: String,
        bindings: String,
        message: String,
    },
    /// An administrative call failed.
    SchemaFailed { command: String, reason: String },
    /// Connection or transport-level error.
    ConnectionError { message: String },
    /// The executor cannot evaluate part of a statement.
    Unsupported { construct: String },
    /// Internal or unexpected error.
    Internal { message: String },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(err) => write!(f, "compile error: {err}"),
            Self::CollectionNotFound { collection } => {
                write!(f, "collection '{collection}' not found")
            }
            Self::CollectionAlreadyExists { collection } => {
                write!(f, "collection '{collection}' already exists")
            }
            Self::ViewNotFound { view } => write!(f, "view '{view}' not found"),
            Self::ViewAlreadyExists { view } => write!(f, "view '{view}' already exists"),
            Self::IndexNotFound { collection, index } => {
                write!(f, "index '{index}' not found on collection '{collection}'")
            }
            Self::Execution {
                connection,
                statement,
                bindings,
                message,
            } => {
                write!(
                    f,
                    "execution failed on connection '{connection}': {message} (statement: {statement}; bindings: {bindings})"
                )
            }
            Self::SchemaFailed { command, reason } => {
                write!(f, "schema command failed ({command}): {reason}")
            }
            Self::ConnectionError { message } => {
                write!(f, "backend connection error: {message}")
            }
            Self::Unsupported { construct } => {
                write!(f, "unsupported by this executor: {construct}")
            }
            Self::Internal { message } => {
                write!(f, "internal backend error: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compile(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CompileError> for BackendError {
    fn from(err: CompileError) -> Self {
        Self::Compile(err)
    }
}
