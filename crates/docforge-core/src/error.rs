use std::fmt;

/// Errors raised while building or compiling a query or schema command.
///
/// Compile errors are fatal to the statement being compiled: nothing is
/// executed once one is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompileError {
    /// Collection name failed validation.
    InvalidCollectionName(String),
    /// The field path was empty.
    EmptyFieldPath,
    /// The field path is invalid.
    InvalidFieldPath { path: String, reason: String },
    /// The comparison operator is not one the compiler understands.
    UnknownOperator(String),
    /// The query requests something the target language cannot express.
    Unsupported { construct: String, context: String },
    /// A relation reference could not be parsed.
    InvalidRelationSpec(String),
    /// A relation name was not registered for the queried entity.
    UnknownRelation(String),
    /// An update was requested with no attributes to write.
    EmptyUpdate,
    /// A bind parameter name collided or its value could not be serialized.
    Binding { name: String, reason: String },
}

impl CompileError {
    /// Shorthand for an unsupported-construct error.
    pub fn unsupported(construct: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Unsupported {
            construct: construct.into(),
            context: context.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCollectionName(s) => {
                write!(
                    f,
                    "invalid collection name '{s}': must match [A-Za-z_][A-Za-z0-9_-]*"
                )
            }
            Self::EmptyFieldPath => write!(f, "field path must not be empty"),
            Self::InvalidFieldPath { path, reason } => {
                write!(f, "invalid field path '{path}': {reason}")
            }
            Self::UnknownOperator(op) => write!(f, "unknown operator '{op}'"),
            Self::Unsupported { construct, context } => {
                write!(f, "unsupported construct {construct} in {context}")
            }
            Self::InvalidRelationSpec(spec) => {
                write!(
                    f,
                    "invalid relation reference '{spec}': expected 'name' or 'name as alias'"
                )
            }
            Self::UnknownRelation(name) => write!(f, "unknown relation '{name}'"),
            Self::EmptyUpdate => write!(f, "update has no attributes to write"),
            Self::Binding { name, reason } => {
                write!(f, "cannot bind parameter '@{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for CompileError {}
