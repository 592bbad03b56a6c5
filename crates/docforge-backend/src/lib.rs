pub mod error;
pub mod traits;

pub use error::BackendError;
pub use traits::{Ledger, SchemaCompiler, StatementCompiler};
