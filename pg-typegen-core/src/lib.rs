pub mod casing;
pub mod catalog;
pub mod declare;
pub mod nullability;
pub mod parser;
pub mod postgres;
pub mod resolver;
pub mod run;
pub mod types;
pub mod typing;

pub use catalog::{Catalog, CatalogError, Nullability};
pub use declare::{DeclarationKind, DeclarationNode};
pub use parser::{Cardinality, CommandTag, ParseError, QueryFile, TemplateQuery, parse_query_file};
pub use postgres::PgCatalog;
pub use resolver::ResolutionError;
pub use run::{Error, GenerationRun, RunOptions, RunOutput, TypedFile, generate, package_name};
pub use types::{ResolvedType, ScalarType, TypeId};
pub use typing::{TypedColumn, TypedParam, TypedQuery, TypingMismatchError};
