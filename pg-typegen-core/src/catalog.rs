use std::fmt::{self, Display};
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::TypeId;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("type {0} does not exist in pg_type")]
    TypeNotFound(TypeId),
    #[error("statement was described without parameter types")]
    MissingParameters,
    #[error("type {0} was reported without an oid")]
    MissingOid(String),
    #[error("{0}")]
    Other(String),
}

/// Failure of a catalog call bounded by the run timeout.
#[derive(Debug, thiserror::Error)]
pub enum CatalogFailure {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("catalog call timed out after {0:?}")]
    TimedOut(Duration),
}

pub async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, CatalogError>>,
) -> Result<T, CatalogFailure> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CatalogFailure::TimedOut(timeout)),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nullability {
    NotNull,
    Nullable,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub ordinal: usize,
    pub name: String,
    pub type_id: TypeId,
    pub nullability: Nullability,
}

/// Parameter and result column shapes of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatementShape {
    pub params: Vec<TypeId>,
    pub columns: Vec<OutputDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Base,
    Enum,
    Composite,
    Array { elem: TypeId },
    Domain { base: TypeId },
    Range,
    Pseudo,
}

/// One row of `pg_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub type_id: TypeId,
    pub schema: String,
    pub name: String,
    pub kind: TypeKind,
}

impl TypeEntry {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl Display for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.schema, self.name, self.type_id)
    }
}

/// The live schema operations the generator needs.
#[allow(async_fn_in_trait)]
pub trait Catalog {
    /// Prepares `sql` without executing it.
    async fn describe(&self, sql: &str) -> Result<StatementShape, CatalogError>;

    async fn lookup_type(&self, type_id: TypeId) -> Result<TypeEntry, CatalogError>;

    /// Labels in sort order.
    async fn enum_labels(&self, type_id: TypeId) -> Result<Vec<String>, CatalogError>;

    /// Field names and types in attribute order.
    async fn composite_fields(&self, type_id: TypeId)
    -> Result<Vec<(String, TypeId)>, CatalogError>;
}
