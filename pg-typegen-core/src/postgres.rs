use sqlx::postgres::types::Oid;
use sqlx::postgres::PgTypeInfo;
use sqlx::{Column, Either, Executor, Pool, Postgres, Statement, TypeInfo, query_as, query_scalar};
use tracing::debug;

use crate::catalog::{
    Catalog, CatalogError, Nullability, OutputDescriptor, StatementShape, TypeEntry, TypeKind,
};
use crate::types::TypeId;

/// Catalog backed by a live Postgres database over a single connection, so
/// prepared statements never race each other.
pub struct PgCatalog {
    pool: Pool<Postgres>,
}

impl PgCatalog {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn column_nullability(&self, table: Oid, attribute: i16) -> Result<Nullability, CatalogError> {
        let not_null: Option<bool> = query_scalar(
            "select attnotnull
from pg_catalog.pg_attribute
where attrelid = $1 and attnum = $2 and not attisdropped",
        )
        .bind(table)
        .bind(attribute)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match not_null {
            Some(true) => Nullability::NotNull,
            Some(false) => Nullability::Nullable,
            None => Nullability::Unknown,
        })
    }
}

fn type_id(type_info: &PgTypeInfo) -> Result<TypeId, CatalogError> {
    type_info
        .oid()
        .map(|oid| TypeId(oid.0))
        .ok_or_else(|| CatalogError::MissingOid(type_info.name().to_owned()))
}

impl Catalog for PgCatalog {
    async fn describe(&self, sql: &str) -> Result<StatementShape, CatalogError> {
        let prepared = (&self.pool).prepare(sql).await?;
        let params = match prepared.parameters() {
            Some(Either::Left(parameters)) => parameters
                .iter()
                .map(type_id)
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(CatalogError::MissingParameters),
        };

        let mut columns = Vec::with_capacity(prepared.columns().len());
        for column in prepared.columns() {
            let nullability = match (column.relation_id(), column.relation_attribute_no()) {
                (Some(table), Some(attribute)) if attribute > 0 => {
                    self.column_nullability(table, attribute).await?
                }
                _ => Nullability::Unknown,
            };
            columns.push(OutputDescriptor {
                ordinal: column.ordinal(),
                name: column.name().to_owned(),
                type_id: type_id(column.type_info())?,
                nullability,
            });
        }
        debug!(
            params = params.len(),
            columns = columns.len(),
            "described statement"
        );
        Ok(StatementShape { params, columns })
    }

    async fn lookup_type(&self, type_id: TypeId) -> Result<TypeEntry, CatalogError> {
        let row: Option<(String, String, String, String, Oid, Oid)> = query_as(
            "select
    n.nspname::text,
    t.typname::text,
    t.typtype::text,
    t.typcategory::text,
    t.typelem,
    t.typbasetype
from
    pg_catalog.pg_type t
    join pg_catalog.pg_namespace n on n.oid = t.typnamespace
where
    t.oid = $1",
        )
        .bind(Oid(type_id.0))
        .fetch_optional(&self.pool)
        .await?;
        let Some((schema, name, typtype, category, elem, base)) = row else {
            return Err(CatalogError::TypeNotFound(type_id));
        };
        let kind = match (typtype.as_str(), category.as_str()) {
            ("b", "A") if elem.0 != 0 => TypeKind::Array {
                elem: TypeId(elem.0),
            },
            ("b", _) => TypeKind::Base,
            ("e", _) => TypeKind::Enum,
            ("c", _) => TypeKind::Composite,
            ("d", _) => TypeKind::Domain {
                base: TypeId(base.0),
            },
            ("r" | "m", _) => TypeKind::Range,
            _ => TypeKind::Pseudo,
        };
        debug!(%type_id, %schema, %name, ?kind, "looked up type");
        Ok(TypeEntry {
            type_id,
            schema,
            name,
            kind,
        })
    }

    async fn enum_labels(&self, type_id: TypeId) -> Result<Vec<String>, CatalogError> {
        Ok(query_scalar(
            "select enumlabel::text
from pg_catalog.pg_enum
where enumtypid = $1
order by enumsortorder",
        )
        .bind(Oid(type_id.0))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn composite_fields(&self, type_id: TypeId) -> Result<Vec<(String, TypeId)>, CatalogError> {
        let fields: Vec<(String, Oid)> = query_as(
            "select
    a.attname::text,
    a.atttypid
from
    pg_catalog.pg_type t
    join pg_catalog.pg_attribute a on a.attrelid = t.typrelid
where
    t.oid = $1
    and a.attnum > 0
    and not a.attisdropped
order by
    a.attnum",
        )
        .bind(Oid(type_id.0))
        .fetch_all(&self.pool)
        .await?;
        Ok(fields
            .into_iter()
            .map(|(name, oid)| (name, TypeId(oid.0)))
            .collect())
    }
}
