use std::sync::Arc;

use crate::catalog::{Nullability, StatementShape};
use crate::parser::{Cardinality, CommandTag, TemplateQuery};
use crate::types::{ResolvedType, TypeId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypingMismatchError {
    #[error("query {query} names {expected} parameters but the database reports {actual}")]
    Params {
        query: String,
        expected: usize,
        actual: usize,
    },
    #[error("query {query} returns {expected} columns but {actual} types were resolved")]
    Columns {
        query: String,
        expected: usize,
        actual: usize,
    },
    #[error("query {query} is tagged :{tag} but returns no columns")]
    NoColumns { query: String, tag: &'static str },
}

/// Parameters are always non-null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedParam {
    pub name: String,
    pub type_id: TypeId,
    pub ty: Arc<ResolvedType>,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedColumn {
    pub name: String,
    pub type_id: TypeId,
    pub ty: Arc<ResolvedType>,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedQuery {
    pub name: String,
    pub cardinality: Cardinality,
    pub command: CommandTag,
    pub doc: Vec<String>,
    pub source_sql: String,
    pub sql: String,
    pub inputs: Vec<TypedParam>,
    pub outputs: Vec<TypedColumn>,
}

/// Combines a parsed query with its described shape and resolved types.
pub fn type_query(
    query: &TemplateQuery,
    shape: &StatementShape,
    param_types: Vec<Arc<ResolvedType>>,
    column_types: Vec<Arc<ResolvedType>>,
) -> Result<TypedQuery, TypingMismatchError> {
    if query.params.len() != shape.params.len() || param_types.len() != shape.params.len() {
        return Err(TypingMismatchError::Params {
            query: query.name.clone(),
            expected: query.params.len(),
            actual: shape.params.len().min(param_types.len()),
        });
    }
    if column_types.len() != shape.columns.len() {
        return Err(TypingMismatchError::Columns {
            query: query.name.clone(),
            expected: shape.columns.len(),
            actual: column_types.len(),
        });
    }
    if query.cardinality.returns_rows() && shape.columns.is_empty() {
        return Err(TypingMismatchError::NoColumns {
            query: query.name.clone(),
            tag: query.cardinality.tag(),
        });
    }

    let inputs = query
        .params
        .iter()
        .zip(&shape.params)
        .zip(param_types)
        .map(|((param, &type_id), ty)| TypedParam {
            name: param.name.clone(),
            type_id,
            ty,
            default: param.default.clone(),
        })
        .collect();
    let outputs = shape
        .columns
        .iter()
        .zip(column_types)
        .map(|(column, ty)| TypedColumn {
            name: column.name.clone(),
            type_id: column.type_id,
            ty,
            nullable: column.nullability != Nullability::NotNull,
        })
        .collect();

    Ok(TypedQuery {
        name: query.name.clone(),
        cardinality: query.cardinality,
        command: query.command,
        doc: query.doc.clone(),
        source_sql: query.source_sql.clone(),
        sql: query.sql.clone(),
        inputs,
        outputs,
    })
}
