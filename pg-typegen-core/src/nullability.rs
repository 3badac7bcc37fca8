use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use sqlparser::ast::{
    Expr, Ident, JoinOperator, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use crate::catalog::{Nullability, OutputDescriptor};

/// A relation in the FROM clause. The flags on a join mark the side that
/// the join can null-extend.
#[derive(Debug, Clone)]
enum Table {
    Db {
        name: String,
    },
    Alias {
        name: String,
        source: Arc<Table>,
    },
    Join {
        left: (bool, Arc<Table>),
        right: (bool, Arc<Table>),
    },
    Unknown {
        sql: String,
    },
}

/// Where an output column comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    DependsOn { table: String, column: String },
    Maybe(Arc<Source>),
    Either(Arc<Source>, Arc<Source>),
    Unknown { sql: String },
}

impl Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::DependsOn { table, column } => write!(f, "{table}.{column}"),
            Source::Maybe(source) => write!(f, "maybe({source})"),
            Source::Either(left, right) => write!(f, "either({left}, {right})"),
            Source::Unknown { sql } => write!(f, "unknown({sql})"),
        }
    }
}

impl Source {
    fn depends_on(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::DependsOn {
            table: table.into(),
            column: column.into(),
        }
    }

    fn maybe(self) -> Self {
        Self::Maybe(self.into())
    }

    fn either(left: Source, right: Source) -> Self {
        Self::Either(left.into(), right.into())
    }

    /// True unless every path to the column avoids null-extended relations.
    fn null_extended(&self) -> bool {
        match self {
            Source::DependsOn { .. } => false,
            Source::Maybe(_) | Source::Unknown { .. } => true,
            Source::Either(left, right) => left.null_extended() || right.null_extended(),
        }
    }
}

impl Table {
    fn new(name: impl ToString) -> Arc<Self> {
        Self::Db {
            name: name.to_string(),
        }
        .into()
    }

    fn alias(name: impl ToString, source: Arc<Table>) -> Arc<Self> {
        Self::Alias {
            name: name.to_string(),
            source,
        }
        .into()
    }

    fn join(left: (bool, Arc<Table>), right: (bool, Arc<Table>)) -> Arc<Self> {
        Self::Join { left, right }.into()
    }

    fn unknown(sql: String) -> Arc<Self> {
        Self::Unknown { sql }.into()
    }

    fn has_nullable_side(&self) -> bool {
        match self {
            Table::Db { .. } => false,
            Table::Alias { source, .. } => source.has_nullable_side(),
            Table::Join {
                left: (left_null, left),
                right: (right_null, right),
            } => {
                *left_null || *right_null || left.has_nullable_side() || right.has_nullable_side()
            }
            Table::Unknown { .. } => true,
        }
    }

    fn find_table_column(&self, table: &str, ident: &str) -> Option<Source> {
        match self {
            Table::Db { name } => match name == table {
                true => Some(Source::depends_on(table, ident)),
                false => None,
            },
            Table::Alias { name, source } => match name == table {
                true => Some(source.find_column(ident)),
                false => None,
            },
            Table::Join {
                left: (left_null, left),
                right: (right_null, right),
            } => {
                let left = left.find_table_column(table, ident);
                let right = right.find_table_column(table, ident);
                let left = match left_null {
                    true => left.map(Source::maybe),
                    false => left,
                };
                let right = match right_null {
                    true => right.map(Source::maybe),
                    false => right,
                };
                match (left, right) {
                    (None, None) => None,
                    (None, Some(right)) => Some(right),
                    (Some(left), None) => Some(left),
                    (Some(left), Some(right)) => Some(Source::either(left, right)),
                }
            }
            Table::Unknown { sql } => Some(Source::Unknown { sql: sql.clone() }),
        }
    }

    fn find_column(&self, ident: &str) -> Source {
        match self {
            Table::Db { name } => Source::depends_on(name, ident),
            Table::Alias { source, .. } => source.find_column(ident),
            Table::Join {
                left: (left_null, left),
                right: (right_null, right),
            } => {
                let left = left.find_column(ident);
                let right = right.find_column(ident);
                let left = match left_null {
                    true => left.maybe(),
                    false => left,
                };
                let right = match right_null {
                    true => right.maybe(),
                    false => right,
                };
                Source::either(left, right)
            }
            Table::Unknown { sql } => Source::Unknown { sql: sql.clone() },
        }
    }
}

/// Postgres folds unquoted identifiers to lower case.
fn ident_name(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

fn unescape(name: &str) -> String {
    if !name.starts_with('"') || !name.ends_with('"') || name.len() < 2 {
        return name.to_lowercase();
    }
    name[1..name.len() - 1].replace("\"\"", "\"")
}

/// `schema.table` is referenced by its last part in column qualifiers.
fn relation_name(name: &str) -> String {
    let last = match name.strip_suffix('"') {
        Some(rest) => rest.rfind(".\"").map_or(name, |idx| &name[idx + 1..]),
        None => name.rsplit_once('.').map_or(name, |(_, last)| last),
    };
    unescape(last)
}

fn relation_tables(table_factor: &TableFactor) -> Arc<Table> {
    match table_factor {
        TableFactor::Table { name, alias, .. } => {
            let table = Table::new(relation_name(&name.to_string()));
            match alias {
                Some(alias) => Table::alias(ident_name(&alias.name), table),
                None => table,
            }
        }
        TableFactor::NestedJoin {
            table_with_joins,
            alias,
        } => {
            let table = get_join(table_with_joins);
            match alias {
                Some(alias) => Table::alias(ident_name(&alias.name), table),
                None => table,
            }
        }
        _ => Table::unknown(table_factor.to_string()),
    }
}

fn get_join(table: &TableWithJoins) -> Arc<Table> {
    let mut left = relation_tables(&table.relation);
    for join in &table.joins {
        let (left_null, right_null) = match &join.join_operator {
            JoinOperator::Inner(_) | JoinOperator::Join(_) => (false, false),
            JoinOperator::LeftOuter(_) | JoinOperator::Left(_) => (false, true),
            JoinOperator::RightOuter(_) | JoinOperator::Right(_) => (true, false),
            JoinOperator::FullOuter(_) => (true, true),
            _ if join.to_string().trim_start().starts_with("CROSS JOIN") => (false, false),
            _ => return Table::unknown(join.to_string()),
        };
        let right = relation_tables(&join.relation);
        left = Table::join((left_null, left), (right_null, right));
    }
    left
}

fn find_field_in_expr(expr: &Expr, tables: &[Arc<Table>]) -> Source {
    match expr {
        Expr::Identifier(ident) => {
            let name = ident_name(ident);
            let mut tables = tables.iter();
            let Some(first) = tables.next() else {
                return Source::Unknown {
                    sql: expr.to_string(),
                };
            };
            tables.fold(first.find_column(&name), |result, table| {
                Source::either(result, table.find_column(&name))
            })
        }
        Expr::CompoundIdentifier(idents) if idents.len() >= 2 => {
            let table = ident_name(&idents[idents.len() - 2]);
            let column = ident_name(&idents[idents.len() - 1]);
            let mut result = None;
            for candidate in tables {
                let current = candidate.find_table_column(&table, &column);
                result = match (result, current) {
                    (None, current) => current,
                    (Some(result), Some(current)) => Some(Source::either(result, current)),
                    (Some(result), None) => Some(result),
                };
            }
            result.unwrap_or_else(|| Source::Unknown {
                sql: expr.to_string(),
            })
        }
        Expr::Nested(expr) => find_field_in_expr(expr, tables),
        _ => Source::Unknown {
            sql: expr.to_string(),
        },
    }
}

/// Output columns of a SELECT, traced through its FROM clause.
struct Projection {
    fields: Vec<(Option<String>, Source)>,
    wildcard: bool,
    tables: Vec<Arc<Table>>,
}

fn select_projection(statement: &Statement) -> Option<Projection> {
    let Statement::Query(query) = statement else {
        return None;
    };
    if query.with.is_some() {
        return None;
    }
    let SetExpr::Select(select) = &*query.body else {
        return None;
    };
    let tables: Vec<_> = select.from.iter().map(get_join).collect();
    let mut fields = vec![];
    let mut wildcard = false;
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                let name = match expr {
                    Expr::Identifier(ident) => Some(ident_name(ident)),
                    Expr::CompoundIdentifier(idents) => idents.last().map(ident_name),
                    _ => None,
                };
                fields.push((name, find_field_in_expr(expr, &tables)));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                fields.push((Some(ident_name(alias)), find_field_in_expr(expr, &tables)));
            }
            _ => wildcard = true,
        }
    }
    Some(Projection {
        fields,
        wildcard,
        tables,
    })
}

fn downgrade(column: &mut OutputDescriptor, reason: &dyn Display) {
    if column.nullability == Nullability::NotNull {
        debug!(column = %column.name, %reason, "column may be null");
        column.nullability = Nullability::Nullable;
    }
}

/// Downgrades catalog `NotNull` answers for columns that an outer join can
/// null-extend, or whose source cannot be traced.
///
/// DML statements keep the catalog's answer.
pub fn refine(sql: &str, columns: &mut [OutputDescriptor]) {
    if columns.iter().all(|column| column.nullability != Nullability::NotNull) {
        return;
    }
    let statement = match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(mut statements) if statements.len() == 1 => statements.remove(0),
        Ok(_) => {
            warn!("expected exactly one statement, treating all columns as nullable");
            columns.iter_mut().for_each(|column| downgrade(column, &"unparsed"));
            return;
        }
        Err(err) => {
            warn!("could not analyze statement, treating all columns as nullable: {err}");
            columns.iter_mut().for_each(|column| downgrade(column, &"unparsed"));
            return;
        }
    };
    if !matches!(statement, Statement::Query(_)) {
        return;
    }
    let Some(projection) = select_projection(&statement) else {
        columns
            .iter_mut()
            .for_each(|column| downgrade(column, &"not a plain select"));
        return;
    };

    if !projection.wildcard && projection.fields.len() == columns.len() {
        for (column, (_, source)) in columns.iter_mut().zip(&projection.fields) {
            if source.null_extended() {
                downgrade(column, source);
            }
        }
        return;
    }

    let wildcard_nullable = projection.tables.iter().any(|table| table.has_nullable_side());
    // A wildcard can expand to a column that shares its name with a traced
    // field but comes from another relation.
    let mut name_counts: HashMap<String, usize> = HashMap::new();
    for column in columns.iter() {
        *name_counts.entry(column.name.clone()).or_default() += 1;
    }
    for column in columns.iter_mut() {
        if projection.wildcard && wildcard_nullable && name_counts[&column.name] > 1 {
            downgrade(column, &"ambiguous wildcard column");
            continue;
        }
        let traced = projection
            .fields
            .iter()
            .find(|(name, _)| name.as_deref() == Some(column.name.as_str()));
        match traced {
            Some((_, source)) if source.null_extended() => downgrade(column, source),
            Some(_) => {}
            None if projection.wildcard && !wildcard_nullable => {}
            None => downgrade(column, &"untraced"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::refine;
    use crate::catalog::Nullability::{self, NotNull, Nullable};
    use crate::catalog::OutputDescriptor;
    use crate::types::TypeId;

    fn not_null(names: &[&str]) -> Vec<OutputDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(ordinal, name)| OutputDescriptor {
                ordinal,
                name: (*name).to_owned(),
                type_id: TypeId(23),
                nullability: Nullability::NotNull,
            })
            .collect()
    }

    fn refined(sql: &str, names: &[&str]) -> Vec<Nullability> {
        let mut columns = not_null(names);
        refine(sql, &mut columns);
        columns.into_iter().map(|column| column.nullability).collect()
    }

    #[test]
    fn plain_selects_keep_catalog_answer() {
        assert_eq!(
            refined("select id, users.email as mail from users where id = $1", &["id", "mail"]),
            [NotNull, NotNull]
        );
    }

    #[test]
    fn inner_joins_keep_catalog_answer() {
        assert_eq!(
            refined(
                "select u.id, o.total from users u join orders o on o.user_id = u.id",
                &["id", "total"]
            ),
            [NotNull, NotNull]
        );
    }

    #[test]
    fn left_join_nulls_right_side() {
        assert_eq!(
            refined(
                "select u.id, o.total from users u left join orders o on o.user_id = u.id",
                &["id", "total"]
            ),
            [NotNull, Nullable]
        );
    }

    #[test]
    fn right_and_full_joins() {
        assert_eq!(
            refined(
                "select u.id, o.total from users u right outer join orders o on true",
                &["id", "total"]
            ),
            [Nullable, NotNull]
        );
        assert_eq!(
            refined(
                "select u.id, o.total from users u full join orders o on true",
                &["id", "total"]
            ),
            [Nullable, Nullable]
        );
    }

    #[test]
    fn chained_joins_propagate() {
        assert_eq!(
            refined(
                "select a.x, b.y, c.z from a left join b on true join c on true",
                &["x", "y", "z"]
            ),
            [NotNull, Nullable, NotNull]
        );
    }

    #[test]
    fn schema_qualified_and_quoted_tables() {
        assert_eq!(
            refined(
                r#"select "Users".id, o.total from public."Users" left join app.orders o on true"#,
                &["id", "total"]
            ),
            [NotNull, Nullable]
        );
        assert_eq!(
            refined("select orders.total from app.orders", &["total"]),
            [NotNull]
        );
    }

    #[test]
    fn untraceable_sources_are_nullable() {
        assert_eq!(
            refined("select t.id from (select id from users) t", &["id"]),
            [Nullable]
        );
        assert_eq!(
            refined("with t as (select id from users) select id from t", &["id"]),
            [Nullable]
        );
        assert_eq!(
            refined("select id from a union select id from b", &["id"]),
            [Nullable]
        );
    }

    #[test]
    fn wildcards_follow_the_join_tree() {
        assert_eq!(refined("select * from users", &["id", "email"]), [NotNull, NotNull]);
        assert_eq!(
            refined("select * from users u left join orders o on true", &["id", "total"]),
            [Nullable, Nullable]
        );
    }

    #[test]
    fn wildcard_columns_sharing_a_traced_name_are_nullable() {
        assert_eq!(
            refined(
                "select u.id, * from users u left join orders o on o.user_id = u.id",
                &["id", "id", "email", "id", "total"]
            ),
            [Nullable, Nullable, Nullable, Nullable, Nullable]
        );
        assert_eq!(
            refined("select u.id, * from users u join orders o on true", &["id", "id", "total"]),
            [NotNull, NotNull, NotNull]
        );
    }

    #[test]
    fn unparsable_statements_downgrade_everything() {
        assert_eq!(refined("select id from users where", &["id"]), [Nullable]);
    }

    #[test]
    fn dml_keeps_catalog_answer() {
        assert_eq!(
            refined(
                "insert into users (email) values ($1) returning id",
                &["id"]
            ),
            [NotNull]
        );
    }

    #[test]
    fn unknown_and_nullable_are_untouched() {
        let mut columns = not_null(&["a", "b"]);
        columns[0].nullability = Nullability::Unknown;
        columns[1].nullability = Nullability::Nullable;
        refine("select a, b from (select 1 a, null b) t", &mut columns);
        assert_eq!(columns[0].nullability, Nullability::Unknown);
        assert_eq!(columns[1].nullability, Nullability::Nullable);
    }
}
