use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::casing::{is_identifier, to_snake};
use crate::catalog::{Catalog, CatalogError, CatalogFailure, bounded};
use crate::declare::{DeclarationGraph, DeclarationNode};
use crate::nullability;
use crate::parser::{ParseError, QueryFile, TemplateQuery};
use crate::resolver::{ResolutionError, TypeResolver};
use crate::types::{ResolvedType, TypeId};
use crate::typing::{TypedQuery, TypingMismatchError, type_query};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("query {query}: {source}")]
    Catalog { query: String, source: CatalogError },
    #[error("query {query}: {source}")]
    Resolution {
        query: String,
        source: ResolutionError,
    },
    #[error("ordering declarations: {0}")]
    Declaration(ResolutionError),
    #[error(transparent)]
    Typing(#[from] TypingMismatchError),
    #[error("query {query} was cancelled after {timeout:?}")]
    Cancelled { query: String, timeout: Duration },
    #[error("query {query} is defined in both {} and {}", first.display(), second.display())]
    DuplicateQuery {
        query: String,
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound for each individual catalog call.
    pub timeout: Duration,
    pub package: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            package: "queries".to_owned(),
        }
    }
}

/// Typed queries of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedFile {
    pub package: String,
    pub source: PathBuf,
    pub queries: Vec<TypedQuery>,
}

impl TypedFile {
    /// File stem of the source, used to name per-file outputs.
    pub fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|stem| to_snake(&stem.to_string_lossy()))
            .filter(|stem| is_identifier(stem))
            .unwrap_or_else(|| "queries".to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub files: Vec<TypedFile>,
    pub declarations: Vec<DeclarationNode>,
}

/// State shared by every query of one generation run. The type cache and the
/// declaration graph only grow and are dropped with the run.
#[derive(Debug)]
pub struct GenerationRun {
    options: RunOptions,
    resolver: TypeResolver,
    graph: DeclarationGraph,
    // query name -> file it was first seen in
    seen: HashMap<String, PathBuf>,
}

impl GenerationRun {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            resolver: TypeResolver::new(),
            graph: DeclarationGraph::new(),
            seen: HashMap::new(),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Types every query of `file`, one at a time, in source order.
    pub async fn type_file<C: Catalog>(
        &mut self,
        catalog: &C,
        file: &QueryFile,
        package: &str,
    ) -> Result<TypedFile, Error> {
        let mut queries = Vec::with_capacity(file.queries.len());
        for query in &file.queries {
            if let Some(first) = self.seen.get(&query.name) {
                return Err(Error::DuplicateQuery {
                    query: query.name.clone(),
                    first: first.clone(),
                    second: file.path.clone(),
                });
            }
            self.seen.insert(query.name.clone(), file.path.clone());
            queries.push(self.type_query(catalog, query).await?);
        }
        info!(file = %file.path.display(), queries = queries.len(), "typed file");
        Ok(TypedFile {
            package: package.to_owned(),
            source: file.path.clone(),
            queries,
        })
    }

    async fn type_query<C: Catalog>(
        &mut self,
        catalog: &C,
        query: &TemplateQuery,
    ) -> Result<TypedQuery, Error> {
        let timeout = self.options.timeout;
        let mut shape = bounded(timeout, catalog.describe(&query.sql))
            .await
            .map_err(|err| catalog_error(query, err))?;
        debug!(query = %query.name, ?shape, "described query");
        nullability::refine(&query.sql, &mut shape.columns);

        let param_types = self.resolve_all(catalog, query, &shape.params).await?;
        let column_ids: Vec<TypeId> = shape.columns.iter().map(|column| column.type_id).collect();
        let column_types = self.resolve_all(catalog, query, &column_ids).await?;

        let typed = type_query(query, &shape, param_types, column_types)?;
        info!(
            query = %typed.name,
            cardinality = typed.cardinality.tag(),
            inputs = typed.inputs.len(),
            outputs = typed.outputs.len(),
            "typed query"
        );
        Ok(typed)
    }

    async fn resolve_all<C: Catalog>(
        &mut self,
        catalog: &C,
        query: &TemplateQuery,
        type_ids: &[TypeId],
    ) -> Result<Vec<Arc<ResolvedType>>, Error> {
        let mut resolved = Vec::with_capacity(type_ids.len());
        for &type_id in type_ids {
            self.resolver
                .load(catalog, type_id, self.options.timeout)
                .await
                .map_err(|err| catalog_error(query, err))?;
            let ty = self
                .resolver
                .resolve(type_id)
                .and_then(|ty| self.graph.add_type(&ty).map(|()| ty))
                .map_err(|source| Error::Resolution {
                    query: query.name.clone(),
                    source,
                })?;
            resolved.push(ty);
        }
        Ok(resolved)
    }

    /// Ends the run and returns every declaration in emission order.
    pub fn finish(self) -> Result<Vec<DeclarationNode>, Error> {
        let declarations = self.graph.ordered().map_err(Error::Declaration)?;
        info!(declarations = declarations.len(), "ordered declarations");
        Ok(declarations)
    }
}

fn catalog_error(query: &TemplateQuery, err: CatalogFailure) -> Error {
    match err {
        CatalogFailure::Catalog(source) => Error::Catalog {
            query: query.name.clone(),
            source,
        },
        CatalogFailure::TimedOut(timeout) => Error::Cancelled {
            query: query.name.clone(),
            timeout,
        },
    }
}

/// Types every file against one catalog, sharing types across files.
pub async fn generate<C: Catalog>(
    catalog: &C,
    files: &[QueryFile],
    options: RunOptions,
) -> Result<RunOutput, Error> {
    let package = options.package.clone();
    let mut run = GenerationRun::new(options);
    let mut typed = Vec::with_capacity(files.len());
    for file in files {
        typed.push(run.type_file(catalog, file, &package).await?);
    }
    Ok(RunOutput {
        files: typed,
        declarations: run.finish()?,
    })
}

/// The explicit package name, or else the output directory's base name.
pub fn package_name(explicit: Option<&str>, output_dir: &Path) -> String {
    if let Some(explicit) = explicit {
        return explicit.to_owned();
    }
    output_dir
        .file_name()
        .map(|name| to_snake(&name.to_string_lossy()))
        .filter(|name| is_identifier(name))
        .unwrap_or_else(|| "queries".to_owned())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Error, GenerationRun, RunOptions, generate, package_name};
    use crate::catalog::Nullability::{NotNull, Nullable, Unknown};
    use crate::catalog::TypeKind;
    use crate::catalog::mock::MockCatalog;
    use crate::declare::DeclarationKind;
    use crate::parser::{Cardinality, QueryFile, parse_query_file};
    use crate::resolver::ResolutionError;
    use crate::types::{ResolvedType, ScalarType, TypeId};
    use crate::typing::TypingMismatchError;

    const FIND_USER: &str =
        "-- name: FindUserByID :one\nSELECT id, status FROM users WHERE id = pggen.arg('ID');\n";

    fn users_catalog() -> MockCatalog {
        MockCatalog::default()
            .with_enum(16_400, "user_status", &["active", "banned"])
            .with_statement(
                "SELECT id, status FROM users WHERE id = $1",
                &[23],
                &[("id", 23, NotNull), ("status", 16_400, Unknown)],
            )
    }

    fn parse(path: &str, source: &str) -> QueryFile {
        parse_query_file(path, source).unwrap()
    }

    #[tokio::test]
    async fn find_user_by_id() {
        let catalog = users_catalog();
        let files = [parse("users.sql", FIND_USER)];
        let output = generate(&catalog, &files, RunOptions::default()).await.unwrap();

        let query = &output.files[0].queries[0];
        assert_eq!(query.name, "FindUserByID");
        assert_eq!(query.cardinality, Cardinality::One);
        assert_eq!(query.cardinality.to_string(), "exactly one row");

        assert_eq!(query.inputs.len(), 1);
        assert_eq!(query.inputs[0].name, "ID");
        assert_eq!(
            *query.inputs[0].ty,
            ResolvedType::Scalar {
                type_id: TypeId(23),
                scalar: ScalarType::Int4
            }
        );

        assert_eq!(query.outputs.len(), 2);
        assert_eq!(query.outputs[0].name, "id");
        assert!(!query.outputs[0].nullable);
        assert_eq!(query.outputs[1].name, "status");
        assert!(query.outputs[1].nullable);
        let ResolvedType::Enum(status) = &*query.outputs[1].ty else {
            panic!("expected enum, got {:?}", query.outputs[1].ty);
        };
        assert_eq!(status.pg_name, "public.user_status");
        assert_eq!(status.labels, ["active", "banned"]);

        assert_eq!(output.declarations.len(), 1);
        assert_eq!(output.declarations[0].kind, DeclarationKind::Enum);
        assert_eq!(output.declarations[0].name(), "UserStatus");
    }

    #[tokio::test]
    async fn types_are_shared_across_files() {
        let catalog = users_catalog().with_statement(
            "SELECT status FROM users",
            &[],
            &[("status", 16_400, NotNull)],
        );
        let files = [
            parse("users.sql", FIND_USER),
            parse(
                "status.sql",
                "-- name: ListStatuses :many\nSELECT status FROM users;",
            ),
        ];
        let output = generate(&catalog, &files, RunOptions::default()).await.unwrap();
        let first = &output.files[0].queries[0].outputs[1].ty;
        let second = &output.files[1].queries[0].outputs[0].ty;
        assert!(Arc::ptr_eq(first, second));
        assert_eq!(output.declarations.len(), 1);
        assert_eq!(catalog.lookups.get(), 1);
    }

    #[tokio::test]
    async fn repeated_placeholders_share_one_input() {
        let catalog = MockCatalog::default().with_statement(
            "SELECT id FROM users WHERE id = $1 OR parent_id = $1",
            &[23],
            &[("id", 23, NotNull)],
        );
        let files = [parse(
            "family.sql",
            "-- name: FindFamily :many\n\
             SELECT id FROM users WHERE id = pggen.arg('ID') OR parent_id = pggen.arg('ID');\n",
        )];
        let output = generate(&catalog, &files, RunOptions::default()).await.unwrap();
        let query = &output.files[0].queries[0];
        assert_eq!(query.sql, "SELECT id FROM users WHERE id = $1 OR parent_id = $1");
        assert_eq!(query.inputs.len(), 1);
        assert_eq!(query.inputs[0].name, "ID");
        assert_eq!(query.inputs[0].type_id, TypeId(23));
    }

    #[tokio::test]
    async fn runs_are_deterministic() {
        let catalog = users_catalog()
            .with_enum(16_401, "mood", &["happy", "sad"])
            .with_composite(16_500, "profile", &[("mood", 16_401), ("user_id", 23)])
            .with_type(16_501, "_profile", TypeKind::Array { elem: TypeId(16_500) })
            .with_statement(
                "SELECT profiles, status FROM people",
                &[],
                &[("profiles", 16_501, Nullable), ("status", 16_400, NotNull)],
            );
        let source = "-- name: People :many\nSELECT profiles, status FROM people;\n\n".to_owned()
            + FIND_USER;
        let run = || async {
            generate(&catalog, &[parse("people.sql", &source)], RunOptions::default())
                .await
                .unwrap()
        };
        let first = run().await;
        let second = run().await;
        assert_eq!(first, second);
        let names: Vec<_> = first.declarations.iter().map(|node| node.name()).collect();
        assert_eq!(names, ["Mood", "Profile", "ProfileArray", "UserStatus"]);
    }

    #[tokio::test]
    async fn query_names_are_unique_across_files() {
        let catalog = users_catalog();
        let files = [parse("a.sql", FIND_USER), parse("b.sql", FIND_USER)];
        let err = generate(&catalog, &files, RunOptions::default())
            .await
            .unwrap_err();
        let Error::DuplicateQuery { query, first, second } = err else {
            panic!("expected a duplicate query error");
        };
        assert_eq!(query, "FindUserByID");
        assert_eq!(first, PathBuf::from("a.sql"));
        assert_eq!(second, PathBuf::from("b.sql"));
    }

    #[tokio::test]
    async fn slow_catalog_cancels_the_run() {
        let mut catalog = users_catalog();
        catalog.delay = Some(Duration::from_millis(200));
        let options = RunOptions {
            timeout: Duration::from_millis(10),
            ..RunOptions::default()
        };
        let err = generate(&catalog, &[parse("users.sql", FIND_USER)], options)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, Error::Cancelled { query, timeout } if query == "FindUserByID" && *timeout == Duration::from_millis(10)),
            "{err}"
        );
    }

    #[tokio::test]
    async fn describe_failures_name_the_query() {
        let catalog = MockCatalog::default();
        let err = generate(&catalog, &[parse("users.sql", FIND_USER)], RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::Catalog { query, .. } if query == "FindUserByID"));
    }

    #[tokio::test]
    async fn unmapped_types_name_the_query() {
        let catalog = MockCatalog::default()
            .with_type(3904, "int4range", TypeKind::Range)
            .with_statement("SELECT span FROM bookings", &[], &[("span", 3904, NotNull)]);
        let file = parse("b.sql", "-- name: Spans :many\nSELECT span FROM bookings;");
        let err = generate(&catalog, &[file], RunOptions::default())
            .await
            .unwrap_err();
        let Error::Resolution { query, source } = err else {
            panic!("expected a resolution error");
        };
        assert_eq!(query, "Spans");
        assert!(matches!(source, ResolutionError::Unmapped { .. }));
    }

    #[tokio::test]
    async fn row_queries_without_columns_fail() {
        let catalog = MockCatalog::default().with_statement("DELETE FROM users", &[], &[]);
        let file = parse("d.sql", "-- name: Purge :many\nDELETE FROM users;");
        let err = generate(&catalog, &[file], RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Typing(TypingMismatchError::NoColumns { .. })));
    }

    #[tokio::test]
    async fn outer_joins_downgrade_catalog_answers() {
        let sql = "SELECT u.id, o.total FROM users u LEFT JOIN orders o ON o.user_id = u.id";
        let catalog = MockCatalog::default().with_statement(
            sql,
            &[],
            &[("id", 23, NotNull), ("total", 20, NotNull)],
        );
        let file = parse("o.sql", &format!("-- name: Totals :many\n{sql};"));
        let mut run = GenerationRun::new(RunOptions::default());
        let typed = run.type_file(&catalog, &file, "orders").await.unwrap();
        let nullable: Vec<_> = typed.queries[0].outputs.iter().map(|out| out.nullable).collect();
        assert_eq!(nullable, [false, true]);
        assert_eq!(typed.package, "orders");
        assert!(run.finish().unwrap().is_empty());
    }

    #[test]
    fn package_defaults_to_output_dir() {
        assert_eq!(package_name(Some("db"), Path::new("out/gen")), "db");
        assert_eq!(package_name(None, Path::new("src/author-queries")), "author_queries");
        assert_eq!(package_name(None, Path::new("/")), "queries");
    }
}
