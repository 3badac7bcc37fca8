use std::{collections::BTreeMap, error::Error, path::PathBuf};

use pg_typegen_core::{
    Cardinality, CommandTag, DeclarationKind, DeclarationNode, ResolvedType, TypeId, TypedFile,
    TypedQuery,
};
use serde::Serialize;

use super::{CodeGen, GeneratedFile};

#[derive(Debug, Clone, Serialize)]
pub struct QueryItem {
    pub name: String,
    pub pg_type: String,
    pub type_id: TypeId,
    pub rust_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryDefinition {
    pub file: PathBuf,
    pub cardinality: Cardinality,
    pub command: CommandTag,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub doc: Vec<String>,
    pub query: String,
    pub source_query: String,
    pub inputs: Vec<QueryItem>,
    pub outputs: Vec<QueryItem>,
}

impl QueryDefinition {
    fn new(file: &TypedFile, query: &TypedQuery) -> Self {
        Self {
            file: file.source.clone(),
            cardinality: query.cardinality,
            command: query.command,
            doc: query.doc.clone(),
            query: query.sql.clone(),
            source_query: query.source_sql.clone(),
            inputs: query
                .inputs
                .iter()
                .map(|input| QueryItem {
                    name: input.name.clone(),
                    pg_type: input.ty.pg_name(),
                    type_id: input.type_id,
                    rust_type: input.ty.rust_type(),
                    nullable: false,
                    default: input.default.clone(),
                })
                .collect(),
            outputs: query
                .outputs
                .iter()
                .map(|output| QueryItem {
                    name: output.name.clone(),
                    pg_type: output.ty.pg_name(),
                    type_id: output.type_id,
                    rust_type: output.ty.rust_type(),
                    nullable: output.nullable,
                    default: None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDefinition {
    pub name: String,
    pub pg_type: String,
    pub rust_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    pub pg_type: String,
    pub type_id: TypeId,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    pub dependencies: Vec<TypeId>,
}

impl Declaration {
    fn new(node: &DeclarationNode) -> Self {
        let mut declaration = Self {
            name: node.name().to_owned(),
            kind: node.kind,
            pg_type: node.ty.pg_name(),
            type_id: node.key,
            labels: vec![],
            fields: vec![],
            element: None,
            dependencies: node.dependencies.clone(),
        };
        match &*node.ty {
            ResolvedType::Scalar { .. } => {}
            ResolvedType::Enum(enum_type) => declaration.labels = enum_type.labels.clone(),
            ResolvedType::Composite(composite) => {
                declaration.fields = composite
                    .fields
                    .iter()
                    .map(|field| FieldDefinition {
                        name: field.pg_name.clone(),
                        pg_type: field.ty.pg_name(),
                        rust_type: field.ty.rust_type(),
                    })
                    .collect()
            }
            ResolvedType::Array(array) => declaration.element = Some(array.elem.rust_type()),
        }
        declaration
    }
}

#[derive(Serialize)]
struct Output<'a> {
    package: &'a str,
    declarations: Vec<Declaration>,
    queries: &'a BTreeMap<String, QueryDefinition>,
}

/// Everything in one `<package>.json`, queries keyed by name.
pub struct JsonCodeGen {
    package: String,
    queries: BTreeMap<String, QueryDefinition>,
}

impl JsonCodeGen {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            queries: BTreeMap::new(),
        }
    }
}

impl CodeGen for JsonCodeGen {
    fn push(&mut self, file: &TypedFile) -> Result<(), Box<dyn Error>> {
        for query in &file.queries {
            self.queries
                .insert(query.name.clone(), QueryDefinition::new(file, query));
        }
        Ok(())
    }

    fn finalize(&self, declarations: &[DeclarationNode]) -> Result<Vec<GeneratedFile>, Box<dyn Error>> {
        let output = Output {
            package: &self.package,
            declarations: declarations.iter().map(Declaration::new).collect(),
            queries: &self.queries,
        };
        let mut contents = serde_json::to_string_pretty(&output)?;
        contents.push('\n');
        Ok(vec![GeneratedFile {
            path: PathBuf::from(format!("{}.json", self.package)),
            contents,
        }])
    }
}
