use std::{
    collections::{BTreeMap, HashSet},
    error::Error,
    fmt::Write,
    path::PathBuf,
};

use pg_typegen_core::{
    Cardinality, DeclarationNode, ResolvedType, ScalarType, TypedFile, TypedQuery,
    casing::{is_identifier, to_pascal, to_snake},
    types::{ArrayType, CompositeType, EnumType},
};

use super::{CodeGen, GeneratedFile};

const HEADER: &str = "// Code generated by pg-typegen. DO NOT EDIT.\n";

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do",
    "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe", "unsized",
    "use", "virtual", "where", "while", "yield",
];

/// Turns a snake case name into a usable Rust field, binding or function name.
fn escape_ident(name: &str) -> String {
    match name {
        "self" | "super" | "crate" | "Self" | "_" => format!("{name}_"),
        name if KEYWORDS.contains(&name) => format!("r#{name}"),
        name => name.to_owned(),
    }
}

/// Snake case identifiers, unique within one list.
fn field_names<'a>(names: impl Iterator<Item = &'a str>, fallback: &str) -> Vec<String> {
    let mut used = HashSet::new();
    let mut result = vec![];
    for (idx, name) in names.enumerate() {
        let mut name = to_snake(name);
        if !is_identifier(&name) {
            name = format!("{fallback}_{idx}");
        }
        let mut candidate = name.clone();
        let mut suffix = 2;
        while !used.insert(candidate.clone()) {
            candidate = format!("{name}_{suffix}");
            suffix += 1;
        }
        result.push(escape_ident(&candidate));
    }
    result
}

fn variant_names(labels: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    labels
        .iter()
        .enumerate()
        .map(|(idx, label)| {
            let name = to_pascal(label);
            match is_identifier(&name) && name != "Self" && used.insert(name.clone()) {
                true => name,
                false => format!("UnnamedLabel{idx}"),
            }
        })
        .collect()
}

/// A raw string literal that can hold `text` unchanged.
fn raw_string(text: &str) -> String {
    let mut longest = 0;
    let mut current = None;
    for c in text.chars() {
        current = match (c, current) {
            ('"', _) => Some(0),
            ('#', Some(count)) => Some(count + 1),
            _ => None,
        };
        longest = longest.max(current.unwrap_or(0));
    }
    let hashes = "#".repeat(longest + 1);
    format!("r{hashes}\"{text}\"{hashes}")
}

/// Name sqlx uses to look the type up. Types in `public` go unqualified.
fn sqlx_type_name(pg_name: &str) -> &str {
    pg_name.strip_prefix("public.").unwrap_or(pg_name)
}

fn param_type(ty: &ResolvedType) -> String {
    match ty {
        ResolvedType::Scalar { scalar, .. } => match scalar {
            ScalarType::Bool
            | ScalarType::Char
            | ScalarType::Int2
            | ScalarType::Int4
            | ScalarType::Int8
            | ScalarType::Float4
            | ScalarType::Float8
            | ScalarType::Date
            | ScalarType::Time { tz: false }
            | ScalarType::Timestamp { .. }
            | ScalarType::Uuid => scalar.rust_type(),
            ScalarType::Text | ScalarType::VarChar | ScalarType::BpChar | ScalarType::Name => {
                "&str".to_owned()
            }
            ScalarType::Bytea => "&[u8]".to_owned(),
            ScalarType::Array(elem) => format!("&[{}]", elem.rust_type()),
            _ => format!("&{}", scalar.rust_type()),
        },
        ResolvedType::Enum(EnumType { name, .. }) => name.clone(),
        ResolvedType::Composite(CompositeType { name, .. }) => format!("&{name}"),
        ResolvedType::Array(ArrayType { elem, .. }) => format!("&[{}]", elem.rust_type()),
    }
}

fn output_type(ty: &ResolvedType, nullable: bool) -> String {
    match nullable {
        true => format!("Option<{}>", ty.rust_type()),
        false => ty.rust_type(),
    }
}

fn render_enum(code: &mut String, enum_type: &EnumType) -> std::fmt::Result {
    writeln!(code, "/// Postgres enum `{}`.", enum_type.pg_name)?;
    writeln!(code, "#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]")?;
    writeln!(code, "#[sqlx(type_name = \"{}\")]", sqlx_type_name(&enum_type.pg_name))?;
    writeln!(code, "pub enum {} {{", enum_type.name)?;
    for (label, variant) in enum_type.labels.iter().zip(variant_names(&enum_type.labels)) {
        writeln!(code, "    #[sqlx(rename = {:?})]", label)?;
        writeln!(code, "    {variant},")?;
    }
    writeln!(code, "}}")
}

fn render_composite(code: &mut String, composite: &CompositeType) -> std::fmt::Result {
    writeln!(code, "/// Postgres composite type `{}`.", composite.pg_name)?;
    writeln!(code, "#[derive(Debug, Clone, sqlx::Type)]")?;
    writeln!(code, "#[sqlx(type_name = \"{}\")]", sqlx_type_name(&composite.pg_name))?;
    writeln!(code, "pub struct {} {{", composite.name)?;
    let names = field_names(composite.fields.iter().map(|field| field.name.as_str()), "field");
    for (field, name) in composite.fields.iter().zip(names) {
        // Composite fields carry no NOT NULL information.
        writeln!(code, "    pub {name}: {},", output_type(&field.ty, true))?;
    }
    writeln!(code, "}}")
}

fn render_types(declarations: &[DeclarationNode]) -> Result<String, Box<dyn Error>> {
    let mut code = HEADER.to_owned();
    for node in declarations {
        code.push('\n');
        match &*node.ty {
            ResolvedType::Scalar { .. } => continue,
            ResolvedType::Enum(enum_type) => render_enum(&mut code, enum_type)?,
            ResolvedType::Composite(composite) => render_composite(&mut code, composite)?,
            ResolvedType::Array(array) => {
                writeln!(code, "/// Postgres array type `{}`.", array.pg_name)?;
                writeln!(code, "pub type {} = Vec<{}>;", array.name, array.elem.rust_type())?;
            }
        }
    }
    Ok(code)
}

fn render_query(code: &mut String, query: &TypedQuery) -> Result<(), Box<dyn Error>> {
    let fn_name = escape_ident(&to_snake(&query.name));
    let const_name = format!("{}_SQL", to_snake(&query.name).to_uppercase());
    let row_name = format!("{}Row", to_pascal(&query.name));

    writeln!(code)?;
    writeln!(code, "pub const {const_name}: &str = {};", raw_string(&query.sql))?;

    let returns_rows = query.cardinality.returns_rows();
    let single_column = query.outputs.len() == 1;
    let row_type = match query.outputs.first() {
        Some(output) if single_column => output_type(&output.ty, output.nullable),
        _ => row_name.clone(),
    };
    if returns_rows && !single_column {
        let names = field_names(query.outputs.iter().map(|output| output.name.as_str()), "column");
        writeln!(code)?;
        writeln!(code, "#[derive(Debug, Clone)]")?;
        writeln!(code, "pub struct {row_name} {{")?;
        for (output, name) in query.outputs.iter().zip(&names) {
            writeln!(code, "    pub {name}: {},", output_type(&output.ty, output.nullable))?;
        }
        writeln!(code, "}}")?;
        writeln!(code)?;
        writeln!(code, "impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for {row_name} {{")?;
        writeln!(code, "    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {{")?;
        writeln!(code, "        use sqlx::Row;")?;
        writeln!(code, "        Ok(Self {{")?;
        for (idx, name) in names.iter().enumerate() {
            writeln!(code, "            {name}: row.try_get({idx})?,")?;
        }
        writeln!(code, "        }})")?;
        writeln!(code, "    }}")?;
        writeln!(code, "}}")?;
    }

    let return_type = match query.cardinality {
        Cardinality::One => row_type.clone(),
        Cardinality::Opt => format!("Option<{row_type}>"),
        Cardinality::Many => format!("Vec<{row_type}>"),
        Cardinality::Exec => "()".to_owned(),
        Cardinality::ExecRows => "u64".to_owned(),
    };
    let params = field_names(query.inputs.iter().map(|input| input.name.as_str()), "arg");

    writeln!(code)?;
    for line in &query.doc {
        writeln!(code, "/// {line}")?;
    }
    let defaults: Vec<_> = query
        .inputs
        .iter()
        .zip(&params)
        .filter_map(|(input, param)| Some((param, input.default.as_ref()?)))
        .collect();
    if !defaults.is_empty() {
        if !query.doc.is_empty() {
            writeln!(code, "///")?;
        }
        for (param, default) in defaults {
            writeln!(code, "/// `{param}` defaults to `{default}` in the source query.")?;
        }
    }
    let mut signature = vec!["executor: E".to_owned()];
    for (input, param) in query.inputs.iter().zip(&params) {
        signature.push(format!("{param}: {}", param_type(&input.ty)));
    }
    writeln!(
        code,
        "pub async fn {fn_name}<'e, E>({}) -> Result<{return_type}, sqlx::Error>",
        signature.join(", ")
    )?;
    writeln!(code, "where")?;
    writeln!(code, "    E: sqlx::PgExecutor<'e>,")?;
    writeln!(code, "{{")?;

    let builder = match (returns_rows, single_column) {
        (false, _) => format!("sqlx::query({const_name})"),
        (true, true) => format!("sqlx::query_scalar::<_, {row_type}>({const_name})"),
        (true, false) => format!("sqlx::query_as::<_, {row_name}>({const_name})"),
    };
    let fetch = match query.cardinality {
        Cardinality::One => "fetch_one",
        Cardinality::Opt => "fetch_optional",
        Cardinality::Many => "fetch_all",
        Cardinality::Exec | Cardinality::ExecRows => "execute",
    };
    let prefix = match query.cardinality {
        Cardinality::ExecRows => "Ok(",
        _ => "",
    };
    writeln!(code, "    {prefix}{builder}")?;
    for param in &params {
        writeln!(code, "        .bind({param})")?;
    }
    match query.cardinality {
        Cardinality::Exec => {
            writeln!(code, "        .{fetch}(executor)")?;
            writeln!(code, "        .await?;")?;
            writeln!(code, "    Ok(())")?;
        }
        Cardinality::ExecRows => {
            writeln!(code, "        .{fetch}(executor)")?;
            writeln!(code, "        .await?")?;
            writeln!(code, "        .rows_affected())")?;
        }
        Cardinality::One | Cardinality::Opt | Cardinality::Many => {
            writeln!(code, "        .{fetch}(executor)")?;
            writeln!(code, "        .await")?;
        }
    }
    writeln!(code, "}}")?;
    Ok(())
}

fn render_file(file: &TypedFile) -> Result<String, Box<dyn Error>> {
    let mut code = HEADER.to_owned();
    writeln!(code, "// Source: {}", file.source.display())?;
    writeln!(code)?;
    writeln!(code, "#[allow(unused_imports)]")?;
    writeln!(code, "use super::types::*;")?;
    for query in &file.queries {
        render_query(&mut code, query)?;
    }
    Ok(code)
}

/// One module per query file plus `types.rs` and `mod.rs`.
#[derive(Default)]
pub struct RustCodeGen {
    files: BTreeMap<String, TypedFile>,
}

impl RustCodeGen {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeGen for RustCodeGen {
    fn push(&mut self, file: &TypedFile) -> Result<(), Box<dyn Error>> {
        let stem = file.stem();
        if stem == "types" || stem == "mod" {
            return Err(format!("{} would overwrite the generated {stem}.rs", file.source.display()).into());
        }
        if let Some(existing) = self.files.get(&stem) {
            return Err(format!(
                "{} and {} both generate {stem}.rs",
                existing.source.display(),
                file.source.display()
            )
            .into());
        }
        self.files.insert(stem, file.clone());
        Ok(())
    }

    fn finalize(&self, declarations: &[DeclarationNode]) -> Result<Vec<GeneratedFile>, Box<dyn Error>> {
        let mut generated = vec![GeneratedFile {
            path: PathBuf::from("types.rs"),
            contents: render_types(declarations)?,
        }];
        let mut module = HEADER.to_owned();
        writeln!(module)?;
        writeln!(module, "pub mod types;")?;
        for (stem, file) in &self.files {
            writeln!(module, "pub mod {};", escape_ident(stem))?;
            generated.push(GeneratedFile {
                path: PathBuf::from(format!("{stem}.rs")),
                contents: render_file(file)?,
            });
        }
        generated.push(GeneratedFile {
            path: PathBuf::from("mod.rs"),
            contents: module,
        });
        Ok(generated)
    }
}
