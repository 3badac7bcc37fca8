use std::collections::HashMap;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::casing::is_identifier;

static NAME_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^--\s*name:\s*(?P<name>\S+)\s+:(?P<tag>\S+)\s*$").expect("valid directive regex")
});

const ARG_FUNCTION: &[u8] = b"pggen.arg";

#[derive(Debug, thiserror::Error)]
#[error("{}:{line}: {kind}", path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("malformed name directive `{0}`, expected `-- name: <Identifier> :<tag>`")]
    MalformedDirective(String),
    #[error("invalid query name `{0}`")]
    InvalidName(String),
    #[error("unknown tag `:{tag}` on query {query}, expected one of :one, :opt, :many, :exec, :exec-rows")]
    UnknownTag { query: String, tag: String },
    #[error("SQL statement is not preceded by a `-- name:` directive")]
    MissingDirective,
    #[error("query {0} has an empty statement")]
    EmptyStatement(String),
    #[error("query {0} is not terminated by `;`")]
    Unterminated(String),
    #[error("query {query} has an unterminated {what}")]
    UnterminatedLiteral { query: String, what: &'static str },
    #[error("query {query} was already defined on line {first_line}")]
    DuplicateQuery { query: String, first_line: usize },
    #[error("query {query}: malformed pggen.arg placeholder: {reason}")]
    MalformedPlaceholder { query: String, reason: String },
    #[error("query {query}: parameter {param} is given conflicting defaults")]
    ConflictingDefault { query: String, param: String },
    #[error("query {query}: positional parameter `{placeholder}` is not allowed, use pggen.arg('Name')")]
    PositionalParameter { query: String, placeholder: String },
}

/// How many rows a query returns, from the tag on its name directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    One,
    Opt,
    Many,
    Exec,
    ExecRows,
}

impl Cardinality {
    pub fn tag(self) -> &'static str {
        match self {
            Cardinality::One => "one",
            Cardinality::Opt => "opt",
            Cardinality::Many => "many",
            Cardinality::Exec => "exec",
            Cardinality::ExecRows => "exec-rows",
        }
    }

    pub fn returns_rows(self) -> bool {
        matches!(self, Cardinality::One | Cardinality::Opt | Cardinality::Many)
    }
}

impl FromStr for Cardinality {
    type Err = ();

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Ok(match tag {
            "one" => Cardinality::One,
            "opt" => Cardinality::Opt,
            "many" => Cardinality::Many,
            "exec" => Cardinality::Exec,
            "exec-rows" => Cardinality::ExecRows,
            _ => return Err(()),
        })
    }
}

impl Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::One => write!(f, "exactly one row"),
            Cardinality::Opt => write!(f, "zero or one row"),
            Cardinality::Many => write!(f, "many rows"),
            Cardinality::Exec => write!(f, "no rows"),
            Cardinality::ExecRows => write!(f, "no rows, affected row count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandTag {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    /// Like `FirstName` in `pggen.arg('FirstName')`.
    pub name: String,
    /// Raw default literal, like `'joe'` in `pggen.arg('FirstName', 'joe')`.
    pub default: Option<String>,
}

/// One query as written in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateQuery {
    pub name: String,
    pub cardinality: Cardinality,
    pub command: CommandTag,
    /// Comment lines directly above the name directive.
    pub doc: Vec<String>,
    /// The statement with placeholders in source syntax.
    pub source_sql: String,
    /// The statement with placeholders rewritten to `$1`, `$2`, ...
    pub sql: String,
    /// Distinct parameters in first occurrence order. `params[i]` is `$(i + 1)`.
    pub params: Vec<QueryParam>,
    /// Line of the name directive.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFile {
    pub path: PathBuf,
    pub queries: Vec<TemplateQuery>,
}

pub fn parse_query_file(path: impl AsRef<Path>, contents: &str) -> Result<QueryFile, ParseError> {
    let path = path.as_ref();
    let error = |line: usize, kind: ParseErrorKind| ParseError {
        path: path.to_path_buf(),
        line,
        kind,
    };

    let bytes = contents.as_bytes();
    let mut queries: Vec<TemplateQuery> = vec![];
    let mut defined = HashMap::<String, usize>::new();
    let mut doc: Vec<String> = vec![];
    let mut idx = 0;

    while idx < bytes.len() {
        let line = line_of(contents, idx);
        let line_end = contents[idx..]
            .find('\n')
            .map_or(contents.len(), |offset| idx + offset);
        let text = contents[idx..line_end].trim();

        if text.is_empty() {
            doc.clear();
            idx = line_end + 1;
            continue;
        }
        if !text.starts_with("--") {
            return Err(error(line, ParseErrorKind::MissingDirective));
        }
        let is_directive = text
            .trim_start_matches('-')
            .trim_start()
            .starts_with("name:");
        if !is_directive {
            doc.push(text.trim_start_matches('-').trim().to_owned());
            idx = line_end + 1;
            continue;
        }

        let (name, cardinality) = parse_directive(text).map_err(|kind| error(line, kind))?;
        if let Some(&first_line) = defined.get(&name) {
            return Err(error(
                line,
                ParseErrorKind::DuplicateQuery {
                    query: name,
                    first_line,
                },
            ));
        }

        let body_start = (line_end + 1).min(contents.len());
        let terminator = find_terminator(contents, body_start, &name)
            .map_err(|kind| error(line, kind))?
            .ok_or_else(|| error(line, ParseErrorKind::Unterminated(name.clone())))?;
        let source_sql = contents[body_start..terminator].trim();
        if source_sql.is_empty() {
            return Err(error(line, ParseErrorKind::EmptyStatement(name)));
        }
        let (sql, params) = rewrite_placeholders(&name, source_sql).map_err(|kind| error(line, kind))?;
        let command = detect_command(&sql);

        defined.insert(name.clone(), line);
        queries.push(TemplateQuery {
            name,
            cardinality,
            command,
            doc: std::mem::take(&mut doc),
            source_sql: source_sql.to_owned(),
            sql,
            params,
            line,
        });
        let rest_end = contents[terminator..]
            .find('\n')
            .map_or(contents.len(), |offset| terminator + offset);
        let trailing = contents[terminator + 1..rest_end].trim();
        if !trailing.is_empty() && !trailing.starts_with("--") {
            return Err(error(
                line_of(contents, terminator),
                ParseErrorKind::MissingDirective,
            ));
        }
        idx = rest_end + 1;
    }

    Ok(QueryFile {
        path: path.to_path_buf(),
        queries,
    })
}

fn line_of(contents: &str, idx: usize) -> usize {
    1 + contents.as_bytes()[..idx]
        .iter()
        .filter(|&&byte| byte == b'\n')
        .count()
}

fn parse_directive(text: &str) -> Result<(String, Cardinality), ParseErrorKind> {
    let captures = NAME_DIRECTIVE
        .captures(text)
        .ok_or_else(|| ParseErrorKind::MalformedDirective(text.to_owned()))?;
    let name = &captures["name"];
    if !is_identifier(name) {
        return Err(ParseErrorKind::InvalidName(name.to_owned()));
    }
    let tag = &captures["tag"];
    let cardinality = tag.parse().map_err(|()| ParseErrorKind::UnknownTag {
        query: name.to_owned(),
        tag: tag.to_owned(),
    })?;
    Ok((name.to_owned(), cardinality))
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

/// If a string literal, quoted identifier, comment or dollar quoted body starts
/// at `idx`, returns the index just past its end.
fn skip_opaque(sql: &str, idx: usize, query: &str) -> Result<Option<usize>, ParseErrorKind> {
    let bytes = sql.as_bytes();
    let rest = &bytes[idx..];
    let unterminated = |what| ParseErrorKind::UnterminatedLiteral {
        query: query.to_owned(),
        what,
    };

    if rest.starts_with(b"--") {
        let end = rest.iter().position(|&byte| byte == b'\n');
        return Ok(Some(end.map_or(bytes.len(), |end| idx + end)));
    }
    if rest.starts_with(b"/*") {
        // Postgres block comments nest.
        let mut depth = 0;
        let mut pos = idx;
        while pos < bytes.len() {
            if bytes[pos..].starts_with(b"/*") {
                depth += 1;
                pos += 2;
            } else if bytes[pos..].starts_with(b"*/") {
                depth -= 1;
                pos += 2;
                if depth == 0 {
                    return Ok(Some(pos));
                }
            } else {
                pos += 1;
            }
        }
        return Err(unterminated("block comment"));
    }
    if let Some(&quote @ (b'\'' | b'"')) = rest.first() {
        let backslash_escapes = quote == b'\''
            && idx > 0
            && matches!(bytes[idx - 1], b'e' | b'E')
            && (idx < 2 || !is_ident_byte(bytes[idx - 2]));
        let mut pos = idx + 1;
        while pos < bytes.len() {
            match bytes[pos] {
                b'\\' if backslash_escapes => pos += 2,
                // Quotes are escaped by doubling up.
                byte if byte == quote && bytes.get(pos + 1) == Some(&quote) => pos += 2,
                byte if byte == quote => return Ok(Some(pos + 1)),
                _ => pos += 1,
            }
        }
        return Err(unterminated(match quote {
            b'\'' => "string literal",
            _ => "quoted identifier",
        }));
    }
    if rest.first() == Some(&b'$') && (idx == 0 || !is_ident_byte(bytes[idx - 1])) {
        let tag_len = rest[1..]
            .iter()
            .position(|&byte| !(byte.is_ascii_alphanumeric() || byte == b'_'));
        let Some(tag_len) = tag_len else {
            return Ok(None);
        };
        let tag = &rest[..tag_len + 2];
        let valid_tag = tag[tag_len + 1] == b'$' && !tag.get(1).is_some_and(u8::is_ascii_digit);
        if !valid_tag {
            return Ok(None);
        }
        let body = idx + tag.len();
        let close = bytes[body..]
            .windows(tag.len())
            .position(|window| window == tag)
            .ok_or_else(|| unterminated("dollar quoted string"))?;
        return Ok(Some(body + close + tag.len()));
    }
    Ok(None)
}

fn find_terminator(sql: &str, start: usize, query: &str) -> Result<Option<usize>, ParseErrorKind> {
    let bytes = sql.as_bytes();
    let mut idx = start;
    while idx < bytes.len() {
        if let Some(end) = skip_opaque(sql, idx, query)? {
            idx = end;
            continue;
        }
        if bytes[idx] == b';' {
            return Ok(Some(idx));
        }
        idx += 1;
    }
    Ok(None)
}

/// Rewrites every `pggen.arg('Name'[, default])` to its positional `$n` form.
/// The same name always maps to the same position.
fn rewrite_placeholders(
    query: &str,
    sql: &str,
) -> Result<(String, Vec<QueryParam>), ParseErrorKind> {
    let bytes = sql.as_bytes();
    let mut params: Vec<QueryParam> = vec![];
    let mut postgres_query = String::with_capacity(sql.len());
    let mut head = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        if let Some(end) = skip_opaque(sql, idx, query)? {
            idx = end;
            continue;
        }
        let at_word_start = idx == 0 || !(is_ident_byte(bytes[idx - 1]) || bytes[idx - 1] == b'.');
        if bytes[idx] == b'$' && at_word_start && bytes.get(idx + 1).is_some_and(u8::is_ascii_digit) {
            let digits = bytes[idx + 1..]
                .iter()
                .take_while(|byte| byte.is_ascii_digit())
                .count();
            return Err(ParseErrorKind::PositionalParameter {
                query: query.to_owned(),
                placeholder: sql[idx..idx + 1 + digits].to_owned(),
            });
        }
        let is_arg = at_word_start
            && bytes.len() - idx >= ARG_FUNCTION.len()
            && bytes[idx..idx + ARG_FUNCTION.len()].eq_ignore_ascii_case(ARG_FUNCTION);
        if !is_arg {
            idx += 1;
            continue;
        }
        let after_name = idx + ARG_FUNCTION.len();
        if bytes.get(after_name).is_some_and(|&byte| is_ident_byte(byte)) {
            idx += 1;
            continue;
        }

        let (param, end) = parse_arg(query, sql, after_name)?;
        let position = match params.iter().position(|existing| existing.name == param.name) {
            Some(position) => {
                let existing = &mut params[position];
                if let Some(second) = param.default {
                    if existing.default.as_ref().is_some_and(|first| *first != second) {
                        return Err(ParseErrorKind::ConflictingDefault {
                            query: query.to_owned(),
                            param: param.name,
                        });
                    }
                    existing.default.get_or_insert(second);
                }
                position
            }
            None => {
                params.push(param);
                params.len() - 1
            }
        };
        postgres_query.push_str(&sql[head..idx]);
        postgres_query.push_str(&format!("${}", position + 1));
        head = end;
        idx = end;
    }
    postgres_query.push_str(&sql[head..]);
    Ok((postgres_query, params))
}

/// Parses `('Name'[, default])` starting at `idx`, returning the param and the
/// index just past the closing parenthesis.
fn parse_arg(query: &str, sql: &str, mut idx: usize) -> Result<(QueryParam, usize), ParseErrorKind> {
    let bytes = sql.as_bytes();
    let malformed = |reason: &str| ParseErrorKind::MalformedPlaceholder {
        query: query.to_owned(),
        reason: reason.to_owned(),
    };
    let skip_whitespace = |mut idx: usize| {
        while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
            idx += 1;
        }
        idx
    };

    idx = skip_whitespace(idx);
    if bytes.get(idx) != Some(&b'(') {
        return Err(malformed("expected `(`"));
    }
    idx = skip_whitespace(idx + 1);
    if bytes.get(idx) != Some(&b'\'') {
        return Err(malformed("expected the parameter name as a string literal"));
    }
    let name_end = skip_opaque(sql, idx, query)?.ok_or_else(|| malformed("expected a name"))?;
    let name = sql[idx + 1..name_end - 1].replace("''", "'");
    if !is_identifier(&name) {
        return Err(malformed(&format!("`{name}` is not a valid parameter name")));
    }
    idx = skip_whitespace(name_end);

    let mut default = None;
    if bytes.get(idx) == Some(&b',') {
        let start = idx + 1;
        let mut depth = 0usize;
        idx = start;
        loop {
            if idx >= bytes.len() {
                return Err(malformed("expected `)`"));
            }
            if let Some(end) = skip_opaque(sql, idx, query)? {
                idx = end;
                continue;
            }
            match bytes[idx] {
                b'(' => depth += 1,
                b')' if depth == 0 => break,
                b')' => depth -= 1,
                _ => {}
            }
            idx += 1;
        }
        let literal = sql[start..idx].trim();
        if literal.is_empty() {
            return Err(malformed("empty default value"));
        }
        default = Some(literal.to_owned());
    }
    if bytes.get(idx) != Some(&b')') {
        return Err(malformed("expected `)`"));
    }
    Ok((QueryParam { name, default }, idx + 1))
}

fn detect_command(sql: &str) -> CommandTag {
    if let Ok(statements) = Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        if let Some(statement) = statements.first() {
            return match statement {
                Statement::Query(query) => match &*query.body {
                    SetExpr::Insert(_) => CommandTag::Insert,
                    SetExpr::Update(_) => CommandTag::Update,
                    _ => CommandTag::Select,
                },
                Statement::Insert(_) => CommandTag::Insert,
                Statement::Delete(_) => CommandTag::Delete,
                other if other.to_string().starts_with("UPDATE") => CommandTag::Update,
                _ => CommandTag::Other,
            };
        }
    }
    let keyword = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match keyword.as_str() {
        "select" | "values" | "table" | "with" => CommandTag::Select,
        "insert" => CommandTag::Insert,
        "update" => CommandTag::Update,
        "delete" => CommandTag::Delete,
        _ => CommandTag::Other,
    }
}
