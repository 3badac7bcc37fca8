use std::{
    env,
    error::Error,
    fmt::Display,
    path::{Path, PathBuf},
    time::Duration,
};

use dotenvy::dotenv;
use pg_typegen_core::{package_name, run::DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "pg-typegen.toml";
const DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Clone)]
pub enum ConfigError {
    DbUrlNotFound,
    NoQueryFiles { sources: Vec<PathBuf> },
    ZeroTimeout,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::DbUrlNotFound => write!(
                f,
                "Database URL not found, please set the {DATABASE_URL} environment variable."
            ),
            ConfigError::NoQueryFiles { sources } => {
                write!(f, "No .sql files found in ")?;
                let sources: Vec<_> = sources
                    .iter()
                    .map(|source| source.display().to_string())
                    .collect();
                write!(f, "{}", sources.join(", "))
            }
            ConfigError::ZeroTimeout => write!(f, "timeout-secs must be greater than zero"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CodeGenerator {
    #[default]
    Json,
    Rust,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeGenSource {
    Single(PathBuf),
    List(Vec<PathBuf>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[must_use]
pub struct TomlConfig {
    pub queries: CodeGenSource,
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default)]
    pub mode: CodeGenerator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TypegenConfig {
    pub sources: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub package: String,
    pub mode: CodeGenerator,
    pub timeout: Duration,
}

pub fn db_url() -> Result<String, Box<dyn Error>> {
    // A missing .env file is fine, the variable may come from the environment.
    dotenv().ok();
    Ok(env::var(DATABASE_URL).map_err(|_| ConfigError::DbUrlNotFound)?)
}

impl TypegenConfig {
    /// Relative paths in the config are taken relative to the config file.
    pub fn from_toml_config(config: TomlConfig, base_dir: &Path) -> Result<Self, Box<dyn Error>> {
        let sources = match config.queries {
            CodeGenSource::Single(item) => vec![item],
            CodeGenSource::List(items) => items,
        };
        let timeout = match config.timeout_secs {
            Some(0) => Err(ConfigError::ZeroTimeout)?,
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };
        let output_dir = base_dir.join(config.output_dir);
        Ok(Self {
            sources: sources.into_iter().map(|source| base_dir.join(source)).collect(),
            package: package_name(config.package.as_deref(), &output_dir),
            output_dir,
            mode: config.mode,
            timeout,
        })
    }

    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let config: TomlConfig = toml::from_slice(&std::fs::read(path)?)?;
        let base_dir = path.parent().unwrap_or(Path::new(""));
        Self::from_toml_config(config, base_dir)
    }

    /// Every query file named by the config. Directories contribute their
    /// `*.sql` files in sorted order.
    pub fn query_files(&self) -> Result<Vec<PathBuf>, Box<dyn Error>> {
        let mut files = vec![];
        for source in &self.sources {
            if !source.is_dir() {
                files.push(source.clone());
                continue;
            }
            let mut found = vec![];
            for entry in std::fs::read_dir(source)? {
                let entry = entry?;
                let path = entry.path();
                if entry.metadata()?.is_file()
                    && path.extension().is_some_and(|extension| extension == "sql")
                {
                    found.push(path);
                }
            }
            found.sort();
            files.extend(found);
        }
        if files.is_empty() {
            return Err(ConfigError::NoQueryFiles {
                sources: self.sources.clone(),
            }
            .into());
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use super::{CodeGenSource, CodeGenerator, TomlConfig, TypegenConfig};

    fn parse(toml: &str) -> TomlConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(
            r#"
queries = "queries"
output-dir = "src/author_db"
"#,
        );
        assert_eq!(config.queries, CodeGenSource::Single("queries".into()));
        let config = TypegenConfig::from_toml_config(config, Path::new("project")).unwrap();
        assert_eq!(config.sources, [Path::new("project/queries")]);
        assert_eq!(config.output_dir, Path::new("project/src/author_db"));
        assert_eq!(config.package, "author_db");
        assert_eq!(config.mode, CodeGenerator::Json);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn full_config() {
        let config = parse(
            r#"
queries = ["a.sql", "more"]
output-dir = "out"
package = "db"
mode = "rust"
timeout-secs = 5
"#,
        );
        let config = TypegenConfig::from_toml_config(config, Path::new("")).unwrap();
        assert_eq!(config.sources, [Path::new("a.sql"), Path::new("more")]);
        assert_eq!(config.package, "db");
        assert_eq!(config.mode, CodeGenerator::Rust);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = parse("queries = \"q\"\noutput-dir = \"out\"\ntimeout-secs = 0\n");
        let err = TypegenConfig::from_toml_config(config, Path::new("")).unwrap_err();
        assert_eq!(err.to_string(), "timeout-secs must be greater than zero");
    }

    #[test]
    fn directories_contribute_sorted_sql_files() {
        let dir = std::env::temp_dir().join(format!("pg-typegen-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.sql", "a.sql", "notes.txt"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        let config = TypegenConfig {
            sources: vec![dir.clone()],
            output_dir: dir.join("out"),
            package: "out".into(),
            mode: CodeGenerator::Json,
            timeout: Duration::from_secs(1),
        };
        let files = config.query_files().unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(files, [dir.join("a.sql"), dir.join("b.sql")]);
    }
}
