use std::{error::Error, path::PathBuf};

use clap::Parser;
use pg_typegen_core::{PgCatalog, QueryFile, RunOptions, RunOutput, generate, parse_query_file};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::{
    codegen::{CodeGen, GeneratedFile, json::JsonCodeGen, rust::RustCodeGen, write_all},
    config::{CONFIG_FILE, CodeGenerator, TypegenConfig, db_url},
};

#[derive(Parser, Debug, Clone)]
#[command(about = "Generate typed query code from SQL files")]
#[must_use]
pub struct Generate {
    /// Path to the config file, `pg-typegen.toml` by default.
    config: Option<PathBuf>,
    #[arg(long, help = "Show debug information")]
    debug: bool,
}

fn read_queries(config: &TypegenConfig) -> Result<Vec<QueryFile>, Box<dyn Error>> {
    let mut files = vec![];
    for path in config.query_files()? {
        let contents = std::fs::read_to_string(&path)?;
        let file = parse_query_file(&path, &contents)?;
        info!("Parsed {} queries from {}", file.queries.len(), path.display());
        files.push(file);
    }
    Ok(files)
}

/// Renders every output in memory so nothing is written if any file fails.
pub fn render(
    mode: CodeGenerator,
    package: &str,
    output: &RunOutput,
) -> Result<Vec<GeneratedFile>, Box<dyn Error>> {
    let mut codegen: Box<dyn CodeGen> = match mode {
        CodeGenerator::Json => Box::new(JsonCodeGen::new(package)),
        CodeGenerator::Rust => Box::new(RustCodeGen::new()),
    };
    for file in &output.files {
        codegen.push(file)?;
    }
    codegen.finalize(&output.declarations)
}

impl Generate {
    pub fn run(self) -> Result<(), Box<dyn Error>> {
        match self.debug {
            true => super::init_debug()?,
            false => super::init_standard()?,
        }
        let config = match self.config {
            Some(config) => config,
            None => PathBuf::from(CONFIG_FILE),
        };
        let config = TypegenConfig::load(&config)?;
        let files = read_queries(&config)?;

        let rt = tokio::runtime::Runtime::new()?;
        let pool = rt.block_on(
            PgPoolOptions::new()
                .max_connections(1)
                .connect(&db_url()?),
        )?;
        let catalog = PgCatalog::new(pool);
        let options = RunOptions {
            timeout: config.timeout,
            package: config.package.clone(),
        };
        let output = rt.block_on(generate(&catalog, &files, options));
        rt.block_on(catalog.close());
        let output = output?;

        let generated = render(config.mode, &config.package, &output)?;
        write_all(&config.output_dir, &generated)?;
        info!(
            "Generated {} files for package {} in {}",
            generated.len(),
            config.package,
            config.output_dir.display()
        );
        Ok(())
    }
}
