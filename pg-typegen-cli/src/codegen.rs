pub mod json;
pub mod rust;

use std::{
    error::Error,
    path::{Path, PathBuf},
};

use pg_typegen_core::{DeclarationNode, TypedFile};
use tracing::info;

/// One rendered output, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
}

pub trait CodeGen {
    fn push(&mut self, file: &TypedFile) -> Result<(), Box<dyn Error>>;

    fn finalize(&self, declarations: &[DeclarationNode]) -> Result<Vec<GeneratedFile>, Box<dyn Error>>;
}

/// Writes every rendered file. Callers render everything before calling this.
pub fn write_all(output_dir: &Path, files: &[GeneratedFile]) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(output_dir)?;
    for file in files {
        let path = output_dir.join(&file.path);
        std::fs::write(&path, &file.contents)?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}
