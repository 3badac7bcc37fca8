use std::error::Error;

use crate::config::{CONFIG_FILE, CodeGenSource, CodeGenerator, TomlConfig};

#[derive(clap::Args, Debug, Clone)]
#[command(about = "Write a starter pg-typegen.toml", long_about = None, name = "init")]
pub struct Initialize {}

fn starter_config() -> TomlConfig {
    TomlConfig {
        queries: CodeGenSource::Single("<path/to/query/directory>".into()),
        output_dir: "<path/to/output/directory>".into(),
        package: None,
        mode: CodeGenerator::Rust,
        timeout_secs: Some(30),
    }
}

impl Initialize {
    pub fn init(self) -> Result<(), Box<dyn Error>> {
        let exists = std::fs::exists(CONFIG_FILE)?;
        if exists {
            eprintln!("{CONFIG_FILE} already exists.\nExiting...");
            return Ok(());
        }

        let toml = toml::to_string_pretty(&starter_config())?;
        std::fs::write(CONFIG_FILE, toml)?;
        eprintln!("Written config to {CONFIG_FILE}!");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::starter_config;
    use crate::config::{CodeGenerator, TomlConfig, TypegenConfig};

    #[test]
    fn starter_config_round_trips() {
        let toml = toml::to_string_pretty(&starter_config()).unwrap();
        assert!(toml.contains("output-dir = "));
        assert!(toml.contains("timeout-secs = 30"));
        let parsed: TomlConfig = toml::from_str(&toml).unwrap();
        let config = TypegenConfig::from_toml_config(parsed, Path::new("")).unwrap();
        assert_eq!(config.mode, CodeGenerator::Rust);
    }
}
