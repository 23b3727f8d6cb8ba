//! Node settings layered from built-in defaults, an optional file and the environment.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

const DEFAULTS: &str = include_str!("../config.default.toml");

/// Node configuration (from TOML and `LEDGER_*` environment variables).
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub snapshot_path: PathBuf,
    pub difficulty: u32,
    pub listen_addr: String,
}

impl LedgerConfig {
    /// Layer the built-in defaults, an optional TOML file, then the environment.
    pub fn try_load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Toml));
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder
            .add_source(Environment::with_prefix("LEDGER").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data/chain.json"),
            difficulty: 2,
            listen_addr: "127.0.0.1:3000".to_string(),
        }
    }
}
