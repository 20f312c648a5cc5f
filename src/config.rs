//! Configuration loader.
//!
//! Layers (highest precedence last):
//!   1) Built-in defaults (`Config::default()`)
//!   2) Config file (explicit path or auto-discovered)
//!   3) Environment variables, optionally via `.env`
//!
//! Environment prefix is `AETHERNOVA_STAKING`, nesting separator `__`:
//!   AETHERNOVA_STAKING__STAKING__UNBONDING_PERIOD=100800
//!   AETHERNOVA_STAKING__TELEMETRY__JSON=false

use std::path::{Path, PathBuf};

use ::config as cfg;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::staking::StakingParams;
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "AETHERNOVA_STAKING";
const FILE_NAMES: [&str; 4] = ["config.yaml", "config.yml", "config.toml", "config.json"];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub staking: StakingParams,
    pub telemetry: Telemetry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    pub name: String,
    /// "prod" | "staging" | "dev"
    pub environment: String,
}

impl Default for App {
    fn default() -> Self {
        Self { name: "aethernova-staking".into(), environment: "prod".into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// RUST_LOG-like directive.
    pub log_filter: String,
    pub json: bool,
    pub ansi: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self { log_filter: "info,aethernova_staking=info".into(), json: true, ansi: false }
    }
}

impl Telemetry {
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            env_filter: Some(self.log_filter.clone()),
            json: self.json,
            ansi: self.ansi,
            ..LoggingConfig::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] cfg::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("path not found `{0}`")]
    PathNotFound(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load configuration: defaults → file → environment, then validate.
pub fn load(explicit_file: Option<&Path>) -> Result<Config, ConfigError> {
    // no-op without a .env file
    let _ = dotenvy::dotenv();

    let mut builder = cfg::Config::builder().add_source(cfg::Config::try_from(&Config::default())?);
    for path in discover_config_files(explicit_file)? {
        builder = builder.add_source(cfg::File::from(path));
    }
    builder = builder.add_source(
        cfg::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let mut config: Config = builder.build()?.try_deserialize()?;
    validate_and_normalize(&mut config)?;
    Ok(config)
}

/// Explicit path if given, otherwise every existing
/// `<config dir>/aethernova-staking/config.*` and `./config.*`.
fn discover_config_files(explicit: Option<&Path>) -> Result<Vec<PathBuf>, ConfigError> {
    if let Some(p) = explicit {
        if !p.exists() {
            return Err(ConfigError::PathNotFound(p.display().to_string()));
        }
        return Ok(vec![p.to_path_buf()]);
    }

    let mut candidates = Vec::new();
    if let Some(dirs) = ProjectDirs::from("io", "Aethernova", "aethernova-staking") {
        candidates.extend(FILE_NAMES.iter().map(|f| dirs.config_dir().join(f)));
    }
    candidates.extend(FILE_NAMES.iter().map(PathBuf::from));
    Ok(candidates.into_iter().filter(|c| c.exists()).collect())
}

fn validate_and_normalize(config: &mut Config) -> Result<(), ConfigError> {
    config.app.environment = config.app.environment.trim().to_lowercase();
    if !matches!(config.app.environment.as_str(), "prod" | "staging" | "dev") {
        return Err(ConfigError::Invalid(format!("unknown environment `{}`", config.app.environment)));
    }
    config
        .staking
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}
