use std::path::{Path, PathBuf};

use atelier_common::{Environment, Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const ENV_ENVIRONMENT: &str = "ATELIER_ENV";
pub const ENV_DB_PATH: &str = "ATELIER_DB_PATH";
pub const ENV_HOST: &str = "ATELIER_HOST";
pub const ENV_PORT: &str = "ATELIER_PORT";
pub const ENV_JWT_SECRET: &str = "ATELIER_JWT_SECRET";

/// Builds an `AppConfig` from an optional file plus environment overrides.
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Load `.env`, the config file (if present) and process environment
    /// overrides, then validate the result.
    pub fn load(&self) -> Result<AppConfig> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("loaded environment from {}", path.display());
        }
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`ConfigLoader::load`] with an injectable variable lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.path {
            Some(path) if path.exists() => {
                info!("loading config from {}", path.display());
                parse_config_file(path)?
            }
            Some(path) => {
                info!("config file {} not found, using defaults", path.display());
                AppConfig::default()
            }
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config, lookup)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_config_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
        "toml" => {
            toml::from_str(&contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
        }
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup(ENV_ENVIRONMENT) {
        config.environment = env.parse::<Environment>()?;
    }
    if let Some(path) = lookup(ENV_DB_PATH) {
        config.database.path = Some(PathBuf::from(path));
    }
    if let Some(host) = lookup(ENV_HOST) {
        config.gateway.host = host;
    }
    if let Some(port) = lookup(ENV_PORT) {
        config.gateway.port = port
            .parse()
            .map_err(|e| Error::Config(format!("invalid {ENV_PORT} '{port}': {e}")))?;
    }
    if let Some(secret) = lookup(ENV_JWT_SECRET) {
        config.security.jwt_secret = secret;
    }
    Ok(())
}
