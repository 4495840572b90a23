use std::path::PathBuf;
use std::time::Duration;

use atelier_common::{Environment, Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_JWT_SECRET: &str = "change-me";

/// Root configuration, built once at startup and handed to every subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub data_dir: Option<PathBuf>,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub security: SecurityConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit store location. When unset the environment default is used.
    pub path: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    /// Tables the health check expects to find.
    pub expected_tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Signing secret handed to the token layer. Only validated here.
    pub jwt_secret: String,
    pub cors_origins: Vec<String>,
    /// Per-client request budget for the API.
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub stats_poll_interval_secs: u64,
    pub notification_ttl_ms: u64,
    pub notification_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            backup_dir: None,
            busy_timeout_ms: 5_000,
            expected_tables: ["users", "products", "applications", "reviews"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_requests: 100,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3001".to_string(),
            api_token: None,
            stats_poll_interval_secs: 30,
            notification_ttl_ms: 5_000,
            notification_capacity: 10,
        }
    }
}

impl AppConfig {
    /// Directory holding the store and its backups.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Resolve the store path: explicit setting first, otherwise a
    /// per-environment file under the data directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return path.clone();
        }
        let file = match self.environment {
            Environment::Development => "atelier.dev.sqlite",
            Environment::Test => "atelier.test.sqlite",
            Environment::Production => "atelier.sqlite",
        };
        self.data_dir().join(file)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.database
            .backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("backups"))
    }

    pub fn validate(&self) -> Result<()> {
        self.security.validate(self.environment)?;
        if self.dashboard.notification_capacity == 0 {
            return Err(Error::Config(
                "dashboard.notification_capacity must be at least 1".into(),
            ));
        }
        if self.dashboard.stats_poll_interval_secs == 0 {
            return Err(Error::Config(
                "dashboard.stats_poll_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Time for one request to be refilled. Zero when the window is empty or
    /// too short to spread `max_requests` over whole nanoseconds.
    pub fn refill_period(&self) -> Duration {
        match self.max_requests {
            0 => Duration::ZERO,
            max => self.window() / max,
        }
    }
}

impl SecurityConfig {
    pub fn validate(&self, environment: Environment) -> Result<()> {
        if self.rate_limit.window_secs == 0 || self.rate_limit.max_requests == 0 {
            return Err(Error::Config(
                "security.rate_limit needs a non-zero window and request budget".into(),
            ));
        }
        if self.rate_limit.refill_period().is_zero() {
            return Err(Error::Config(format!(
                "security.rate_limit window of {}s is too short for {} requests",
                self.rate_limit.window_secs, self.rate_limit.max_requests
            )));
        }
        if environment.is_production() && self.jwt_secret == DEFAULT_JWT_SECRET {
            return Err(Error::Config(
                "security.jwt_secret must be set in production".into(),
            ));
        }
        Ok(())
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
