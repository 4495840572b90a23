use std::sync::Arc;

use atelier_common::Result;
use atelier_config::AppConfig;
use atelier_db::Database;

use crate::rate_limit::ApiRateLimiter;

/// Shared application state accessible from all request handlers.
pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub rate_limiter: ApiRateLimiter,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database) -> Result<Self> {
        let rate_limiter = ApiRateLimiter::new(&config.security.rate_limit)?;
        Ok(Self {
            config,
            db: Arc::new(db),
            rate_limiter,
        })
    }
}

pub type SharedState = Arc<AppState>;
