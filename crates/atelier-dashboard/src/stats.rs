use std::time::Duration;

use async_trait::async_trait;
use atelier_common::{AdminStats, Error, Result};
use atelier_config::DashboardConfig;
use tracing::debug;

const STATS_PATH: &str = "/api/admin/stats";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of aggregate counts for the admin dashboard.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_stats(&self) -> Result<AdminStats>;
}

/// Reads stats from the gateway's REST endpoint.
pub struct HttpStatsSource {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpStatsSource {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}{STATS_PATH}", base_url.trim_end_matches('/')),
            token,
        })
    }

    pub fn from_config(config: &DashboardConfig) -> Result<Self> {
        Self::new(&config.api_base_url, config.api_token.clone())
    }
}

#[async_trait]
impl StatsSource for HttpStatsSource {
    async fn fetch_stats(&self) -> Result<AdminStats> {
        debug!("fetching admin stats from {}", self.url);
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("stats request failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Http(format!("stats endpoint returned error: {e}")))?;

        response
            .json::<AdminStats>()
            .await
            .map_err(|e| Error::Http(format!("invalid stats payload: {e}")))
    }
}
