use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate counts served by `GET /api/admin/stats` and cached by the
/// admin dashboard. This is the only accepted shape for that endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_users: i64,
    #[serde(default)]
    pub users_by_role: BTreeMap<String, i64>,
    pub total_applications: i64,
    #[serde(default)]
    pub applications_by_status: BTreeMap<String, i64>,
    pub total_products: i64,
    pub active_products: i64,
    pub total_reviews: i64,
    pub pending_reviews: i64,
    pub generated_at: DateTime<Utc>,
}

impl AdminStats {
    /// Applications still waiting for an operator or a worker offer.
    pub fn open_applications(&self) -> i64 {
        ["new", "in_review"]
            .iter()
            .filter_map(|status| self.applications_by_status.get(*status))
            .sum()
    }
}
