use std::sync::{Arc, RwLock};
use std::time::Duration;

use atelier_common::{AdminStats, Error, Result};
use atelier_config::DashboardConfig;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::notifications::NotificationStore;
use crate::stats::{HttpStatsSource, StatsSource};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Top-level dashboard state owned by the application and handed to views.
pub struct AdminDashboard {
    notifications: NotificationStore,
    source: Arc<dyn StatsSource>,
    stats: RwLock<Option<AdminStats>>,
    poll_interval: Duration,
}

impl AdminDashboard {
    pub fn new(notifications: NotificationStore, source: Arc<dyn StatsSource>) -> Self {
        Self {
            notifications,
            source,
            stats: RwLock::new(None),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Wire the store, the HTTP stats source and the poll interval from
    /// config.
    pub fn from_config(config: &DashboardConfig) -> Result<Self> {
        if config.stats_poll_interval_secs == 0 {
            return Err(Error::Config(
                "dashboard.stats_poll_interval_secs must be at least 1".into(),
            ));
        }
        let source = HttpStatsSource::from_config(config)?;
        Ok(Self::new(NotificationStore::from_config(config), Arc::new(source))
            .with_poll_interval(Duration::from_secs(config.stats_poll_interval_secs)))
    }

    /// Override the poller period. Zero is raised to one millisecond.
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every.max(Duration::from_millis(1));
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    /// Last successfully fetched stats, possibly stale.
    pub fn stats(&self) -> Option<AdminStats> {
        self.stats.read().ok().and_then(|s| s.clone())
    }

    /// Replace the cached stats with a fresh fetch. On failure the error is
    /// logged and returned, and the previous stats stay cached. No
    /// notification is raised for a failed refresh. A fetch generated before
    /// the cached snapshot is discarded, so overlapping refreshes never roll
    /// the cache back.
    pub async fn refresh_stats(&self) -> Result<()> {
        let fresh = match self.source.fetch_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("stats refresh failed, keeping cached stats: {e}");
                return Err(e);
            }
        };
        debug!(
            "stats refreshed: users={}, open applications={}",
            fresh.total_users,
            fresh.open_applications()
        );

        let mut cached = self
            .stats
            .write()
            .map_err(|_| Error::Other("stats cache lock poisoned".into()))?;
        if let Some(current) = cached.as_ref()
            && current.generated_at > fresh.generated_at
        {
            debug!(
                "discarding stats generated at {}, cache holds {}",
                fresh.generated_at, current.generated_at
            );
            return Ok(());
        }
        *cached = Some(fresh);
        Ok(())
    }

    /// Refresh every [`poll_interval`](Self::poll_interval), starting
    /// immediately, until the handle is aborted.
    pub fn spawn_stats_poller(self: &Arc<Self>) -> JoinHandle<()> {
        let dashboard = Arc::clone(self);
        let every = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Failures are logged by refresh_stats.
                let _ = dashboard.refresh_stats().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<AdminStats>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<AdminStats>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StatsSource for ScriptedSource {
        async fn fetch_stats(&self) -> Result<AdminStats> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(stats(0)))
        }
    }

    fn stats(users: i64) -> AdminStats {
        stats_at(users, Utc::now())
    }

    fn stats_at(users: i64, generated_at: DateTime<Utc>) -> AdminStats {
        AdminStats {
            total_users: users,
            users_by_role: BTreeMap::new(),
            total_applications: 0,
            applications_by_status: BTreeMap::new(),
            total_products: 0,
            active_products: 0,
            total_reviews: 0,
            pending_reviews: 0,
            generated_at,
        }
    }

    fn dashboard(source: Arc<ScriptedSource>) -> AdminDashboard {
        AdminDashboard::new(
            NotificationStore::new(Duration::from_secs(5), 10),
            source,
        )
    }

    #[tokio::test]
    async fn refresh_replaces_cached_stats() {
        let dash = dashboard(ScriptedSource::new(vec![Ok(stats(3)), Ok(stats(7))]));
        assert!(dash.stats().is_none());

        dash.refresh_stats().await.unwrap();
        assert_eq!(dash.stats().unwrap().total_users, 3);

        dash.refresh_stats().await.unwrap();
        assert_eq!(dash.stats().unwrap().total_users, 7);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_stats_and_stays_quiet() {
        let dash = dashboard(ScriptedSource::new(vec![
            Ok(stats(5)),
            Err(Error::Http("connection refused".into())),
        ]));

        dash.refresh_stats().await.unwrap();
        assert!(dash.refresh_stats().await.is_err());

        assert_eq!(dash.stats().unwrap().total_users, 5);
        assert!(dash.notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_refreshes_on_interval() {
        let source = ScriptedSource::new(Vec::new());
        let dash = Arc::new(
            dashboard(Arc::clone(&source)).with_poll_interval(Duration::from_secs(30)),
        );

        let handle = dash.spawn_stats_poller();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(dash.stats().is_some());

        handle.abort();
    }

    /// Answers the first call slowly with an older snapshot.
    struct SlowFirstSource {
        calls: AtomicUsize,
        base: DateTime<Utc>,
    }

    #[async_trait]
    impl StatsSource for SlowFirstSource {
        async fn fetch_stats(&self) -> Result<AdminStats> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(stats_at(1, self.base))
            } else {
                Ok(stats_at(2, self.base + chrono::Duration::seconds(1)))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_older_fetch_does_not_overwrite_newer_stats() {
        let dash = AdminDashboard::new(
            NotificationStore::new(Duration::from_secs(5), 10),
            Arc::new(SlowFirstSource {
                calls: AtomicUsize::new(0),
                base: Utc::now(),
            }),
        );

        let (slow, fast) = tokio::join!(dash.refresh_stats(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            dash.refresh_stats().await
        });
        slow.unwrap();
        fast.unwrap();

        assert_eq!(dash.stats().unwrap().total_users, 2);
    }

    #[test]
    fn from_config_uses_configured_poll_interval() {
        let config = DashboardConfig {
            stats_poll_interval_secs: 7,
            ..DashboardConfig::default()
        };
        let dash = AdminDashboard::from_config(&config).unwrap();
        assert_eq!(dash.poll_interval(), Duration::from_secs(7));
        assert!(dash.stats().is_none());
    }

    #[test]
    fn from_config_rejects_zero_poll_interval() {
        let config = DashboardConfig {
            stats_poll_interval_secs: 0,
            ..DashboardConfig::default()
        };
        assert!(matches!(
            AdminDashboard::from_config(&config),
            Err(Error::Config(_))
        ));
    }
}
