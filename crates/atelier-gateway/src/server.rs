use std::net::SocketAddr;
use std::sync::Arc;

use atelier_common::{Error, Result};
use atelier_config::AppConfig;
use atelier_db::{Database, MIGRATIONS, Migration};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::router::build_router;
use crate::state::{AppState, SharedState};

/// The HTTP gateway. Brings the store up to date before accepting
/// connections.
pub struct GatewayServer {
    config: AppConfig,
    migrations: &'static [Migration],
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            migrations: MIGRATIONS,
        }
    }

    /// Replace the migration set applied at startup.
    pub fn with_migrations(mut self, migrations: &'static [Migration]) -> Self {
        self.migrations = migrations;
        self
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.config.gateway.bind_addr();

        // Startup barrier: a migration failure aborts before binding.
        let db = self.prepare_database()?;

        let state = Arc::new(AppState::new(self.config, db)?);
        let app = build_router(Arc::clone(&state));

        let listener = TcpListener::bind(&addr).await?;
        info!("Atelier gateway listening on {}", addr);

        let pruner = spawn_rate_limit_pruner(state);
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
        pruner.abort();
        served.map_err(|e| Error::Gateway(format!("server error: {e}")))
    }

    fn prepare_database(&self) -> Result<Database> {
        let db = Database::open(&self.config)?;
        let report = db.migrate_with(self.migrations)?;
        if report.count() > 0 {
            info!("startup applied {} migration(s)", report.count());
        }
        Ok(db)
    }
}

/// Periodically drop rate-limiter state for clients idle over a full window.
fn spawn_rate_limit_pruner(state: SharedState) -> JoinHandle<()> {
    let every = state.rate_limiter.window();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.rate_limiter.prune();
        }
    })
}
