use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use atelier_common::{AdminStats, Environment, Error, Result};
use atelier_config::AppConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::migrations::{Migration, MigrationReport, MigrationRunner, MigrationStatus};
use crate::schema::MIGRATIONS;

/// Maintenance steps run by [`Database::optimize`], in order.
const OPTIMIZE_STEPS: &[(&str, &str)] = &[
    ("vacuum", "VACUUM"),
    ("analyze", "ANALYZE"),
    ("reindex", "REINDEX"),
];

/// Handle to the workshop store plus its lifecycle helpers.
pub struct Database {
    conn: Mutex<Connection>,
    /// Backing file, `None` for in-memory stores.
    path: Option<PathBuf>,
    environment: Environment,
    backup_dir: PathBuf,
    expected_tables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCheck {
    pub all_present: bool,
    pub found: Vec<String>,
    pub missing: Vec<String>,
}

/// Liveness result. `status` reflects connectivity only; schema gaps are
/// reported through `tables` without flipping the status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub tables: Option<TableCheck>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMethod {
    Snapshot,
    FileCopy,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub path: PathBuf,
    pub method: BackupMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub completed: Vec<String>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
}

impl Database {
    /// Open the store at the configured path, creating its directory if
    /// needed.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let db_path = config.database_path();
        info!(
            "opening {} store at {}",
            config.environment,
            db_path.display()
        );
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        Self::with_connection(conn, Some(db_path), config)
    }

    pub fn in_memory(config: &AppConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::with_connection(conn, None, config)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>, config: &AppConfig) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        conn.busy_timeout(config.database.busy_timeout())
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            environment: config.environment,
            backup_dir: config.backup_dir(),
            expected_tables: config.database.expected_tables.clone(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }

    /// Apply the shipped schema migrations.
    pub fn migrate(&self) -> Result<MigrationReport> {
        self.migrate_with(MIGRATIONS)
    }

    pub fn migrate_with(&self, migrations: &[Migration]) -> Result<MigrationReport> {
        let runner = MigrationRunner::new(migrations)?;
        let mut conn = self.connection()?;
        runner.run(&mut conn)
    }

    pub fn migration_status(&self) -> Result<Vec<MigrationStatus>> {
        let runner = MigrationRunner::new(MIGRATIONS)?;
        let conn = self.connection()?;
        runner.status(&conn)
    }

    /// Round-trip a trivial query and look for the expected tables. Errors
    /// are captured into the report.
    pub fn health_check(&self) -> HealthReport {
        let timestamp = Utc::now();
        match self.check_tables() {
            Ok(tables) => {
                if !tables.all_present {
                    warn!("health check: missing tables {:?}", tables.missing);
                }
                HealthReport {
                    status: HealthStatus::Healthy,
                    timestamp,
                    tables: Some(tables),
                    error: None,
                }
            }
            Err(e) => {
                error!("health check failed: {e}");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    timestamp,
                    tables: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn check_tables(&self) -> Result<TableCheck> {
        let conn = self.connection()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::Database(format!("connectivity check failed: {e}")))?;

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let existing = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to list tables: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read table row: {e}")))?;

        let (found, missing): (Vec<String>, Vec<String>) = self
            .expected_tables
            .iter()
            .cloned()
            .partition(|name| existing.contains(name));

        Ok(TableCheck {
            all_present: missing.is_empty(),
            found,
            missing,
        })
    }

    /// Back up into the backup directory as
    /// `backup-<environment>-<timestamp>.sqlite`.
    pub fn backup(&self) -> Result<BackupOutcome> {
        let name = backup_file_name(self.environment, Utc::now());
        self.backup_to(&self.backup_dir.join(name))
    }

    /// Snapshot with `VACUUM INTO`, falling back to a raw copy of the
    /// backing file. Only a failed fallback is returned as an error.
    pub fn backup_to(&self, dest: &Path) -> Result<BackupOutcome> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Backup(format!("failed to create {}: {e}", parent.display())))?;
        }

        let conn = self.connection()?;
        let snapshot = conn.execute("VACUUM INTO ?1", params![dest.to_string_lossy().into_owned()]);
        let snapshot_err = match snapshot {
            Ok(_) => {
                info!("backup written to {}", dest.display());
                return Ok(BackupOutcome {
                    path: dest.to_path_buf(),
                    method: BackupMethod::Snapshot,
                });
            }
            Err(e) => e,
        };
        warn!("snapshot backup failed ({snapshot_err}), falling back to file copy");

        let Some(source) = &self.path else {
            return Err(Error::Backup(format!(
                "in-memory store has no backing file to copy (snapshot error: {snapshot_err})"
            )));
        };

        // Fold the WAL into the main file so the copy is complete.
        if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
            warn!("wal checkpoint before copy failed: {e}");
        }
        std::fs::copy(source, dest).map_err(|e| {
            Error::Backup(format!(
                "failed to copy {} to {}: {e}",
                source.display(),
                dest.display()
            ))
        })?;

        info!("backup copied to {}", dest.display());
        Ok(BackupOutcome {
            path: dest.to_path_buf(),
            method: BackupMethod::FileCopy,
        })
    }

    /// Reclaim space, refresh planner statistics and rebuild indexes. The
    /// first failing step stops the sequence.
    pub fn optimize(&self) -> OptimizeReport {
        let mut report = OptimizeReport {
            success: true,
            timestamp: Utc::now(),
            completed: Vec::new(),
            failed_step: None,
            error: None,
        };

        let conn = match self.connection() {
            Ok(conn) => conn,
            Err(e) => {
                report.success = false;
                report.error = Some(e.to_string());
                return report;
            }
        };

        for (step, sql) in OPTIMIZE_STEPS {
            if let Err(e) = conn.execute_batch(sql) {
                error!("optimize step {step} failed: {e}");
                report.success = false;
                report.failed_step = Some(step.to_string());
                report.error = Some(e.to_string());
                return report;
            }
            report.completed.push(step.to_string());
        }

        info!("database optimized");
        report
    }

    pub fn admin_stats(&self) -> Result<AdminStats> {
        let conn = self.connection()?;
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| Error::Database(format!("failed to count: {e}")))
        };

        Ok(AdminStats {
            total_users: count("SELECT COUNT(*) FROM users")?,
            users_by_role: grouped_counts(&conn, "SELECT role, COUNT(*) FROM users GROUP BY role")?,
            total_applications: count("SELECT COUNT(*) FROM applications")?,
            applications_by_status: grouped_counts(
                &conn,
                "SELECT status, COUNT(*) FROM applications GROUP BY status",
            )?,
            total_products: count("SELECT COUNT(*) FROM products")?,
            active_products: count("SELECT COUNT(*) FROM products WHERE is_active = 1")?,
            total_reviews: count("SELECT COUNT(*) FROM reviews")?,
            pending_reviews: count("SELECT COUNT(*) FROM reviews WHERE is_approved = 0")?,
            generated_at: Utc::now(),
        })
    }

    /// Close the underlying connection, surfacing any close error.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| Error::Database("database lock poisoned".into()))?;
        conn.close()
            .map_err(|(_, e)| Error::Database(format!("failed to close database: {e}")))?;
        info!("database closed");
        Ok(())
    }
}

fn grouped_counts(conn: &Connection, sql: &str) -> Result<BTreeMap<String, i64>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| Error::Database(format!("failed to group counts: {e}")))?;
    rows.collect::<std::result::Result<BTreeMap<_, _>, _>>()
        .map_err(|e| Error::Database(format!("failed to read count row: {e}")))
}

/// `backup-<env>-<ISO-8601>` with `:` and `.` replaced by `-`.
pub fn backup_file_name(environment: Environment, at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("backup-{environment}-{stamp}.sqlite")
}
