use std::collections::BTreeSet;

use atelier_common::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Migration system for tracking and applying database schema changes.
///
/// Each migration has a version number and a SQL script. Migrations are
/// applied in ascending version order and tracked in `schema_migrations`.
/// Scripts should use guarded DDL (`IF NOT EXISTS`) so a migration that
/// failed before being recorded can be retried on the next boot.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// A migration that was applied during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<AppliedMigration>,
}

impl MigrationReport {
    pub fn count(&self) -> usize {
        self.applied.len()
    }
}

/// Known migration together with its bookkeeping state.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: u32,
    pub description: String,
    pub applied_at: Option<DateTime<Utc>>,
}

const CREATE_BOOKKEEPING_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

/// Applies an ordered migration set to a connection.
pub struct MigrationRunner<'a> {
    migrations: &'a [Migration],
}

impl<'a> MigrationRunner<'a> {
    /// Build a runner, rejecting sets that are not strictly ascending by
    /// version. A bad set is a configuration error and should stop startup.
    pub fn new(migrations: &'a [Migration]) -> Result<Self> {
        for pair in migrations.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.version == next.version {
                return Err(Error::Config(format!(
                    "duplicate migration version {}",
                    next.version
                )));
            }
            if prev.version > next.version {
                return Err(Error::Config(format!(
                    "migration {} is declared after {}; versions must ascend",
                    next.version, prev.version
                )));
            }
        }
        Ok(Self { migrations })
    }

    pub fn ensure_bookkeeping_table(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(CREATE_BOOKKEEPING_SQL)
            .map_err(|e| Error::Database(format!("failed to create schema_migrations: {e}")))
    }

    pub fn applied_versions(&self, conn: &Connection) -> Result<BTreeSet<u32>> {
        let mut stmt = conn
            .prepare("SELECT version FROM schema_migrations")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, u32>(0))
            .map_err(|e| Error::Database(format!("failed to read applied versions: {e}")))?;

        rows.collect::<std::result::Result<BTreeSet<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read version row: {e}")))
    }

    /// Known migrations without a bookkeeping record, in ascending order.
    pub fn pending(&self, conn: &Connection) -> Result<Vec<&'a Migration>> {
        let applied = self.applied_versions(conn)?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect())
    }

    /// Apply `pending` in ascending order. Each script and its bookkeeping
    /// row commit together; the first failure stops the run and earlier
    /// migrations stay recorded.
    pub fn apply(&self, conn: &mut Connection, pending: &[&Migration]) -> Result<MigrationReport> {
        let mut ordered = pending.to_vec();
        ordered.sort_by_key(|m| m.version);

        let mut report = MigrationReport::default();
        for migration in ordered {
            info!(
                "applying migration v{}: {}",
                migration.version, migration.description
            );
            if let Err(e) = apply_one(conn, migration) {
                warn!(
                    "migration v{} failed after {} applied this run: {e}",
                    migration.version,
                    report.count()
                );
                return Err(e);
            }
            report.applied.push(AppliedMigration {
                version: migration.version,
                description: migration.description.to_string(),
            });
        }
        Ok(report)
    }

    /// Bring the schema up to date: bookkeeping table, pending set, apply.
    pub fn run(&self, conn: &mut Connection) -> Result<MigrationReport> {
        self.ensure_bookkeeping_table(conn)?;
        let pending = self.pending(conn)?;
        if pending.is_empty() {
            debug!("schema up to date ({} migrations known)", self.migrations.len());
            return Ok(MigrationReport::default());
        }
        let report = self.apply(conn, &pending)?;
        info!("applied {} migration(s)", report.count());
        Ok(report)
    }

    pub fn status(&self, conn: &Connection) -> Result<Vec<MigrationStatus>> {
        self.ensure_bookkeeping_table(conn)?;
        let mut stmt = conn
            .prepare("SELECT applied_at FROM schema_migrations WHERE version = ?1")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let mut statuses = Vec::with_capacity(self.migrations.len());
        for migration in self.migrations {
            let applied_at = match stmt.query_row(params![migration.version], |row| {
                row.get::<_, String>(0)
            }) {
                Ok(ts) => Some(parse_datetime(&ts).map_err(|e| {
                    Error::Database(format!(
                        "migration {} has a malformed applied_at: {e}",
                        migration.version
                    ))
                })?),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => {
                    return Err(Error::Database(format!(
                        "failed to read migration {}: {e}",
                        migration.version
                    )));
                }
            };
            statuses.push(MigrationStatus {
                version: migration.version,
                description: migration.description.to_string(),
                applied_at,
            });
        }
        Ok(statuses)
    }
}

fn apply_one(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let failed = |e: rusqlite::Error| Error::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    let tx = conn.transaction().map_err(failed)?;
    tx.execute_batch(migration.up).map_err(failed)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
        params![migration.version, migration.description],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)
}

fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        // CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"
        Err(_) => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .map(|naive| naive.and_utc()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[Migration] = &[
        Migration {
            version: 1,
            description: "create widgets",
            up: "CREATE TABLE IF NOT EXISTS widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
        },
        Migration {
            version: 2,
            description: "add widget color",
            up: "ALTER TABLE widgets ADD COLUMN color TEXT;",
        },
        Migration {
            version: 3,
            description: "index widget names",
            up: "CREATE INDEX IF NOT EXISTS idx_widgets_name ON widgets(name);",
        },
    ];

    fn recorded(conn: &Connection) -> Vec<u32> {
        let runner = MigrationRunner::new(&[]).unwrap();
        runner.applied_versions(conn).unwrap().into_iter().collect()
    }

    #[test]
    fn ensure_bookkeeping_table_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(SAMPLE).unwrap();
        runner.ensure_bookkeeping_table(&conn).unwrap();
        runner.ensure_bookkeeping_table(&conn).unwrap();
        assert!(runner.applied_versions(&conn).unwrap().is_empty());
    }

    #[test]
    fn run_applies_everything_then_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(SAMPLE).unwrap();

        let first = runner.run(&mut conn).unwrap();
        assert_eq!(first.count(), 3);
        assert_eq!(
            first.applied.iter().map(|m| m.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let second = runner.run(&mut conn).unwrap();
        assert_eq!(second.count(), 0);
        assert_eq!(recorded(&conn), vec![1, 2, 3]);
    }

    #[test]
    fn failure_keeps_earlier_migrations_and_skips_the_rest() {
        let broken: &[Migration] = &[
            SAMPLE[0],
            Migration {
                version: 2,
                description: "broken",
                up: "ALTER TABLE no_such_table ADD COLUMN x TEXT;",
            },
            SAMPLE[2],
        ];
        let mut conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(broken).unwrap();

        let err = runner.run(&mut conn).unwrap_err();
        match err {
            Error::Migration { version, .. } => assert_eq!(version, 2),
            other => panic!("expected migration error, got {other:?}"),
        }
        assert_eq!(recorded(&conn), vec![1]);

        // Retry after the script is fixed picks up from the failed version.
        let fixed = MigrationRunner::new(SAMPLE).unwrap();
        let report = fixed.run(&mut conn).unwrap();
        assert_eq!(
            report.applied.iter().map(|m| m.version).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(fixed.pending(&conn).unwrap().is_empty());
    }

    #[test]
    fn failed_script_leaves_no_partial_schema() {
        let partial: &[Migration] = &[Migration {
            version: 1,
            description: "half applied",
            up: "CREATE TABLE gadgets (id INTEGER PRIMARY KEY);
                 INSERT INTO missing_table VALUES (1);",
        }];
        let mut conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(partial).unwrap();
        assert!(runner.run(&mut conn).is_err());

        let exists: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='gadgets'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 0);
        assert!(recorded(&conn).is_empty());
    }

    #[test]
    fn apply_orders_pending_by_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(SAMPLE).unwrap();
        runner.ensure_bookkeeping_table(&conn).unwrap();

        let shuffled = [&SAMPLE[1], &SAMPLE[0]];
        let report = runner.apply(&mut conn, &shuffled).unwrap();
        assert_eq!(
            report.applied.iter().map(|m| m.version).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(runner.pending(&conn).unwrap().len(), 1);
    }

    #[test]
    fn rejects_duplicate_versions() {
        let dup = [SAMPLE[0], SAMPLE[0]];
        let err = MigrationRunner::new(&dup).err().unwrap();
        assert!(err.to_string().contains("duplicate migration version 1"));
    }

    #[test]
    fn rejects_descending_versions() {
        let out_of_order = [SAMPLE[1], SAMPLE[0]];
        assert!(matches!(
            MigrationRunner::new(&out_of_order),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn status_reports_applied_timestamps() {
        let mut conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(SAMPLE).unwrap();
        runner.ensure_bookkeeping_table(&conn).unwrap();
        runner.apply(&mut conn, &[&SAMPLE[0]]).unwrap();

        let status = runner.status(&conn).unwrap();
        assert_eq!(status.len(), 3);
        assert!(status[0].applied_at.is_some());
        assert!(status[1].applied_at.is_none());
        assert!(status[2].applied_at.is_none());
    }

    #[test]
    fn parses_sqlite_timestamps() {
        let dt = parse_datetime("2025-03-01 12:30:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-03-01T12:30:00+00:00");
        assert!(parse_datetime("last tuesday").is_err());
    }

    #[test]
    fn status_rejects_malformed_applied_at() {
        let conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(SAMPLE).unwrap();
        runner.ensure_bookkeeping_table(&conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) \
             VALUES (1, 'create widgets', 'last tuesday')",
            [],
        )
        .unwrap();

        let err = runner.status(&conn).unwrap_err();
        assert!(matches!(&err, Error::Database(msg) if msg.contains("migration 1")));
    }
}
