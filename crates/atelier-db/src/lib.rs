pub mod database;
pub mod migrations;
pub mod schema;

pub use database::{
    BackupMethod, BackupOutcome, Database, HealthReport, HealthStatus, OptimizeReport, TableCheck,
    backup_file_name,
};
pub use migrations::{AppliedMigration, Migration, MigrationReport, MigrationRunner, MigrationStatus};
pub use schema::MIGRATIONS;
