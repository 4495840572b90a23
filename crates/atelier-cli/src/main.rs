mod banner;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use atelier_config::{AppConfig, ConfigLoader};
use atelier_db::{Database, HealthStatus};
use atelier_gateway::GatewayServer;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atelier", version, about = "Workshop back office server and database tooling")]
struct Cli {
    /// Path to a YAML or TOML config file
    #[arg(short, long, env = "ATELIER_CONFIG", default_value = "atelier.yml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Migrate the store, then serve the HTTP API
    Serve,
    /// Apply pending schema migrations
    Migrate {
        /// List known migrations and when they were applied instead
        #[arg(long)]
        status: bool,
    },
    /// Check store connectivity and expected tables
    Health,
    /// Write a backup of the store
    Backup {
        /// Destination file; defaults to a timestamped file in the backup dir
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Vacuum, analyze and reindex the store
    Optimize,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = ConfigLoader::new(Some(cli.config.clone()))
        .load()
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Migrate { status } => migrate(&config, status),
        Command::Health => health(&config),
        Command::Backup { output } => backup(&config, output),
        Command::Optimize => optimize(&config),
    }
}

async fn serve(config: AppConfig) -> Result<ExitCode> {
    banner::print_banner(&config);
    GatewayServer::new(config)
        .run()
        .await
        .context("gateway stopped")?;
    Ok(ExitCode::SUCCESS)
}

fn migrate(config: &AppConfig, status: bool) -> Result<ExitCode> {
    let db = Database::open(config).context("failed to open store")?;
    if status {
        print_json(&db.migration_status()?)?;
    } else {
        let report = db.migrate().context("migration failed")?;
        info!("{} migration(s) applied", report.count());
        print_json(&report)?;
    }
    db.close()?;
    Ok(ExitCode::SUCCESS)
}

fn health(config: &AppConfig) -> Result<ExitCode> {
    let db = Database::open(config).context("failed to open store")?;
    let report = db.health_check();
    print_json(&report)?;
    Ok(match report.status {
        HealthStatus::Healthy => ExitCode::SUCCESS,
        HealthStatus::Unhealthy => ExitCode::FAILURE,
    })
}

fn backup(config: &AppConfig, output: Option<PathBuf>) -> Result<ExitCode> {
    let db = Database::open(config).context("failed to open store")?;
    let outcome = match output {
        Some(path) => db.backup_to(&path),
        None => db.backup(),
    }
    .context("backup failed")?;
    print_json(&outcome)?;
    Ok(ExitCode::SUCCESS)
}

fn optimize(config: &AppConfig) -> Result<ExitCode> {
    let db = Database::open(config).context("failed to open store")?;
    let report = db.optimize();
    print_json(&report)?;
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_backup_output() {
        let cli = Cli::try_parse_from(["atelier", "backup", "-o", "/tmp/b.sqlite"]).unwrap();
        match cli.command {
            Command::Backup { output } => assert_eq!(output, Some(PathBuf::from("/tmp/b.sqlite"))),
            _ => panic!("expected backup command"),
        }
    }

    #[test]
    fn parses_migrate_status_flag() {
        let cli = Cli::try_parse_from(["atelier", "--log-json", "migrate", "--status"]).unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Migrate { status: true }));
    }
}
