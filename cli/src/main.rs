use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sqlmigrate_core::{
    Config, DriverRegistry, MigrateError, Migration, Migrator, create_migration,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Timestamp layout of the `Applied At` status column.
const APPLIED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output format for the `status` command.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum StatusFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

#[derive(Debug, Parser)]
#[command(name = "sqlmigrate", version)]
#[command(about = "Apply, revert and inspect versioned SQL migrations")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// YAML configuration file.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
    /// Database URL; its scheme selects the driver (e.g. sqlite://app.db).
    #[arg(long, env = "DB_DSN", global = true)]
    dsn: Option<String>,
    /// Directory holding the migration files.
    #[arg(long, env = "MIGRATIONS_DIR", global = true)]
    dir: Option<PathBuf>,
    /// Bookkeeping table name.
    #[arg(long, env = "MIGRATIONS_TABLE", global = true)]
    table_name: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new migration file from the template.
    Create(CreateArgs),
    /// Apply all pending migrations.
    Up,
    /// Roll back the most recently applied migration.
    Down,
    /// Roll back and re-apply the current migration.
    Redo,
    /// Show applied migrations.
    Status(StatusArgs),
    /// Print the current database version.
    Dbversion,
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Migration name; converted to snake_case for the file name.
    #[arg(required = true, num_args = 1..)]
    name: Vec<String>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    /// Output format.
    #[arg(long, value_enum, default_value_t = StatusFormat::Table)]
    format: StatusFormat,
}

fn main() {
    let cli = Cli::parse();

    let result = resolve_config(&cli.global).and_then(|config| {
        init_logging(&config.logger.level)?;
        match cli.command {
            Command::Create(args) => run_create(&config, args),
            Command::Up => run_up(&config),
            Command::Down => run_down(&config),
            Command::Redo => run_redo(&config),
            Command::Status(args) => run_status(&config, args),
            Command::Dbversion => run_dbversion(&config),
        }
    });

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// Loads the config file (if any) and applies flag/env overrides.
fn resolve_config(args: &GlobalArgs) -> Result<Config, String> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => Config::default(),
    };

    if let Some(dsn) = &args.dsn {
        config.migrator.dsn = dsn.clone();
    }
    if let Some(dir) = &args.dir {
        config.migrator.dir = dir.clone();
    }
    if let Some(table_name) = &args.table_name {
        config.migrator.table_name = Some(table_name.clone());
    }
    Ok(config)
}

fn init_logging(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("Invalid log level '{level}': {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {e}"))
}

fn registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    sqlmigrate_sqlite::register(&mut registry);
    registry
}

fn open_migrator(config: &Config) -> Result<Migrator, String> {
    if config.migrator.dsn.is_empty() {
        return Err("No database DSN configured (use --dsn, DB_DSN or the config file)".into());
    }
    Migrator::new(&registry(), &config.migrator).map_err(|e| e.to_string())
}

/// Runs one engine operation, closing the migrator afterwards.
fn with_migrator<T>(
    config: &Config,
    op: impl FnOnce(&mut Migrator) -> Result<T, MigrateError>,
) -> Result<Option<T>, String> {
    let mut migrator = open_migrator(config)?;
    let outcome = op(&mut migrator);
    let closed = migrator.close();
    settle(outcome, closed)
}

/// Combines an operation outcome with the result of closing the migrator.
///
/// Informational outcomes (nothing to do) are logged and count as success.
/// A close failure is reported even when the operation already failed.
fn settle<T>(
    outcome: Result<T, MigrateError>,
    closed: Result<(), MigrateError>,
) -> Result<Option<T>, String> {
    let value = match outcome {
        Ok(value) => Some(value),
        Err(err) if err.is_informational() => {
            info!("{err}");
            None
        }
        Err(err) => {
            return Err(match closed {
                Ok(()) => err.to_string(),
                Err(close_err) => format!("{err}; additional error: {close_err}"),
            });
        }
    };
    closed.map_err(|e| e.to_string())?;
    Ok(value)
}

// ---------------------------------------------------------------------------
// commands
// ---------------------------------------------------------------------------

fn run_create(config: &Config, args: CreateArgs) -> Result<(), String> {
    let name = args.name.join(" ");
    let path = create_migration(&config.migrator.dir, &name).map_err(|e| e.to_string())?;
    println!("{}", path.display());
    Ok(())
}

fn run_up(config: &Config) -> Result<(), String> {
    with_migrator(config, Migrator::up)?;
    Ok(())
}

fn run_down(config: &Config) -> Result<(), String> {
    with_migrator(config, Migrator::down)?;
    Ok(())
}

fn run_redo(config: &Config) -> Result<(), String> {
    with_migrator(config, Migrator::redo)?;
    Ok(())
}

fn run_status(config: &Config, args: StatusArgs) -> Result<(), String> {
    let migrations = with_migrator(config, Migrator::status)?.unwrap_or_default();
    let rendered = match args.format {
        StatusFormat::Table => render_status_table(&migrations),
        StatusFormat::Json => serde_json::to_string_pretty(&migrations)
            .map_err(|e| format!("JSON serialization failed: {e}"))?,
        StatusFormat::Yaml => serde_yaml::to_string(&migrations)
            .map_err(|e| format!("YAML serialization failed: {e}"))?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn run_dbversion(config: &Config) -> Result<(), String> {
    if let Some(version) = with_migrator(config, Migrator::db_version)? {
        println!("{version}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Renders applied migrations as a boxed table with a total footer.
fn render_status_table(migrations: &[Migration]) -> String {
    let headers = ["#", "Version", "Name", "Applied At"];
    let rows: Vec<[String; 4]> = migrations
        .iter()
        .enumerate()
        .map(|(idx, migration)| {
            [
                (idx + 1).to_string(),
                migration.version.to_string(),
                migration.source.clone(),
                migration
                    .applied_at
                    .map(|at| at.format(APPLIED_AT_FORMAT).to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = format!(
        "+{}+",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let format_row = |cells: &[&str]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!(" {cell:<width$} "))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut out = String::new();
    out.push_str(&border);
    out.push('\n');
    out.push_str(&format_row(&headers));
    out.push('\n');
    out.push_str(&border);
    out.push('\n');
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push_str(&format_row(&cells));
        out.push('\n');
    }
    out.push_str(&border);
    out.push('\n');
    out.push_str(&format!("Total: {}\n", rows.len()));
    out
}
