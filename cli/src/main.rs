use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use schema_keeper_config::KeeperConfig;
use schema_keeper_core::SchemaVersion;
use schema_keeper_sqlite::{AppliedStep, Database, SchemaStatus, TableCheck, UpgradeReport};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "schema-keeper.yml";

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliOutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "schema-keeper")]
#[command(about = "Versioned SQLite schema setup and migration")]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create missing tables and apply every pending migration step.
    Up(UpArgs),
    /// Create missing tables without migrating.
    Setup(ConfigArgs),
    /// Show the schema version and table status.
    Status(ReportArgs),
    /// List applied migration steps.
    History(ReportArgs),
    /// Validate the configuration and migration scripts without opening the database.
    Validate(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct UpArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Remove a stale migration lock before upgrading.
    #[arg(long)]
    force_unlock: bool,
    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct ReportArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    format: CliOutputFormat,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Up(args) => run_up(args),
        Command::Setup(args) => run_setup(args),
        Command::Status(args) => run_status(args),
        Command::History(args) => run_history(args),
        Command::Validate(args) => run_validate(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// up / setup
// ---------------------------------------------------------------------------

fn run_up(args: UpArgs) -> Result<(), String> {
    let config = load_config(&args.config.config)?;
    let mut db = open_database(&config)?;
    db.connect()
        .map_err(|e| format!("Failed to connect to {}: {e}", describe_target(&config)))?;

    if args.force_unlock {
        let removed = db
            .force_unlock()
            .map_err(|e| format!("Failed to clear migration lock: {e}"))?;
        if let Some(info) = removed {
            eprintln!(
                "Removed migration lock held by {} since {}.",
                info.holder, info.acquired_at
            );
        }
    }

    let outcome = db.ensure_latest();
    db.shutdown();
    let report = outcome.map_err(|e| format!("Upgrade failed: {e}"))?;

    match args.format {
        CliOutputFormat::Json => print_json(&report),
        CliOutputFormat::Text => {
            println!("{}", describe_report(&report));
            Ok(())
        }
    }
}

fn run_setup(args: ConfigArgs) -> Result<(), String> {
    let config = load_config(&args.config)?;
    let mut db = open_database(&config)?;
    db.connect()
        .map_err(|e| format!("Failed to connect to {}: {e}", describe_target(&config)))?;
    let outcome = db.ensure_setup();
    let table_count = db.registry().tables().len();
    db.shutdown();
    outcome.map_err(|e| format!("Setup failed: {e}"))?;

    println!(
        "Setup complete. {table_count} tables ensured with prefix '{}' in {}.",
        config.prefix,
        describe_target(&config)
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// status / history
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatusOutput {
    database: String,
    latest: SchemaVersion,
    status: SchemaStatus,
    tables: Vec<TableCheck>,
}

fn run_status(args: ReportArgs) -> Result<(), String> {
    let config = load_config(&args.config.config)?;
    let mut db = open_database(&config)?;
    db.connect_application()
        .map_err(|e| format!("Failed to open {}: {e}", describe_target(&config)))?;

    let output = collect_status(&mut db, &config);
    db.shutdown();
    let output = output.map_err(|e| format!("Failed to read status: {e}"))?;

    match args.format {
        CliOutputFormat::Json => print_json(&output),
        CliOutputFormat::Text => {
            println!("Database: {}", output.database);
            println!("Status: {}", describe_status(&output.status));
            println!("Latest known version: {}", output.latest);
            println!("Tables:");
            for check in &output.tables {
                println!("  {:<32} {}", check.table, describe_check(check));
            }
            Ok(())
        }
    }
}

fn collect_status(db: &mut Database, config: &KeeperConfig) -> schema_keeper_sqlite::Result<StatusOutput> {
    Ok(StatusOutput {
        database: describe_target(config),
        latest: db.latest_version(),
        status: db.status()?,
        tables: db.verify()?,
    })
}

fn run_history(args: ReportArgs) -> Result<(), String> {
    let config = load_config(&args.config.config)?;
    let mut db = open_database(&config)?;
    db.connect_application()
        .map_err(|e| format!("Failed to open {}: {e}", describe_target(&config)))?;
    let history = db.history();
    db.shutdown();
    let history = history.map_err(|e| format!("Failed to read history: {e}"))?;

    match args.format {
        CliOutputFormat::Json => print_json(&history),
        CliOutputFormat::Text => {
            if history.is_empty() {
                println!("No migration steps applied.");
            }
            for step in &history {
                println!("{}", describe_step(step));
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn run_validate(args: ConfigArgs) -> Result<(), String> {
    let config = load_config(&args.config)?;

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
        return Err(format!(
            "Invalid table registry in '{}':\n{}",
            args.config.display(),
            details.join("\n")
        ));
    }

    // Building the database checks the prefix and loads every script; nothing is opened.
    let db = open_database(&config)?;
    println!(
        "Configuration OK: {} tables, migrations up to version {}.",
        config.tables.len(),
        db.latest_version()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<KeeperConfig, String> {
    let config = KeeperConfig::load(path)
        .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?;
    debug!(path = %path.display(), tables = config.tables.len(), "Loaded configuration");
    Ok(config)
}

fn open_database(config: &KeeperConfig) -> Result<Database, String> {
    Database::from_config(config, Vec::new()).map_err(|e| format!("Invalid configuration: {e}"))
}

fn describe_target(config: &KeeperConfig) -> String {
    match &config.database.path {
        Some(path) => format!("'{}'", path.display()),
        None => ":memory:".to_string(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))?;
    println!("{json}");
    Ok(())
}

fn describe_report(report: &UpgradeReport) -> String {
    if report.is_noop() {
        return format!("Schema is up to date at version {}.", report.to);
    }
    let applied: Vec<String> = report.applied.iter().map(ToString::to_string).collect();
    format!(
        "Upgraded schema from version {} to {}.\n  Applied steps: {}",
        report.from,
        report.to,
        applied.join(", ")
    )
}

fn describe_status(status: &SchemaStatus) -> String {
    match status {
        SchemaStatus::NotInitialized => "not initialized".to_string(),
        SchemaStatus::Current { version } => format!("up to date at version {version}"),
        SchemaStatus::NeedsMigration { from, to } => {
            format!("needs migration from version {from} to {to}")
        }
        SchemaStatus::DatabaseAhead { database, latest } => format!(
            "database is at version {database}, ahead of the latest known version {latest}"
        ),
        SchemaStatus::Incomplete { missing_tables } => {
            format!("incomplete, missing or outdated: {}", missing_tables.join(", "))
        }
    }
}

fn describe_check(check: &TableCheck) -> String {
    if !check.exists {
        "missing".to_string()
    } else if check.missing_columns.is_empty() {
        "ok".to_string()
    } else {
        format!("missing columns: {}", check.missing_columns.join(", "))
    }
}

fn describe_step(step: &AppliedStep) -> String {
    let checksum = step
        .checksum
        .as_deref()
        .map(|c| &c[..c.len().min(12)])
        .unwrap_or("-");
    format!(
        "{:>5}  {}  {:<12}  {}",
        step.version, step.applied_at, checksum, step.description
    )
}
