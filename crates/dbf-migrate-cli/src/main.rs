//! dbf-migrate CLI - inspect and maintain DBF to MySQL migrations.

use clap::{Parser, Subcommand};
use dbf_migrate::source::discover_tables;
use dbf_migrate::{CheckpointStore, Config, MigrateError, MysqlChannel, SqlChannel};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "dbf-migrate")]
#[command(about = "Resumable DBF to MySQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration, list source tables and test the destination
    Check {
        /// Skip the destination connection test
        #[arg(long)]
        offline: bool,
    },

    /// Show the checkpoint of an unfinished migration
    Status,

    /// Delete the checkpoint so the next run starts fresh
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Check { offline } => check(&config, offline, cli.output_json).await,
        Commands::Status => status(&config, cli.output_json),
        Commands::Reset => reset(&config),
    }
}

async fn check(config: &Config, offline: bool, output_json: bool) -> Result<(), MigrateError> {
    let tables = discover_tables(&config.source.folder)?;
    if tables.is_empty() {
        return Err(MigrateError::Config(format!(
            "no source tables found in {}",
            config.source.folder.display()
        )));
    }

    let destination = if offline {
        "skipped"
    } else {
        let mut channel = MysqlChannel::new(&config.target);
        channel.connect().await?;
        channel.close().await?;
        "ok"
    };

    if output_json {
        let report = serde_json::json!({
            "sourceFolder": config.source.folder,
            "tables": tables,
            "destination": destination,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Source folder: {}", config.source.folder.display());
        println!("Tables: {}", tables.len());
        for table in &tables {
            match &table.memo_path {
                Some(memo) => println!("  {} (memo: {})", table.name, memo.display()),
                None => println!("  {}", table.name),
            }
        }
        println!(
            "Destination {}:{}/{}: {}",
            config.target.host, config.target.port, config.target.database, destination
        );
    }
    Ok(())
}

fn status(config: &Config, output_json: bool) -> Result<(), MigrateError> {
    let store = CheckpointStore::new(&config.migration.checkpoint_dir);
    let database = &config.target.database;

    let Some(checkpoint) = store.read(database)? else {
        if output_json {
            println!("null");
        } else {
            println!("No checkpoint for database {}", database);
        }
        return Ok(());
    };

    if output_json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    let applies = checkpoint.matches(&config.source.folder, database);
    println!("Checkpoint for database {}", database);
    println!("  Source folder: {}", checkpoint.source_folder);
    println!("  Started: {}", checkpoint.start_time);
    println!("  Updated: {}", checkpoint.last_update_time);
    println!(
        "  Tables: {}/{} completed",
        checkpoint.completed_tables.len(),
        checkpoint.total_tables
    );
    for table in &checkpoint.completed_tables {
        println!("    {}", table);
    }
    if !applies {
        println!("  Note: recorded for a different source folder; the next run starts fresh");
    }
    Ok(())
}

fn reset(config: &Config) -> Result<(), MigrateError> {
    let store = CheckpointStore::new(&config.migration.checkpoint_dir);
    let database = &config.target.database;
    let _lock = store.lock(database)?;

    if store.delete(database)? {
        println!("Removed checkpoint for database {}", database);
    } else {
        println!("No checkpoint for database {}", database);
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
