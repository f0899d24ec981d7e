//! CLI binary entry point for warehouse-sync

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use data_warehouse_sync::config::{CONFIG_FILENAME, SyncConfig, sample_config};
use data_warehouse_sync::database::mask_connection_string;
use data_warehouse_sync::update;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "warehouse-sync")]
#[command(about = "Synchronize a paginated REST JSON source into a relational warehouse")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILENAME)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the warehouse system tables
    Init,
    /// Run one update cycle
    Update {
        /// Update only this table
        #[arg(short, long)]
        table: Option<String>,
        /// Print the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load one table from page files kept by an earlier cycle
    Reload {
        #[arg(short, long)]
        table: String,
    },
    /// Print a sample configuration file
    SampleConfig,
    /// Validate the configuration file
    CheckConfig,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: &Path) -> Result<SyncConfig> {
    let config = SyncConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create runtime")
}

fn handle_init(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let version = runtime()?.block_on(update::init(&config))?;
    println!("Warehouse schema at version {}", version);
    Ok(())
}

fn handle_update(config_path: &Path, table: Option<&str>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let report = runtime()?.block_on(update::run_cycle(&config, table))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    if report.has_failures() {
        bail!("{} table(s) failed", report.failed());
    }
    Ok(())
}

fn handle_reload(config_path: &Path, table: &str) -> Result<()> {
    let config = load_config(config_path)?;
    match runtime()?.block_on(update::reload(&config, table))? {
        Some(result) => println!(
            "{}: {} rows, {} history rows",
            table, result.rows, result.history_rows
        ),
        None => println!("{}: no page files found", table),
    }
    Ok(())
}

fn handle_check_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Configuration OK");
    println!("  dialect:   {}", config.warehouse.dialect);
    println!(
        "  warehouse: {}",
        mask_connection_string(&config.warehouse.connection_string)
    );
    println!("  source:    {} (tenant {})", config.source.url, config.source.tenant);
    println!("  data dir:  {}", config.staging.data_dir.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Init => handle_init(&cli.config),
        Commands::Update { table, json } => handle_update(&cli.config, table.as_deref(), *json),
        Commands::Reload { table } => handle_reload(&cli.config, table),
        Commands::SampleConfig => {
            print!("{}", sample_config());
            Ok(())
        }
        Commands::CheckConfig => handle_check_config(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
