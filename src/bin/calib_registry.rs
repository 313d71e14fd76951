//! Calibration registry importer
//!
//! Parses the CFHT Elixir detrend database (a FITS binary table) and writes
//! the calibration registry used to select bias, dark, flat and fringe frames.
//!
//! Usage:
//!   cargo run --bin calib-registry -- [--create] path/to/detrend.fits

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use calib_registry::config::DEFAULT_REGISTRY_PATH;
use calib_registry::{ImporterConfig, RegistryImporter};

/// Type alias for the error type used throughout this module
type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Calibration registry importer
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Parse the CFHT Elixir detrend database to create a calibration registry",
    long_about = None
)]
struct Args {
    /// FITS table to parse
    table: String,

    /// Create new registry, deleting any existing one
    #[arg(long, action = ArgAction::SetTrue)]
    create: bool,

    /// Registry database file
    #[arg(long, default_value = DEFAULT_REGISTRY_PATH)]
    registry: String,

    /// Print the import summary as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Log every skipped and purged record
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = ImporterConfig::new()
        .with_registry_path(&args.registry)
        .with_create(args.create);

    let importer = RegistryImporter::new(config);
    let (mut registry, schema_statements) = importer.open_registry()?;
    for statement in &schema_statements {
        println!("{}", statement);
    }

    let mut summary = importer.import_into(&mut registry, &args.table)?;
    summary.schema_statements = schema_statements;
    registry.close()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Registered {} of {} detrend entries ({} rows) in {}",
            summary.entries_imported, summary.rows_read, summary.rows_inserted, args.registry
        );
    }

    Ok(())
}
