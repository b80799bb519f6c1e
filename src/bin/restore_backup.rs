use clap::Parser;
use log::LevelFilter;
use lurkcoin::backup::{self, EncodedAccount};
use lurkcoin::config::{Config, DatabaseKind};
use lurkcoin::storage::plaintext::Plaintext;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::process::exit;

#[derive(Parser)]
#[command(version, about, long_about = "Restores a ledger backup into the configured database")]
struct Args {
    /// Path to the YAML configuration file.
    config: PathBuf,
    /// Path to the JSON backup file.
    backup_file: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .expect("simple_logger init failed");

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            log::error!("Failed to load config: {}", error);
            exit(1);
        }
    };
    if config.database.kind != DatabaseKind::Plaintext {
        log::error!("Only persistent databases can be restored into");
        exit(1);
    }

    let encoded: Vec<EncodedAccount> = match std::fs::read(&args.backup_file)
        .map_err(lurkcoin::Error::from)
        .and_then(|raw| Ok(serde_json::from_slice(&raw)?))
    {
        Ok(encoded) => encoded,
        Err(error) => {
            log::error!("Failed to read backup file: {}", error);
            exit(1);
        }
    };

    log::info!(
        "Restoring backup {:?} into {:?}...",
        args.backup_file,
        config.database.location
    );
    let database = match Plaintext::open(&config.database.location).await {
        Ok(database) => database,
        Err(error) => {
            log::error!("Failed to open database: {}", error);
            exit(1);
        }
    };
    if let Err(error) = backup::restore(&database, encoded).await {
        log::error!("Restore failed: {}", error);
        exit(1);
    }
    log::info!("Database backup restored!");
}
