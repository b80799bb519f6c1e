use clap::Parser;
use log::LevelFilter;
use lurkcoin::api;
use lurkcoin::config::{Config, DatabaseKind};
use lurkcoin::storage::memory::Memory;
use lurkcoin::storage::plaintext::Plaintext;
use lurkcoin::storage::Backend;
use lurkcoin::util::VERSION;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::process::exit;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(version, about, long_about = "Multi-tenant ledger server")]
struct Args {
    /// Path to the YAML configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .with_module_level("lurkcoin", LevelFilter::Info)
        .init()
        .expect("simple_logger init failed");

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            log::error!("Failed to load config: {}", error);
            exit(1);
        }
    };
    log::info!("lurkcoin {}", VERSION);

    match config.database.kind {
        DatabaseKind::Memory => {
            log::warn!("Using the memory database: nothing will be persisted");
            serve(Memory::default(), &config).await;
        }
        DatabaseKind::Plaintext => match Plaintext::open(&config.database.location).await {
            Ok(database) => serve(database, &config).await,
            Err(error) => {
                log::error!("Failed to open database: {}", error);
                exit(1);
            }
        },
    }
}

async fn serve<B: Backend>(backend: B, config: &Config) {
    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutting down");
            shutdown.cancel();
        }
    });

    let (address, server) = warp::serve(api::routes(backend))
        .bind_with_graceful_shutdown(config.address, async move { token.cancelled().await });
    log::info!("Starting server on http://{}/", address);
    server.await;
}
