mod cli;
mod config;
mod storage;

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use organizer_core::storage::SecureStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Entry point wiring the CLI to the encrypted store.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command.unwrap_or(cli::Command::Health) {
        cli::Command::Init => run_init(&config).await?,
        cli::Command::Put { name, file } => run_put(&config, &name, &file).await?,
        cli::Command::Get { name, out } => run_get(&config, &name, out).await?,
        cli::Command::Rm { name } => run_rm(&config, &name).await?,
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Version => print_version(),
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect RUST_LOG; default to info. Logs go to stderr so `get` output stays clean.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("organizer {}", env!("CARGO_PKG_VERSION"));
}

async fn run_init(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    let root = store
        .initialize_storage()
        .await
        .wrap_err("could not initialize encrypted storage")?;
    println!("Storage ready at {}", root.display());
    Ok(())
}

async fn run_put(config: &config::Config, name: &str, file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .wrap_err_with(|| format!("could not read {}", file.display()))?;
    let store = storage::store_from_config(config)?;
    put_entry(&store, name, &bytes).await?;
    println!("Stored {name} ({} bytes)", bytes.len());
    Ok(())
}

async fn run_get(config: &config::Config, name: &str, out: Option<PathBuf>) -> Result<()> {
    let store = storage::store_from_config(config)?;
    let bytes = get_entry(&store, name).await?;
    match out {
        Some(path) => tokio::fs::write(&path, &bytes)
            .await
            .wrap_err_with(|| format!("could not write {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn run_rm(config: &config::Config, name: &str) -> Result<()> {
    let store = storage::store_from_config(config)?;
    store
        .delete(name)
        .await
        .wrap_err_with(|| format!("could not delete {name}"))?;
    println!("Deleted {name}");
    Ok(())
}

async fn put_entry<S: SecureStore>(store: &S, name: &str, bytes: &[u8]) -> Result<()> {
    store
        .put(name, bytes)
        .await
        .wrap_err_with(|| format!("could not store {name}"))
}

async fn get_entry<S: SecureStore>(store: &S, name: &str) -> Result<Vec<u8>> {
    store
        .get(name)
        .await
        .wrap_err_with(|| format!("could not load {name}"))
}

/// Runs a quick health check of the encrypted storage path.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    run_store_health(&store).await?;
    println!("Storage: ok");
    Ok(())
}

async fn run_store_health<S: SecureStore>(store: &S) -> Result<()> {
    let check_name = "health/check";
    let payload = b"ok";
    put_entry(store, check_name, payload).await?;
    let round_trip = get_entry(store, check_name).await?;
    store
        .delete(check_name)
        .await
        .wrap_err("could not remove health check entry")?;

    if round_trip != payload {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
