use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::storage::{IdentityStore, IdentityStores};
use facegate::{config, server, AccessService, Partition};
use log::info;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(
    version,
    about = "Face access-control server - identity store, matching and live relay"
)]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Listen address, overrides the config file
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// List enrolled identity names
    List {
        #[arg(value_enum)]
        partition: Partition,
    },
    /// Dump name → embedding as JSON
    Export {
        #[arg(value_enum)]
        partition: Partition,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove one enrolled identity
    Delete {
        #[arg(value_enum)]
        partition: Partition,
        name: String,
    },
    /// Remove all identities in a partition
    Purge {
        #[arg(value_enum)]
        partition: Partition,
    },
    /// Open config file in editor
    Config {
        /// Write the default config instead of opening an editor
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Serve { listen } => serve(cfg, listen),
        Commands::List { partition } => {
            let store = open_store(&cfg, partition)?;
            for name in store.list() {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::Export { partition, output } => export(&cfg, partition, output),
        Commands::Delete { partition, name } => {
            let stores = open_stores(&cfg)?;
            stores
                .get(partition)
                .delete(&name)
                .with_context(|| format!("Failed to delete '{}'", name))?;
            info!("✓ Deleted '{}' from {} partition", name, partition);
            Ok(())
        }
        Commands::Purge { partition } => {
            info!("Purging {} partition", partition);
            let stores = open_stores(&cfg)?;
            let store = stores.get(partition);
            let count = store.len();
            store.clear().context("Failed to purge identities")?;
            info!("✓ Removed {} identities", count);
            Ok(())
        }
        Commands::Config { init } => {
            let path = config_path.unwrap_or(&config::CONFIG_PATH);
            if init {
                config::save_config(&config::Config::default(), Some(path))?;
                info!("Wrote default config to {}", path.display());
                Ok(())
            } else {
                open_config(path)
            }
        }
    }
}

/// Read-only view; does not take the data directory lock.
fn open_store(cfg: &config::Config, partition: Partition) -> Result<IdentityStore> {
    IdentityStore::open(&cfg.data_dir, partition)
        .with_context(|| format!("Failed to open {} identity store", partition))
}

/// Writable stores. Fails while `serve` holds the same data directory.
fn open_stores(cfg: &config::Config) -> Result<IdentityStores> {
    IdentityStores::open(&cfg.data_dir).context("Failed to open identity stores for writing")
}

fn serve(cfg: config::Config, listen: Option<String>) -> Result<()> {
    let listen = listen.unwrap_or_else(|| cfg.listen.clone());
    let service =
        Arc::new(AccessService::open(&cfg).context("Failed to open identity stores")?);
    let prune_every = AccessService::prune_interval(cfg.enrollment_ttl());

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(server::serve(service, &listen, prune_every))
}

fn export(cfg: &config::Config, partition: Partition, output: Option<PathBuf>) -> Result<()> {
    let store = open_store(cfg, partition)?;
    let dump: std::collections::BTreeMap<String, Vec<f32>> = store
        .list_all()
        .into_iter()
        .map(|(name, e)| (name, e.to_vec()))
        .collect();
    let json = serde_json::to_string_pretty(&dump)?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("✓ Exported {} identities to {}", dump.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Edit the config in `$EDITOR`, seeding defaults first, then check that the
/// result still loads.
fn open_config(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        config::save_config(&config::Config::default(), Some(path))?;
        info!("Seeded {} with defaults", path.display());
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = std::process::Command::new(&editor)
        .arg(path)
        .status()
        .with_context(|| format!("Failed to run editor '{}'", editor))?;
    if !status.success() {
        anyhow::bail!("{} exited with {}", editor, status);
    }

    let cfg = config::load_config(Some(path))
        .with_context(|| format!("{} no longer parses", path.display()))?;
    info!(
        "✓ Config OK: listen {}, data dir {}",
        cfg.listen,
        cfg.data_dir.display()
    );
    Ok(())
}
