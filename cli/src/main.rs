mod config;
mod watcher;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vsp_core::Network;
use vsp_engine::Engine;
use vsp_rpc::{ClientConfig, ConnectionManager, ConnectionSettings, HttpDialer, WalletCredentials};
use vsp_storage::SledStore;

use crate::config::{read_cert, Config};
use crate::watcher::BlockWatcher;

#[derive(Parser)]
#[command(name = "vspd")]
#[command(about = "Voting service ticket reconciliation daemon", version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "vspd.toml")]
    config: PathBuf,

    /// Override the configured network
    #[arg(short, long)]
    network: Option<Network>,

    /// Override the configured log level
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_banner(config: &Config) {
    println!("{}", "vspd".cyan().bold());
    println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_black());
    println!("{}: {}", "Network".yellow().bold(), config.network);
    println!("{}: {}", "Chain node".yellow().bold(), config.dcrd.host);
    println!(
        "{}: {}",
        "Voting wallets".yellow().bold(),
        config.wallets.hosts.join(", ")
    );
    println!("{}: {}", "Data dir".yellow().bold(), config.data_dir.display());
    println!();
}

/// Log background tasks that panicked or were aborted; returns how many did
fn report_task_exits<I>(results: I) -> usize
where
    I: IntoIterator<Item = (&'static str, Result<(), JoinError>)>,
{
    let mut failed = 0;
    for (task, result) in results {
        if let Err(e) = result {
            error!(task, error = %e, "Background task ended abnormally");
            failed += 1;
        }
    }
    failed
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level);
    print_banner(&config);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let store = Arc::new(
        SledStore::open(config.data_dir.join("tickets.db")).context("opening ticket store")?,
    );

    let dialer = HttpDialer::new(
        ClientConfig {
            addr: config.dcrd.host.clone(),
            user: config.dcrd.user.clone(),
            pass: config.dcrd.pass.clone(),
            timeout: config.rpc_timeout(),
            root_cert: read_cert(config.dcrd.cert.as_deref())?,
        },
        WalletCredentials {
            user: config.wallets.user.clone(),
            pass: config.wallets.pass.clone(),
            root_cert: read_cert(config.wallets.cert.as_deref())?,
        },
        config.rpc_timeout(),
    );
    let peers = Arc::new(ConnectionManager::new(
        ConnectionSettings {
            network: config.network,
            wallet_addrs: config.wallets.hosts.clone(),
            chain_version_req: config.chain_version_req()?,
            wallet_version_req: config.wallet_version_req()?,
            dial_timeout: config.rpc_timeout(),
        },
        Arc::new(dialer),
    ));

    let shutdown = CancellationToken::new();
    let engine = Arc::new(Engine::new(
        store.clone(),
        peers.clone(),
        config.network,
        shutdown.clone(),
    ));

    if let Err(e) = engine.run_startup_checks().await {
        error!(error = %e, "Startup integrity checks failed, retrying with the first update pass");
    }

    let (block_tx, block_rx) = mpsc::channel(16);
    let watcher = BlockWatcher::new(peers, config.block_poll_interval(), shutdown.clone())
        .spawn(block_tx);
    let updates = engine.spawn_update_task(block_rx, config.update_interval());
    let consistency = engine.spawn_consistency_task(config.consistency_interval());

    println!("{}", "✓ Ticket engine running".green());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.cancel();

    let (watcher, updates, consistency) = tokio::join!(watcher, updates, consistency);
    report_task_exits([
        ("block watcher", watcher),
        ("update", updates),
        ("consistency", consistency),
    ]);
    store.flush().context("flushing ticket store")?;
    info!("Shutdown complete");
    Ok(())
}
