use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use range_keeper::config::{create_example_config, LoggingConfig};
use range_keeper::{
    ChainClient, Clock, InMemoryStore, JsonFileStore, KeeperConfig, PersistenceStore, PriorityFeeSource, RangeKeeper,
    RpcPriorityFeeSource, SimulatedChainClient, SystemClock,
};

/// Log a status line every this many monitor intervals
const STATUS_EVERY_INTERVALS: u32 = 10;

#[derive(Parser, Debug)]
#[command(name = "range-keeper")]
#[command(about = "Keeps a concentrated liquidity position in range")]
struct Args {
    /// Path to keeper configuration file
    #[arg(short, long, default_value = "keeper.toml")]
    config: String,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Write an example configuration to --config and exit
    #[arg(long)]
    write_example_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.write_example_config {
        create_example_config(&args.config)?;
        println!("Wrote example configuration to {}", args.config);
        return Ok(());
    }

    let mut config = KeeperConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging);

    info!(
        cluster = %config.cluster,
        pool = %config.position.pool_id,
        position = %config.position.position_id,
        "Starting range keeper"
    );
    warn!("Running against the simulated pool; no transactions reach the cluster");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let simulator = Arc::new(SimulatedChainClient::new(
        &config.simulation,
        config.position.pool_id,
        config.rebalance.decimal_shift,
    ));
    simulator.seed_configured_position(
        &config.simulation,
        config.position.position_id,
        config.position.owner_token_id,
        clock.now(),
    )?;

    let store: Arc<dyn PersistenceStore> = match &config.storage.data_dir {
        Some(dir) => {
            info!(data_dir = %dir.display(), "Persisting history to disk");
            Arc::new(JsonFileStore::open(dir).await?)
        }
        None => Arc::new(InMemoryStore::new()),
    };

    let fee_source = config.rpc_url.clone().map(|url| {
        info!(rpc_url = %url, "Sampling priority fees from RPC");
        Arc::new(RpcPriorityFeeSource::new(url, vec![config.position.pool_id])) as Arc<dyn PriorityFeeSource>
    });

    let status_period = config.monitor.interval() * STATUS_EVERY_INTERVALS;
    let client: Arc<dyn ChainClient> = simulator;
    let keeper = RangeKeeper::new(config, client, store, fee_source, clock)?;
    keeper.start().await?;

    let mut status_timer = time::interval_at(time::Instant::now() + status_period, status_period);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = status_timer.tick() => log_status(&keeper).await,
        }
    }

    if let Some(outcome) = keeper.stop().await {
        info!(success = outcome.success, transactions = ?outcome.transaction_ids, "Last rebalance finished");
    }
    Ok(())
}

async fn log_status(keeper: &RangeKeeper) {
    let stats = keeper.stats().await;
    info!(
        monitor_active = stats.monitor.active,
        passes = stats.monitor.passes,
        failed_passes = stats.monitor.failed_passes,
        rebalances_today = stats.rebalance.rebalance_count_today,
        rebalance_attempts = stats.history.total_attempts,
        rebalance_failures = stats.history.failed,
        "Keeper status"
    );

    match keeper.health_check().await {
        Ok(report) if report.is_healthy() => {}
        Ok(report) => warn!(warnings = ?report.warnings, "Health check warning"),
        Err(e) => error!(error = %e, "Health check failed"),
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("range_keeper={},range_types={}", config.level, config.level).into());

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
