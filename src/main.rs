use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use parity_arb::clob::{HttpOrderClient, OrderApi, SimOrderClient};
use parity_arb::config::{Config, ORDER_POOL_SIZE};
use parity_arb::discovery::{self, DiscoveryClient};
use parity_arb::execution::{ExecutionCoordinator, OrderPool};
use parity_arb::feed;
use parity_arb::snapshot;
use parity_arb::state::EngineContext;
use parity_arb::storage::create_storage_channel;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let file_appender = tracing_appender::rolling::never(".", "parity_arb.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    info!(
        "Starting parity-arb v{} [{}] symbols={:?} max_combined={}¢",
        env!("CARGO_PKG_VERSION"),
        config.mode_label(),
        config.symbols,
        config.max_combined_cents,
    );

    let (storage, storage_handle) = create_storage_channel(&config.db_path);
    let ctx = Arc::new(EngineContext::new(config, storage));

    let order_client: Arc<dyn OrderApi> = if ctx.config.simulation_mode {
        Arc::new(SimOrderClient::new())
    } else {
        let creds = ctx
            .config
            .creds
            .clone()
            .context("Production mode requires API credentials")?;
        Arc::new(HttpOrderClient::new(creds)?)
    };

    // Resolve the first window before the feed starts so there is something
    // to subscribe to
    let discovery_client = DiscoveryClient::new()?;
    discovery::initial_discovery(&ctx, &discovery_client, &ctx.config).await;

    let (intent_tx, intent_rx) = tokio::sync::mpsc::channel(16);
    let pool = OrderPool::spawn(order_client, ORDER_POOL_SIZE);
    let coordinator = ExecutionCoordinator::new(ctx.clone(), pool);

    let feed_task = tokio::spawn(feed::run_feed_loop(ctx.clone(), intent_tx));
    let discovery_task = tokio::spawn(discovery::run_discovery_loop(
        ctx.clone(),
        discovery_client,
    ));
    let execution_task = tokio::spawn(parity_arb::execution::run_execution_loop(
        coordinator,
        intent_rx,
    ));
    let export_task = tokio::spawn(snapshot::run_export_loop(ctx.clone()));
    let status_task = tokio::spawn(snapshot::run_status_loop(ctx.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }

    ctx.shutdown();

    let _ = tokio::join!(
        feed_task,
        discovery_task,
        execution_task,
        export_task,
        status_task
    );

    // Flush pending trade records before exit
    ctx.storage.shutdown();
    storage_handle.join();

    info!("Shutdown complete");
    Ok(())
}
