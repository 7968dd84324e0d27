//! Periodic state export and status heartbeat.
//!
//! The exporter overwrites a single JSON file on a fixed cadence with the
//! full engine state (no incremental updates), for dashboards to poll. The
//! status loop logs a one-line heartbeat so a silent process is visible in
//! the logs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{STATE_EXPORT_INTERVAL_SECS, STATUS_INTERVAL_SECS};
use crate::state::EngineContext;
use crate::stats::Stats;
use crate::types::{cents_to_price, cents_to_usd, Cents, PRICE_BUFFER_CENTS};

#[derive(Debug, Serialize)]
struct MarketSnapshot {
    symbol: String,
    slug: String,
    yes_price: f64,
    no_price: f64,
    combined_price: f64,
    arbitrage_opportunity: bool,
    yes_shares: u64,
    no_shares: u64,
    total_cost: f64,
    guaranteed_profit: f64,
    has_data: bool,
}

#[derive(Debug, Serialize)]
struct StateSnapshot {
    timestamp: String,
    uptime_secs: u64,
    simulation_mode: bool,
    wss_connected: bool,
    wss_messages: u64,
    wss_reconnects: u64,
    malformed_frames: u64,
    opportunities: u64,
    orders_sent: u64,
    orders_filled: u64,
    orders_failed: u64,
    unwinds: u64,
    residual_exposures: u64,
    total_spent: f64,
    total_guaranteed_profit: f64,
    markets: Vec<MarketSnapshot>,
}

fn build_snapshot(ctx: &EngineContext) -> StateSnapshot {
    let markets = ctx.markets.read().markets();
    let mut market_snapshots = Vec::with_capacity(markets.len());

    for market in markets {
        let yes_ask = ctx.books.best_ask(&market.yes_token);
        let no_ask = ctx.books.best_ask(&market.no_token);
        let has_data = yes_ask.is_some() && no_ask.is_some();

        let yes_cents = yes_ask.map(|l| l.price).unwrap_or(0);
        let no_cents = no_ask.map(|l| l.price).unwrap_or(0);
        let combined = yes_cents as Cents + no_cents as Cents;
        let buffered = combined + 2 * PRICE_BUFFER_CENTS as Cents;

        let position = ctx.ledger.get(&market.slug).unwrap_or_default();

        market_snapshots.push(MarketSnapshot {
            symbol: market.symbol.to_string(),
            slug: market.slug.to_string(),
            yes_price: cents_to_price(yes_cents),
            no_price: cents_to_price(no_cents),
            combined_price: combined as f64 / 100.0,
            arbitrage_opportunity: has_data
                && buffered < ctx.config.max_combined_cents as Cents,
            yes_shares: position.yes_shares,
            no_shares: position.no_shares,
            total_cost: cents_to_usd(position.total_cost()),
            guaranteed_profit: cents_to_usd(position.guaranteed_profit_cents()),
            has_data,
        });
    }

    StateSnapshot {
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: ctx.uptime_secs(),
        simulation_mode: ctx.config.simulation_mode,
        wss_connected: ctx.stats.is_connected(),
        wss_messages: Stats::get(&ctx.stats.wss_messages),
        wss_reconnects: Stats::get(&ctx.stats.wss_reconnects),
        malformed_frames: Stats::get(&ctx.stats.malformed_frames),
        opportunities: Stats::get(&ctx.stats.opportunities),
        orders_sent: Stats::get(&ctx.stats.orders_sent),
        orders_filled: Stats::get(&ctx.stats.orders_filled),
        orders_failed: Stats::get(&ctx.stats.orders_failed),
        unwinds: Stats::get(&ctx.stats.unwinds),
        residual_exposures: Stats::get(&ctx.stats.residual_exposures),
        total_spent: cents_to_usd(Stats::get(&ctx.stats.total_spent_cents)),
        total_guaranteed_profit: cents_to_usd(ctx.ledger.total_guaranteed_profit_cents()),
        markets: market_snapshots,
    }
}

fn export_state(ctx: &EngineContext) -> Result<()> {
    let snapshot = build_snapshot(ctx);
    let json = serde_json::to_string_pretty(&snapshot).context("State serialization failed")?;
    std::fs::write(&ctx.config.state_path, json)
        .with_context(|| format!("Failed to write state to {}", ctx.config.state_path))?;
    Ok(())
}

/// Overwrite the state file on a fixed cadence until shutdown.
pub async fn run_export_loop(ctx: Arc<EngineContext>) {
    let mut interval = tokio::time::interval(Duration::from_secs(STATE_EXPORT_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while ctx.is_running() {
        interval.tick().await;
        if let Err(e) = export_state(&ctx) {
            warn!("[STATE] Export failed: {e:#}");
        }
    }
    // Final snapshot so the file reflects the shutdown state
    let _ = export_state(&ctx);
    info!("[STATE] Export loop stopped");
}

/// Log a heartbeat line once a minute.
pub async fn run_status_loop(ctx: Arc<EngineContext>) {
    let mut interval = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    while ctx.is_running() {
        interval.tick().await;
        info!(
            "[STATUS] up {}s | feed {} | msgs {} | opps {} | filled {}/{} | unwinds {} | exposed {} | spent ${:.2} | locked ${:.2}",
            ctx.uptime_secs(),
            if ctx.stats.is_connected() { "up" } else { "DOWN" },
            Stats::get(&ctx.stats.wss_messages),
            Stats::get(&ctx.stats.opportunities),
            Stats::get(&ctx.stats.orders_filled),
            Stats::get(&ctx.stats.orders_sent),
            Stats::get(&ctx.stats.unwinds),
            Stats::get(&ctx.stats.residual_exposures),
            cents_to_usd(Stats::get(&ctx.stats.total_spent_cents)),
            cents_to_usd(ctx.ledger.total_guaranteed_profit_cents()),
        );
        for (slug, position) in ctx.ledger.snapshot() {
            if position.fill_count == 0 {
                continue;
            }
            info!(
                "[STATUS]   {} YES {} / NO {} | cost ${:.2} | locked ${:.2}",
                slug,
                position.yes_shares,
                position.no_shares,
                cents_to_usd(position.total_cost()),
                cents_to_usd(position.guaranteed_profit_cents()),
            );
        }
    }
}
