//! Parity-arbitrage decision engine.
//!
//! All gating runs in fixed-point cents: a pair is admitted only when the
//! buffered combined ask clears the configured threshold strictly, the
//! position budget allows at least one whole share, both legs meet the
//! minimum notional, and the share imbalance stays under the time-regime
//! ceiling. `evaluate` is a pure function of its inputs; `analyze` wires it
//! to the live book cache and ledger.

use std::time::Instant;

use tracing::{debug, info};

use crate::config::{Config, IMBALANCE_CEILING_MIN0_TENTHS, IMBALANCE_CEILING_MIN1_TENTHS};
use crate::ledger::Position;
use crate::state::EngineContext;
use crate::stats::Stats;
use crate::types::{Cents, Market, PairOrder, PriceCents, NO_PRICE, PRICE_BUFFER_CENTS};

/// A pair admitted by the gate: buffered limit prices and the share count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub yes_price: PriceCents,
    pub no_price: PriceCents,
    pub shares: u64,
}

/// Imbalance ceiling for the current window regime, in tenths of the ratio.
///
/// Early in a window one-sided books are normal, so the first minute gets a
/// wide ceiling and the second a narrower one. Past that, and whenever the
/// elapsed time is unknown, the strict steady-state ceiling applies.
pub fn imbalance_ceiling_tenths(elapsed_minutes: Option<f64>, steady_tenths: u64) -> u64 {
    match elapsed_minutes {
        Some(m) if m < 1.0 => IMBALANCE_CEILING_MIN0_TENTHS,
        Some(m) if m < 2.0 => IMBALANCE_CEILING_MIN1_TENTHS,
        _ => steady_tenths,
    }
}

/// Whether one side may add shares given the current position.
///
/// A side with zero shares is always admissible by ratio. When the opposite
/// side is empty the ratio is undefined, so the side is instead capped at
/// half the position budget. Otherwise the shares ratio (in tenths, to stay
/// in integer arithmetic) must not exceed the ceiling.
fn side_admissible(
    own_shares: u64,
    own_cost: Cents,
    other_shares: u64,
    ceiling_tenths: u64,
    max_position_cents: Cents,
) -> bool {
    if own_shares == 0 {
        return true;
    }
    if other_shares == 0 {
        return own_cost < max_position_cents / 2;
    }
    own_shares * 10 <= other_shares * ceiling_tenths
}

/// Gate one observed ask pair against the position. Returns the buffered
/// prices and share count when every check passes, None otherwise.
///
/// Pure: no clocks, no I/O, no shared state.
pub fn evaluate(
    position: &Position,
    elapsed_minutes: Option<f64>,
    yes_ask: PriceCents,
    no_ask: PriceCents,
    config: &Config,
) -> Option<Admission> {
    if yes_ask == NO_PRICE || no_ask == NO_PRICE {
        return None;
    }

    let yes_price = (yes_ask + PRICE_BUFFER_CENTS).min(99);
    let no_price = (no_ask + PRICE_BUFFER_CENTS).min(99);
    let buffered = yes_price as Cents + no_price as Cents;

    // Strict: a buffered pair at exactly the threshold is not an edge
    if buffered >= config.max_combined_cents as Cents {
        return None;
    }

    let ceiling = imbalance_ceiling_tenths(elapsed_minutes, config.max_imbalance_tenths);
    let yes_ok = side_admissible(
        position.yes_shares,
        position.yes_cost,
        position.no_shares,
        ceiling,
        config.max_position_cents,
    );
    let no_ok = side_admissible(
        position.no_shares,
        position.no_cost,
        position.yes_shares,
        ceiling,
        config.max_position_cents,
    );
    if !yes_ok || !no_ok {
        return None;
    }

    let remaining = config
        .max_position_cents
        .saturating_sub(position.total_cost());
    let budget = remaining.min(2 * config.max_order_cents);

    // Whole shares only, truncated; the budget is divided by the raw
    // combined ask, the buffer applies to the gate and the order prices
    let combined = yes_ask as Cents + no_ask as Cents;
    let shares = budget / combined;
    if shares < 1 {
        return None;
    }

    // Both buffered legs must clear the venue's minimum notional
    if shares * (yes_price as Cents) < config.min_order_cents
        || shares * (no_price as Cents) < config.min_order_cents
    {
        return None;
    }

    Some(Admission {
        yes_price,
        no_price,
        shares,
    })
}

/// Evaluate one market against the live books and emit a pair-order intent
/// when the gate admits it.
pub fn analyze(ctx: &EngineContext, market: &Market, detected_at: Instant) -> Option<PairOrder> {
    let yes_ask = ctx.books.best_ask(&market.yes_token)?;
    let no_ask = ctx.books.best_ask(&market.no_token)?;

    let position = ctx.ledger.get(&market.slug)?;
    let elapsed = market.minutes_from_start(chrono::Utc::now().timestamp());

    let raw_combined = yes_ask.price as u64 + no_ask.price as u64;
    if raw_combined < 100 {
        debug!(
            "[{}] combined ask {}¢ ({} + {})",
            market.symbol, raw_combined, yes_ask.price, no_ask.price
        );
    }

    let admission = evaluate(
        &position,
        elapsed,
        yes_ask.price,
        no_ask.price,
        &ctx.config,
    )?;

    Stats::incr(&ctx.stats.opportunities);
    info!(
        "[{}] Arbitrage: {} shares, YES {}¢ + NO {}¢ = {}¢ (buffered)",
        market.symbol,
        admission.shares,
        admission.yes_price,
        admission.no_price,
        admission.yes_price + admission.no_price,
    );

    Some(PairOrder {
        market_slug: market.slug.clone(),
        symbol: market.symbol.clone(),
        yes_token: market.yes_token.clone(),
        no_token: market.no_token.clone(),
        yes_price: admission.yes_price,
        no_price: admission.no_price,
        shares: admission.shares,
        detected_at,
    })
}
