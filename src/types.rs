//! Core type definitions for the parity arbitrage engine.
//!
//! Prices are fixed-point cents everywhere a gating decision is made; floats
//! only appear when formatting or exporting state. Share counts are whole
//! numbers and are always truncated, never rounded up.

use std::sync::Arc;

/// Price in cents (1-99 for $0.01-$0.99), 0 indicates no price available
pub type PriceCents = u16;

/// Dollar amounts (costs, notionals) in cents
pub type Cents = u64;

/// Sentinel value indicating no price is currently available
pub const NO_PRICE: PriceCents = 0;

/// Fixed per-leg slippage buffer applied before the admission gate (2 cents)
pub const PRICE_BUFFER_CENTS: PriceCents = 2;

/// Convert f64 dollar price (0.01-0.99) to cents, rounded to the tick
#[inline(always)]
pub fn price_to_cents(price: f64) -> PriceCents {
    ((price * 100.0).round() as i64).clamp(0, 99) as PriceCents
}

/// Convert cents back to an f64 dollar price
#[inline(always)]
pub fn cents_to_price(cents: PriceCents) -> f64 {
    cents as f64 / 100.0
}

/// Convert a cent-denominated cost to dollars for display/export
#[inline(always)]
pub fn cents_to_usd(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

/// Parse a price from the venue's "0.XX" string format.
/// Returns 0 if parsing fails.
#[inline]
pub fn parse_price(s: &str) -> PriceCents {
    let bytes = s.as_bytes();
    // "0.XX" fast path
    if bytes.len() == 4 && bytes[0] == b'0' && bytes[1] == b'.' {
        let d1 = bytes[2].wrapping_sub(b'0');
        let d2 = bytes[3].wrapping_sub(b'0');
        if d1 < 10 && d2 < 10 {
            return (d1 as u16 * 10 + d2 as u16) as PriceCents;
        }
    }
    // "0.X" (e.g. "0.5")
    if bytes.len() == 3 && bytes[0] == b'0' && bytes[1] == b'.' {
        let d = bytes[2].wrapping_sub(b'0');
        if d < 10 {
            return (d as u16 * 10) as PriceCents;
        }
    }
    s.parse::<f64>().map(price_to_cents).unwrap_or(0)
}

/// Order side at the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Which outcome leg of the binary pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Yes,
    No,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

/// Order time-in-force. Buys rest until canceled (priced to match as taker);
/// fill-or-kill is reserved for compensating unwinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Fok => "FOK",
        }
    }
}

/// An active trading window for one symbol, produced by discovery.
///
/// Replaced wholesale on window rollover; never merged.
#[derive(Debug, Clone)]
pub struct Market {
    /// Configured symbol (e.g. "BTC")
    pub symbol: Arc<str>,
    /// Canonical window slug, also the market identifier
    pub slug: Arc<str>,
    /// YES outcome token id
    pub yes_token: Arc<str>,
    /// NO outcome token id
    pub no_token: Arc<str>,
    /// Window start as unix seconds, parsed from the slug trailer.
    /// None when the slug does not carry a parseable timestamp.
    pub start_time: Option<i64>,
}

impl Market {
    /// Minutes elapsed since the observed window start, None if unknown
    pub fn minutes_from_start(&self, now_unix: i64) -> Option<f64> {
        self.start_time
            .map(|start| (now_unix - start) as f64 / 60.0)
    }
}

/// A pair-order intent emitted by the decision engine.
/// Prices are already buffered (walked through the book).
#[derive(Debug, Clone)]
pub struct PairOrder {
    pub market_slug: Arc<str>,
    pub symbol: Arc<str>,
    pub yes_token: Arc<str>,
    pub no_token: Arc<str>,
    pub yes_price: PriceCents,
    pub no_price: PriceCents,
    pub shares: u64,
    /// Feed receive time, for latency accounting
    pub detected_at: std::time::Instant,
}
