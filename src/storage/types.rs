//! Storage record types.

/// Metadata row, written once per discovered market window.
#[derive(Debug, Clone)]
pub struct MarketRecord {
    pub slug: String,
    pub symbol: String,
    pub yes_token: String,
    pub no_token: String,
    pub start_time: Option<i64>,
}

/// One confirmed fill (or compensating unwind), append-only.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    /// ISO-8601 UTC timestamp
    pub timestamp: String,
    pub symbol: String,
    /// "YES", "NO", "SELL_YES", "SELL_NO"
    pub side: String,
    /// Price in dollars at the tick
    pub price: f64,
    pub shares: u64,
    /// Cost in dollars (negative proceeds are recorded positive; side says
    /// whether this was a buy or a compensating sell)
    pub cost: f64,
    /// Feed-receive to submission-complete latency (ms)
    pub latency_ms: f64,
    /// Venue round-trip latency (ms)
    pub exchange_latency_ms: f64,
    /// Position combined price at fill time (dollars)
    pub combined_price: f64,
    /// Position guaranteed profit at fill time (dollars)
    pub guaranteed_profit: f64,
    pub order_id: Option<String>,
}
