//! The single shared engine context.
//!
//! All mutable bot state (active markets, order books, positions, counters)
//! lives here and is passed by `Arc` to every task; there are no process-wide
//! singletons. Shared maps are mutex-protected because the tokio runtime runs
//! the control tasks across OS threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;

use crate::config::Config;
use crate::ledger::PositionLedger;
use crate::orderbook::OrderbookCache;
use crate::stats::Stats;
use crate::storage::StorageChannel;
use crate::types::Market;

/// Active-market table: markets keyed by window slug plus a token -> slug
/// reverse index. Replaced wholesale on rollover.
#[derive(Default)]
pub struct ActiveMarkets {
    by_slug: FxHashMap<Arc<str>, Arc<Market>>,
    token_to_slug: FxHashMap<Arc<str>, Arc<str>>,
}

impl ActiveMarkets {
    pub fn replace(&mut self, markets: Vec<Market>) {
        self.by_slug.clear();
        self.token_to_slug.clear();
        for market in markets {
            let market = Arc::new(market);
            self.token_to_slug
                .insert(market.yes_token.clone(), market.slug.clone());
            self.token_to_slug
                .insert(market.no_token.clone(), market.slug.clone());
            self.by_slug.insert(market.slug.clone(), market);
        }
    }

    pub fn get(&self, slug: &str) -> Option<Arc<Market>> {
        self.by_slug.get(slug).cloned()
    }

    pub fn market_for_token(&self, token: &str) -> Option<Arc<Market>> {
        let slug = self.token_to_slug.get(token)?;
        self.by_slug.get(slug).cloned()
    }

    pub fn slugs(&self) -> Vec<Arc<str>> {
        self.by_slug.keys().cloned().collect()
    }

    pub fn all_tokens(&self) -> Vec<Arc<str>> {
        self.by_slug
            .values()
            .flat_map(|m| [m.yes_token.clone(), m.no_token.clone()])
            .collect()
    }

    pub fn markets(&self) -> Vec<Arc<Market>> {
        self.by_slug.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slug.is_empty()
    }
}

/// Shared engine context, one instance per process.
pub struct EngineContext {
    pub config: Config,
    pub books: OrderbookCache,
    pub markets: RwLock<ActiveMarkets>,
    pub ledger: PositionLedger,
    pub stats: Stats,
    pub storage: StorageChannel,
    /// Cooperative shutdown flag
    pub running: AtomicBool,
    /// Signals the feed loop to close and resubscribe (window rollover)
    pub reconnect: Notify,
    pub started_at: Instant,
}

impl EngineContext {
    pub fn new(config: Config, storage: StorageChannel) -> Self {
        Self {
            config,
            books: OrderbookCache::new(),
            markets: RwLock::new(ActiveMarkets::default()),
            ledger: PositionLedger::new(),
            stats: Stats::new(),
            storage,
            running: AtomicBool::new(true),
            reconnect: Notify::new(),
            started_at: Instant::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        // Wake the feed loop so it notices the flag
        self.reconnect.notify_waiters();
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::create_storage_channel_for_tests;

    fn market(symbol: &str, slug: &str, yes: &str, no: &str) -> Market {
        Market {
            symbol: symbol.into(),
            slug: slug.into(),
            yes_token: yes.into(),
            no_token: no.into(),
            start_time: None,
        }
    }

    #[test]
    fn test_replace_rebuilds_token_index() {
        let mut table = ActiveMarkets::default();
        table.replace(vec![market("BTC", "btc-1", "y1", "n1")]);
        assert_eq!(table.market_for_token("y1").unwrap().slug.as_ref(), "btc-1");
        assert_eq!(table.market_for_token("n1").unwrap().slug.as_ref(), "btc-1");

        // Rollover: old tokens must be invalidated
        table.replace(vec![market("BTC", "btc-2", "y2", "n2")]);
        assert!(table.market_for_token("y1").is_none());
        assert!(table.get("btc-1").is_none());
        assert_eq!(table.market_for_token("y2").unwrap().slug.as_ref(), "btc-2");
    }

    #[test]
    fn test_all_tokens_covers_both_legs() {
        let mut table = ActiveMarkets::default();
        table.replace(vec![
            market("BTC", "btc-1", "y1", "n1"),
            market("ETH", "eth-1", "y2", "n2"),
        ]);
        let mut tokens: Vec<String> =
            table.all_tokens().iter().map(|t| t.to_string()).collect();
        tokens.sort();
        assert_eq!(tokens, vec!["n1", "n2", "y1", "y2"]);
    }

    #[test]
    fn test_context_shutdown_flag() {
        let ctx = EngineContext::new(Config::default(), create_storage_channel_for_tests());
        assert!(ctx.is_running());
        ctx.shutdown();
        assert!(!ctx.is_running());
    }
}
