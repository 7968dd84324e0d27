//! Per-token best-bid/ask store.
//!
//! Each update fully replaces one token's book; there is no incremental merge
//! and no sequencing guarantee beyond "latest processed wins". Sides are
//! sorted best-first at write time so reads are O(1).

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::PriceCents;

/// A single price level (price in cents, size in shares)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: PriceCents,
    pub size: f64,
}

/// One token's book: bids descending, asks ascending.
#[derive(Debug, Clone, Default)]
pub struct TokenBook {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub updated_at: Option<Instant>,
}

impl TokenBook {
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }
}

/// Shared cache of token books, written by the feed, read by the decision
/// engine and the state exporter.
#[derive(Default)]
pub struct OrderbookCache {
    books: RwLock<FxHashMap<Arc<str>, TokenBook>>,
}

impl OrderbookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both sides for a token. Levels with zero price are dropped;
    /// bids are sorted descending, asks ascending.
    pub fn update(&self, token: &Arc<str>, mut bids: Vec<Level>, mut asks: Vec<Level>) {
        bids.retain(|l| l.price > 0);
        asks.retain(|l| l.price > 0);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        let mut books = self.books.write();
        books.insert(
            token.clone(),
            TokenBook {
                bids,
                asks,
                updated_at: Some(Instant::now()),
            },
        );
    }

    /// Snapshot of one token's book; empty book for unknown tokens.
    pub fn get(&self, token: &str) -> TokenBook {
        self.books
            .read()
            .get(token)
            .cloned()
            .unwrap_or_default()
    }

    /// Best ask for a token, if any
    pub fn best_ask(&self, token: &str) -> Option<Level> {
        self.books.read().get(token).and_then(|b| b.best_ask())
    }

    /// Best bid for a token, if any
    pub fn best_bid(&self, token: &str) -> Option<Level> {
        self.books.read().get(token).and_then(|b| b.best_bid())
    }

    /// Drop books for tokens no longer active (called on window rollover)
    pub fn retain_tokens(&self, keep: &[Arc<str>]) {
        let mut books = self.books.write();
        books.retain(|token, _| keep.iter().any(|k| k.as_ref() == token.as_ref()));
    }
}
