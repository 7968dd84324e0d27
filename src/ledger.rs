//! Per-market position accumulators.
//!
//! Shares and cost only increase on confirmed fills and only decrease via a
//! compensating unwind that exactly reverses a prior fill. The whole ledger
//! is swapped out (never merged) on window rollover; fills addressed to a
//! market that is no longer present are rejected by the mutation methods.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::types::{Cents, Outcome, PriceCents};

/// Accumulated position for one market window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub yes_shares: u64,
    pub yes_cost: Cents,
    pub no_shares: u64,
    pub no_cost: Cents,
    pub fill_count: u64,
}

impl Position {
    pub fn total_cost(&self) -> Cents {
        self.yes_cost + self.no_cost
    }

    /// Average YES price in dollars (0 if no shares)
    pub fn avg_yes_price(&self) -> f64 {
        if self.yes_shares == 0 {
            0.0
        } else {
            self.yes_cost as f64 / self.yes_shares as f64 / 100.0
        }
    }

    /// Average NO price in dollars (0 if no shares)
    pub fn avg_no_price(&self) -> f64 {
        if self.no_shares == 0 {
            0.0
        } else {
            self.no_cost as f64 / self.no_shares as f64 / 100.0
        }
    }

    /// Combined price = total cost / matched shares, in dollars.
    /// 0 when either side is empty.
    pub fn combined_price(&self) -> f64 {
        let matched = self.yes_shares.min(self.no_shares);
        if matched == 0 {
            0.0
        } else {
            self.total_cost() as f64 / matched as f64 / 100.0
        }
    }

    /// Guaranteed profit in cents: matched payout minus total cost,
    /// floored at 0. Exactly one outcome pays $1 per matched share.
    pub fn guaranteed_profit_cents(&self) -> Cents {
        let matched = self.yes_shares.min(self.no_shares);
        if matched == 0 {
            return 0;
        }
        (matched * 100).saturating_sub(self.total_cost())
    }

    /// Record a confirmed fill
    pub fn apply_fill(&mut self, outcome: Outcome, shares: u64, price: PriceCents) {
        let cost = shares * price as Cents;
        match outcome {
            Outcome::Yes => {
                self.yes_shares += shares;
                self.yes_cost += cost;
            }
            Outcome::No => {
                self.no_shares += shares;
                self.no_cost += cost;
            }
        }
        self.fill_count += 1;
    }

    /// Reverse a prior fill exactly (compensating unwind succeeded).
    /// The subtraction uses the original buy price so the position nets
    /// back to its pre-attempt values; the realized loss lives in the
    /// trade log, not in the ledger.
    pub fn unwind_fill(&mut self, outcome: Outcome, shares: u64, buy_price: PriceCents) {
        let cost = shares * buy_price as Cents;
        match outcome {
            Outcome::Yes => {
                self.yes_shares = self.yes_shares.saturating_sub(shares);
                self.yes_cost = self.yes_cost.saturating_sub(cost);
            }
            Outcome::No => {
                self.no_shares = self.no_shares.saturating_sub(shares);
                self.no_cost = self.no_cost.saturating_sub(cost);
            }
        }
    }
}

/// Ledger of positions keyed by market slug. Mutated only by the execution
/// coordinator; replaced wholesale by discovery on window rollover.
#[derive(Default)]
pub struct PositionLedger {
    positions: Mutex<FxHashMap<Arc<str>, Position>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full position set with fresh entries for the given
    /// market slugs. Prior positions are discarded, never carried over.
    pub fn reset(&self, slugs: impl IntoIterator<Item = Arc<str>>) {
        let fresh: FxHashMap<Arc<str>, Position> = slugs
            .into_iter()
            .map(|slug| (slug, Position::default()))
            .collect();
        *self.positions.lock() = fresh;
    }

    /// Snapshot one market's position; None if the market is not active.
    pub fn get(&self, slug: &str) -> Option<Position> {
        self.positions.lock().get(slug).cloned()
    }

    /// Record a confirmed fill. Returns false (and logs) when the market
    /// has rolled over since the order was submitted.
    pub fn apply_fill(
        &self,
        slug: &str,
        outcome: Outcome,
        shares: u64,
        price: PriceCents,
    ) -> bool {
        let mut positions = self.positions.lock();
        match positions.get_mut(slug) {
            Some(pos) => {
                pos.apply_fill(outcome, shares, price);
                true
            }
            None => {
                warn!(
                    "[LEDGER] Dropping fill for rolled-over market {} ({} {} @ {}¢)",
                    slug, shares, outcome, price
                );
                false
            }
        }
    }

    /// Exactly reverse a prior fill after a successful compensating unwind.
    pub fn unwind_fill(
        &self,
        slug: &str,
        outcome: Outcome,
        shares: u64,
        buy_price: PriceCents,
    ) -> bool {
        let mut positions = self.positions.lock();
        match positions.get_mut(slug) {
            Some(pos) => {
                pos.unwind_fill(outcome, shares, buy_price);
                true
            }
            None => {
                warn!("[LEDGER] Unwind for rolled-over market {} ignored", slug);
                false
            }
        }
    }

    /// Sum of guaranteed profit across all active positions, in cents
    pub fn total_guaranteed_profit_cents(&self) -> Cents {
        self.positions
            .lock()
            .values()
            .map(|p| p.guaranteed_profit_cents())
            .sum()
    }

    /// Snapshot of all positions for status/export loops
    pub fn snapshot(&self) -> Vec<(Arc<str>, Position)> {
        self.positions
            .lock()
            .iter()
            .map(|(slug, pos)| (slug.clone(), pos.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_accumulates_shares_and_cost() {
        let mut pos = Position::default();
        pos.apply_fill(Outcome::Yes, 10, 42);
        pos.apply_fill(Outcome::No, 10, 52);

        assert_eq!(pos.yes_shares, 10);
        assert_eq!(pos.yes_cost, 420);
        assert_eq!(pos.no_shares, 10);
        assert_eq!(pos.no_cost, 520);
        assert_eq!(pos.fill_count, 2);
        assert_eq!(pos.total_cost(), 940);
    }

    #[test]
    fn test_guaranteed_profit_floor() {
        // 10 matched at combined 0.94 -> 60¢ guaranteed
        let mut pos = Position::default();
        pos.apply_fill(Outcome::Yes, 10, 42);
        pos.apply_fill(Outcome::No, 10, 52);
        assert_eq!(pos.guaranteed_profit_cents(), 60);
        assert!((pos.combined_price() - 0.94).abs() < 1e-9);

        // combined >= 1 -> exactly 0
        let mut bad = Position::default();
        bad.apply_fill(Outcome::Yes, 10, 55);
        bad.apply_fill(Outcome::No, 10, 55);
        assert_eq!(bad.guaranteed_profit_cents(), 0);

        // one side empty -> exactly 0, combined reported as 0
        let mut one_sided = Position::default();
        one_sided.apply_fill(Outcome::Yes, 10, 30);
        assert_eq!(one_sided.guaranteed_profit_cents(), 0);
        assert_eq!(one_sided.combined_price(), 0.0);
    }

    #[test]
    fn test_avg_prices_zero_when_empty() {
        let pos = Position::default();
        assert_eq!(pos.avg_yes_price(), 0.0);
        assert_eq!(pos.avg_no_price(), 0.0);
        assert_eq!(pos.combined_price(), 0.0);
    }

    #[test]
    fn test_unwind_round_trip_identity() {
        let mut pos = Position::default();
        pos.apply_fill(Outcome::Yes, 7, 40);
        pos.apply_fill(Outcome::No, 7, 50);
        let before = pos.clone();

        pos.apply_fill(Outcome::Yes, 5, 44);
        pos.unwind_fill(Outcome::Yes, 5, 44);

        assert_eq!(pos.yes_shares, before.yes_shares);
        assert_eq!(pos.yes_cost, before.yes_cost);
        assert_eq!(pos.no_shares, before.no_shares);
        assert_eq!(pos.no_cost, before.no_cost);
    }

    #[test]
    fn test_ledger_reset_discards_positions() {
        let ledger = PositionLedger::new();
        ledger.reset(["market-a".into()]);
        assert!(ledger.apply_fill("market-a", Outcome::Yes, 3, 40));
        assert_eq!(ledger.get("market-a").unwrap().yes_shares, 3);

        // Rollover: new window, prior position discarded
        ledger.reset(["market-b".into()]);
        assert!(ledger.get("market-a").is_none());
        assert_eq!(ledger.get("market-b").unwrap(), Position::default());
    }

    #[test]
    fn test_stale_fill_rejected_after_rollover() {
        let ledger = PositionLedger::new();
        ledger.reset(["window-1".into()]);
        ledger.reset(["window-2".into()]);

        // Late confirmation addressed to the stale window
        assert!(!ledger.apply_fill("window-1", Outcome::No, 5, 50));
        assert!(!ledger.unwind_fill("window-1", Outcome::No, 5, 50));
        assert_eq!(ledger.get("window-2").unwrap().fill_count, 0);
    }

    #[test]
    fn test_total_guaranteed_profit_sums_markets() {
        let ledger = PositionLedger::new();
        ledger.reset(["a".into(), "b".into()]);
        ledger.apply_fill("a", Outcome::Yes, 10, 42);
        ledger.apply_fill("a", Outcome::No, 10, 52);
        ledger.apply_fill("b", Outcome::Yes, 4, 45);
        ledger.apply_fill("b", Outcome::No, 4, 45);

        // a: 60¢, b: 4 * (100 - 90) = 40¢
        assert_eq!(ledger.total_guaranteed_profit_cents(), 100);
    }
}
