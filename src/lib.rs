//! Parity arbitrage engine for binary-outcome prediction markets.
//!
//! Watches streaming orderbooks for short-lived YES/NO markets, detects
//! moments where both outcomes together cost less than the $1 settlement
//! payout, and buys matched pairs with risk-bounded sizing. Positions are
//! tracked per 15-minute window and discarded wholesale on rollover.

pub mod clob;
pub mod config;
pub mod discovery;
pub mod execution;
pub mod feed;
pub mod ledger;
pub mod orderbook;
pub mod snapshot;
pub mod state;
pub mod stats;
pub mod storage;
pub mod strategy;
pub mod types;
