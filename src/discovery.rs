//! Market discovery: resolves the current trading window to outcome tokens.
//!
//! The window slug is a deterministic function of wall-clock time (floor to
//! the 15-minute boundary), so every poll recomputes it and looks the slug up
//! against the metadata API. A failed or malformed lookup is a soft failure
//! retried on the next cycle; it never takes the engine down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{Config, GAMMA_API_BASE, MARKET_REFRESH_INTERVAL_SECS, WINDOW_SIZE_SECS};
use crate::state::EngineContext;
use crate::storage::MarketRecord;
use crate::types::Market;

/// Metadata lookup timeout; treated as a soft failure on expiry
const LOOKUP_TIMEOUT_SECS: u64 = 5;

/// Canonical window slug for a symbol at the given unix time:
/// wall clock floored to the window boundary.
pub fn window_slug(symbol: &str, now_unix: i64) -> String {
    let window_start = now_unix - now_unix.rem_euclid(WINDOW_SIZE_SECS);
    format!("{}-updown-15m-{}", symbol.to_lowercase(), window_start)
}

/// Window start parsed back out of a slug trailer, None if absent.
pub fn start_time_from_slug(slug: &str) -> Option<i64> {
    slug.rsplit('-').next()?.parse().ok()
}

/// Raw metadata response. `clobTokenIds` is sometimes a JSON array and
/// sometimes a JSON array double-encoded as a string; both are handled.
#[derive(Debug, Deserialize)]
struct GammaMarket {
    #[serde(rename = "clobTokenIds", alias = "clob_token_ids")]
    clob_token_ids: Option<serde_json::Value>,
}

fn parse_token_ids(value: &serde_json::Value) -> Option<(String, String)> {
    let ids: Vec<String> = match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        serde_json::Value::String(s) => serde_json::from_str(s).ok()?,
        _ => return None,
    };
    if ids.len() >= 2 {
        Some((ids[0].clone(), ids[1].clone()))
    } else {
        None
    }
}

/// Client for the market metadata API.
pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DiscoveryClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(GAMMA_API_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve one symbol's current window. Returns None on any soft
    /// failure (non-success status, malformed body, timeout).
    pub async fn fetch_market(&self, symbol: &str, now_unix: i64) -> Option<Market> {
        let slug = window_slug(symbol, now_unix);
        let url = format!("{}/markets/slug/{}", self.base_url, slug);

        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("[{}] metadata fetch error: {}", symbol, e);
                return None;
            }
        };
        if !resp.status().is_success() {
            debug!("[{}] metadata lookup {}: {}", symbol, slug, resp.status());
            return None;
        }

        let body: GammaMarket = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                debug!("[{}] malformed metadata response: {}", symbol, e);
                return None;
            }
        };

        let (yes_token, no_token) = parse_token_ids(body.clob_token_ids.as_ref()?)?;

        info!("[{}] {}", symbol, slug);
        Some(Market {
            symbol: symbol.into(),
            slug: Arc::from(slug.as_str()),
            yes_token: Arc::from(yes_token.as_str()),
            no_token: Arc::from(no_token.as_str()),
            start_time: start_time_from_slug(&slug),
        })
    }

    /// Resolve all configured symbols concurrently with per-symbol failure
    /// isolation; one symbol failing never blocks the others.
    pub async fn fetch_all(&self, symbols: &[String], now_unix: i64) -> Vec<Market> {
        let futures = symbols.iter().map(|s| self.fetch_market(s, now_unix));
        join_all(futures).await.into_iter().flatten().collect()
    }
}

/// Apply a freshly resolved market set to the engine. Returns true when the
/// set changed, in which case the active-market table and the ledger were
/// swapped atomically and the feed must resubscribe.
pub fn apply_markets(ctx: &EngineContext, fresh: Vec<Market>) -> bool {
    let changed = {
        let mut old = ctx.markets.read().slugs();
        let mut new: Vec<Arc<str>> = fresh.iter().map(|m| m.slug.clone()).collect();
        old.sort_unstable();
        new.sort_unstable();
        old != new
    };

    if !changed {
        return false;
    }

    info!(
        "[DISCOVERY] Window rollover: {} active market(s)",
        fresh.len()
    );

    for market in &fresh {
        ctx.storage.record_market(MarketRecord {
            slug: market.slug.to_string(),
            symbol: market.symbol.to_string(),
            yes_token: market.yes_token.to_string(),
            no_token: market.no_token.to_string(),
            start_time: market.start_time,
        });
    }

    // Swap table and ledger under the table's write lock so no reader can
    // observe a new table with a stale ledger.
    {
        let mut table = ctx.markets.write();
        table.replace(fresh);
        ctx.ledger.reset(table.slugs());
        ctx.books.retain_tokens(&table.all_tokens());
    }

    true
}

/// Discovery poll loop. Runs on a fixed interval, independent of the feed
/// connection loop, and signals a forced reconnect on rollover.
pub async fn run_discovery_loop(ctx: Arc<EngineContext>, client: DiscoveryClient) {
    let mut interval = tokio::time::interval(Duration::from_secs(MARKET_REFRESH_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while ctx.is_running() {
        interval.tick().await;
        if !ctx.is_running() {
            break;
        }

        let now_unix = chrono::Utc::now().timestamp();
        let fresh = client.fetch_all(&ctx.config.symbols, now_unix).await;

        if fresh.is_empty() {
            warn!("[DISCOVERY] No markets resolved this cycle, retrying next interval");
            continue;
        }

        if apply_markets(&ctx, fresh) {
            ctx.reconnect.notify_waiters();
        }
    }

    info!("[DISCOVERY] Loop stopped");
}

/// One-shot discovery at startup so the feed has tokens to subscribe to.
pub async fn initial_discovery(ctx: &EngineContext, client: &DiscoveryClient, config: &Config) {
    let now_unix = chrono::Utc::now().timestamp();
    let fresh = client.fetch_all(&config.symbols, now_unix).await;
    if fresh.is_empty() {
        warn!("[DISCOVERY] No markets found at startup; discovery loop will retry");
        return;
    }
    apply_markets(ctx, fresh);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::create_storage_channel_for_tests;
    use crate::types::Outcome;

    #[test]
    fn test_window_slug_floors_to_boundary() {
        // 2024-01-01 00:07:30 UTC = 1704067650; window starts at 1704067200
        assert_eq!(window_slug("BTC", 1_704_067_650), "btc-updown-15m-1704067200");
        // Exactly on a boundary maps to itself
        assert_eq!(window_slug("BTC", 1_704_067_200), "btc-updown-15m-1704067200");
        // Deterministic: same input, same slug
        assert_eq!(
            window_slug("eth", 1_704_067_650),
            window_slug("ETH", 1_704_067_650)
        );
    }

    #[test]
    fn test_window_rolls_every_900_seconds() {
        let t0 = 1_704_067_200;
        assert_eq!(window_slug("BTC", t0), window_slug("BTC", t0 + 899));
        assert_ne!(window_slug("BTC", t0), window_slug("BTC", t0 + 900));
    }

    #[test]
    fn test_start_time_from_slug() {
        assert_eq!(start_time_from_slug("btc-updown-15m-1704067200"), Some(1_704_067_200));
        assert_eq!(start_time_from_slug("btc-updown-15m-x"), None);
    }

    #[test]
    fn test_parse_token_ids_array() {
        let value = serde_json::json!(["token-yes", "token-no"]);
        assert_eq!(
            parse_token_ids(&value),
            Some(("token-yes".to_string(), "token-no".to_string()))
        );
    }

    #[test]
    fn test_parse_token_ids_double_encoded() {
        // The API sometimes returns the array JSON-encoded inside a string
        let value = serde_json::json!("[\"token-yes\", \"token-no\"]");
        assert_eq!(
            parse_token_ids(&value),
            Some(("token-yes".to_string(), "token-no".to_string()))
        );
    }

    #[test]
    fn test_parse_token_ids_malformed() {
        assert_eq!(parse_token_ids(&serde_json::json!("not json")), None);
        assert_eq!(parse_token_ids(&serde_json::json!(["only-one"])), None);
        assert_eq!(parse_token_ids(&serde_json::json!(42)), None);
    }

    fn test_market(slug: &str, yes: &str, no: &str) -> Market {
        Market {
            symbol: "BTC".into(),
            slug: slug.into(),
            yes_token: yes.into(),
            no_token: no.into(),
            start_time: start_time_from_slug(slug),
        }
    }

    #[test]
    fn test_apply_markets_swaps_table_and_ledger() {
        let ctx = EngineContext::new(Config::default(), create_storage_channel_for_tests());

        let changed = apply_markets(&ctx, vec![test_market("btc-updown-15m-1000", "y1", "n1")]);
        assert!(changed);
        assert!(ctx.ledger.apply_fill("btc-updown-15m-1000", Outcome::Yes, 5, 40));

        // Same set again: no change, position preserved
        let changed = apply_markets(&ctx, vec![test_market("btc-updown-15m-1000", "y1", "n1")]);
        assert!(!changed);
        assert_eq!(ctx.ledger.get("btc-updown-15m-1000").unwrap().yes_shares, 5);

        // Rollover: position discarded, stale fills rejected
        let changed = apply_markets(&ctx, vec![test_market("btc-updown-15m-1900", "y2", "n2")]);
        assert!(changed);
        assert!(ctx.ledger.get("btc-updown-15m-1000").is_none());
        assert!(!ctx.ledger.apply_fill("btc-updown-15m-1000", Outcome::Yes, 5, 40));
        let table = ctx.markets.read();
        assert!(table.market_for_token("y1").is_none());
        assert!(table.market_for_token("y2").is_some());
    }
}
