//! System configuration and environment variable parsing.

use anyhow::Result;

use crate::types::{price_to_cents, Cents, PriceCents};

/// Polymarket CLOB WebSocket URL (market channel)
pub const WSS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Gamma API base URL (market metadata lookups)
pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// CLOB REST host (order entry)
pub const CLOB_HOST: &str = "https://clob.polymarket.com";

/// WebSocket reconnect backoff (seconds)
pub const WSS_RECONNECT_DELAY_SECS: u64 = 2;

/// WebSocket ping interval (seconds)
pub const WSS_PING_INTERVAL_SECS: u64 = 30;

/// Feed considered dead after this long without any message (seconds)
pub const WSS_STALE_TIMEOUT_SECS: u64 = 60;

/// Discovery poll interval (seconds); windows roll every 15 minutes
pub const MARKET_REFRESH_INTERVAL_SECS: u64 = 15;

/// Trading window size (seconds); slugs floor wall-clock to this boundary
pub const WINDOW_SIZE_SECS: i64 = 900;

/// State snapshot export interval (seconds)
pub const STATE_EXPORT_INTERVAL_SECS: u64 = 2;

/// Status heartbeat interval (seconds)
pub const STATUS_INTERVAL_SECS: u64 = 60;

/// Order submission worker pool size
pub const ORDER_POOL_SIZE: usize = 4;

/// Imbalance ceiling during the first minute of a window, in tenths (12.0x)
pub const IMBALANCE_CEILING_MIN0_TENTHS: u64 = 120;

/// Imbalance ceiling during the second minute, in tenths (3.0x)
pub const IMBALANCE_CEILING_MIN1_TENTHS: u64 = 30;

/// API credentials for the order-entry client
#[derive(Debug, Clone)]
pub struct ApiCreds {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
}

/// Runtime configuration, parsed once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Symbols to trade (e.g. ["BTC"])
    pub symbols: Vec<String>,

    /// Admit only when buffered combined ask is strictly below this (cents)
    pub max_combined_cents: PriceCents,

    /// Maximum total cost per market position (cents)
    pub max_position_cents: Cents,

    /// Minimum notional per leg (cents)
    pub min_order_cents: Cents,

    /// Maximum notional per order leg (cents)
    pub max_order_cents: Cents,

    /// Steady-state imbalance ceiling in tenths (13 = 1.3x)
    pub max_imbalance_tenths: u64,

    /// Simulation mode: orders are filled synthetically, no venue calls
    pub simulation_mode: bool,

    /// Path of the trade database
    pub db_path: String,

    /// Path of the exported state snapshot JSON
    pub state_path: String,

    /// Order-entry credentials; required unless simulation_mode
    pub creds: Option<ApiCreds>,
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => {
            // Tolerate trailing comments in .env values
            let clean = v.split('#').next().unwrap_or("").trim().to_lowercase();
            matches!(clean.as_str(), "true" | "1" | "yes" | "")
        }
        Err(_) => default,
    }
}

impl Config {
    /// Parse configuration from the environment.
    ///
    /// Missing order-entry credentials are fatal in production mode; the
    /// process must not start half-configured.
    pub fn from_env() -> Result<Self> {
        let symbols: Vec<String> = std::env::var("MARKETS")
            .unwrap_or_else(|_| "BTC".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let simulation_mode = env_bool("SIMULATION_MODE", true);

        let creds = match (
            std::env::var("API_KEY"),
            std::env::var("API_SECRET"),
            std::env::var("API_PASSPHRASE"),
        ) {
            (Ok(api_key), Ok(api_secret), Ok(api_passphrase)) => Some(ApiCreds {
                api_key,
                api_secret,
                api_passphrase,
            }),
            _ => None,
        };

        if !simulation_mode && creds.is_none() {
            anyhow::bail!(
                "API_KEY/API_SECRET/API_PASSPHRASE required in production mode \
                 (set SIMULATION_MODE=true to run without credentials)"
            );
        }

        let max_combined = env_f64("MAX_COMBINED_PRICE", 0.97);
        anyhow::ensure!(
            max_combined > 0.0 && max_combined <= 1.0,
            "MAX_COMBINED_PRICE must be in (0, 1], got {max_combined}"
        );

        let max_imbalance = env_f64("MAX_IMBALANCE_RATIO", 1.3);
        anyhow::ensure!(
            max_imbalance >= 1.0,
            "MAX_IMBALANCE_RATIO must be >= 1.0, got {max_imbalance}"
        );

        Ok(Self {
            symbols,
            max_combined_cents: price_to_cents(max_combined),
            max_position_cents: (env_f64("MAX_POSITION_USD", 100.0) * 100.0).round() as Cents,
            min_order_cents: (env_f64("MIN_ORDER_USD", 5.0) * 100.0).round() as Cents,
            max_order_cents: (env_f64("MAX_ORDER_USD", 25.0) * 100.0).round() as Cents,
            max_imbalance_tenths: (max_imbalance * 10.0).round() as u64,
            simulation_mode,
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "parity_arb.db".to_string()),
            state_path: std::env::var("STATE_PATH")
                .unwrap_or_else(|_| "parity_arb_state.json".to_string()),
            creds,
        })
    }

}

impl Default for Config {
    /// Simulation-mode defaults, matching the documented env defaults.
    fn default() -> Self {
        Self {
            symbols: vec!["BTC".to_string()],
            max_combined_cents: 97,
            max_position_cents: 10_000,
            min_order_cents: 500,
            max_order_cents: 2_500,
            max_imbalance_tenths: 13,
            simulation_mode: true,
            db_path: "parity_arb.db".to_string(),
            state_path: "parity_arb_state.json".to_string(),
            creds: None,
        }
    }
}

impl Config {
    pub fn mode_label(&self) -> &'static str {
        if self.simulation_mode {
            "SIMULATION"
        } else {
            "PRODUCTION"
        }
    }
}
