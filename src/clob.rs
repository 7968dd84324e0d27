//! Order-entry client for the venue's CLOB REST API.
//!
//! The execution path talks to the venue through the `OrderApi` trait so the
//! coordinator and its tests never depend on the HTTP client. Production uses
//! `HttpOrderClient` (L2 HMAC header auth); simulation uses `SimOrderClient`,
//! which fills every order synthetically at its limit price.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

use crate::config::{ApiCreds, CLOB_HOST};
use crate::types::{cents_to_price, PriceCents, Side, TimeInForce};

const ORDER_TIMEOUT_SECS: u64 = 10;

/// A single-leg order submission.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: Arc<str>,
    pub side: Side,
    pub price: PriceCents,
    pub shares: u64,
    pub tif: TimeInForce,
}

/// Venue response to a submission, collapsed to what execution cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    /// Order matched immediately
    Filled { order_id: Option<String> },
    /// Order accepted but resting on the book (GTC that missed)
    Resting { order_id: Option<String> },
    /// Venue refused the order
    Rejected { reason: String },
    /// Submission never reached a definitive venue answer
    TransportError(String),
}

impl OrderOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderOutcome::Filled { .. })
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            OrderOutcome::Filled { order_id } | OrderOutcome::Resting { order_id } => {
                order_id.as_deref()
            }
            _ => None,
        }
    }
}

/// Order submission interface; the execution coordinator is generic over it.
#[async_trait::async_trait]
pub trait OrderApi: Send + Sync {
    async fn submit(&self, request: &OrderRequest) -> OrderOutcome;
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    status: String,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

/// Production order client. Requests carry L2 HMAC headers: the secret is
/// url-safe base64, the signature covers timestamp + method + path + body.
pub struct HttpOrderClient {
    http: reqwest::Client,
    host: String,
    creds: ApiCreds,
}

impl HttpOrderClient {
    pub fn new(creds: ApiCreds) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ORDER_TIMEOUT_SECS))
            .build()
            .context("Failed to build order HTTP client")?;
        Ok(Self {
            http,
            host: CLOB_HOST.to_string(),
            creds,
        })
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
        let key = URL_SAFE
            .decode(&self.creds.api_secret)
            .context("API secret is not valid base64")?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .context("Failed to initialize HMAC")?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }
}

#[async_trait::async_trait]
impl OrderApi for HttpOrderClient {
    async fn submit(&self, request: &OrderRequest) -> OrderOutcome {
        let path = "/order";
        let body = json!({
            "order": {
                "tokenID": request.token_id.as_ref(),
                "price": format!("{:.2}", cents_to_price(request.price)),
                "size": request.shares.to_string(),
                "side": request.side.to_string(),
            },
            "orderType": request.tif.as_str(),
        })
        .to_string();

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = match self.sign(&timestamp, "POST", path, &body) {
            Ok(s) => s,
            Err(e) => return OrderOutcome::TransportError(format!("signing failed: {e}")),
        };

        let resp = self
            .http
            .post(format!("{}{}", self.host, path))
            .header("POLY-API-KEY", &self.creds.api_key)
            .header("POLY-PASSPHRASE", &self.creds.api_passphrase)
            .header("POLY-TIMESTAMP", &timestamp)
            .header("POLY-SIGNATURE", &signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return OrderOutcome::TransportError(e.to_string()),
        };

        let status = resp.status();
        let parsed: OrderResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                return OrderOutcome::TransportError(format!(
                    "unreadable response ({status}): {e}"
                ))
            }
        };

        debug!(
            "[CLOB] {} {} x{} @ {}¢ -> {} ({})",
            request.side,
            request.token_id,
            request.shares,
            request.price,
            parsed.status,
            status
        );

        match parsed.status.to_uppercase().as_str() {
            "MATCHED" | "FILLED" => OrderOutcome::Filled {
                order_id: parsed.order_id,
            },
            "LIVE" => OrderOutcome::Resting {
                order_id: parsed.order_id,
            },
            _ if parsed.success => OrderOutcome::Resting {
                order_id: parsed.order_id,
            },
            _ => OrderOutcome::Rejected {
                reason: parsed
                    .error_msg
                    .unwrap_or_else(|| format!("status {} ({})", parsed.status, status)),
            },
        }
    }
}

/// Simulation client: every order fills immediately at its limit price.
#[derive(Default)]
pub struct SimOrderClient {
    counter: AtomicU64,
}

impl SimOrderClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl OrderApi for SimOrderClient {
    async fn submit(&self, request: &OrderRequest) -> OrderOutcome {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        debug!(
            "[SIM] {} {} x{} @ {}¢ filled",
            request.side, request.token_id, request.shares, request.price
        );
        OrderOutcome::Filled {
            order_id: Some(format!("sim-{n}")),
        }
    }
}
