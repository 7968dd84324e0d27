//! WebSocket market-data ingestion.
//!
//! One connection carries every active token. The loop reconnects with a
//! fixed backoff on any error, resubscribes after a window rollover (signaled
//! via the context's notify), and treats a silent socket as dead after the
//! stale timeout. Malformed frames are counted and dropped, never fatal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::{
    WSS_PING_INTERVAL_SECS, WSS_RECONNECT_DELAY_SECS, WSS_STALE_TIMEOUT_SECS, WSS_URL,
};
use crate::orderbook::Level;
use crate::state::EngineContext;
use crate::stats::Stats;
use crate::strategy;
use crate::types::{parse_price, PairOrder};

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: String,
    size: String,
}

/// One event off the market channel. `book` carries a full snapshot of one
/// token's book; `price_change` is a delta notification used only as an
/// evaluation trigger.
#[derive(Debug, Deserialize)]
struct FeedEvent {
    event_type: String,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default, alias = "buys")]
    bids: Vec<RawLevel>,
    #[serde(default, alias = "sells")]
    asks: Vec<RawLevel>,
}

/// Parse a text frame into feed events. Frames arrive either as a single
/// event object or as an array of events.
fn parse_frame(text: &str) -> Option<Vec<FeedEvent>> {
    match text.as_bytes().first() {
        Some(b'[') => serde_json::from_str(text).ok(),
        Some(b'{') => serde_json::from_str(text).map(|e| vec![e]).ok(),
        _ => None,
    }
}

fn convert_levels(raw: &[RawLevel]) -> Vec<Level> {
    raw.iter()
        .map(|l| Level {
            price: parse_price(&l.price),
            size: l.size.parse().unwrap_or(0.0),
        })
        .collect()
}

/// Apply one event: book snapshots update the cache, both event kinds
/// trigger a fresh evaluation of the owning market.
fn handle_event(
    ctx: &EngineContext,
    intents: &mpsc::Sender<PairOrder>,
    event: &FeedEvent,
    received_at: Instant,
) {
    let Some(token) = event.asset_id.as_deref() else {
        return;
    };

    match event.event_type.as_str() {
        "book" => {
            let market = ctx.markets.read().market_for_token(token);
            let Some(market) = market else { return };
            let token_arc = if market.yes_token.as_ref() == token {
                market.yes_token.clone()
            } else {
                market.no_token.clone()
            };
            ctx.books.update(
                &token_arc,
                convert_levels(&event.bids),
                convert_levels(&event.asks),
            );
            evaluate_market(ctx, intents, &market, received_at);
        }
        "price_change" => {
            let market = ctx.markets.read().market_for_token(token);
            if let Some(market) = market {
                evaluate_market(ctx, intents, &market, received_at);
            }
        }
        other => debug!("[WSS] Ignoring event type {other}"),
    }
}

fn evaluate_market(
    ctx: &EngineContext,
    intents: &mpsc::Sender<PairOrder>,
    market: &crate::types::Market,
    received_at: Instant,
) {
    if let Some(pair) = strategy::analyze(ctx, market, received_at) {
        // Execution is draining one pair at a time; drop rather than queue
        // stale intents when it falls behind
        if let Err(e) = intents.try_send(pair) {
            warn!("[WSS] Dropping pair intent, execution busy: {e}");
        }
    }
}

/// One connection's lifetime: subscribe, stream until an error, a stale
/// timeout, a rollover signal, or shutdown.
async fn connect_and_stream(
    ctx: &EngineContext,
    intents: &mpsc::Sender<PairOrder>,
) -> Result<()> {
    // Armed before the token list is read so a rollover signal arriving
    // while we connect and subscribe is not lost
    let resubscribe = ctx.reconnect.notified();
    tokio::pin!(resubscribe);
    resubscribe.as_mut().enable();

    let tokens: Vec<String> = ctx
        .markets
        .read()
        .all_tokens()
        .iter()
        .map(|t| t.to_string())
        .collect();
    if tokens.is_empty() {
        anyhow::bail!("no active tokens to subscribe");
    }

    let (stream, _) = connect_async(WSS_URL)
        .await
        .context("WebSocket connect failed")?;
    let (mut write, mut read) = stream.split();

    // Let the connection settle before subscribing
    tokio::time::sleep(Duration::from_millis(100)).await;

    let subscribe = json!({
        "assets_ids": tokens,
        "type": "market",
    });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .context("Subscribe send failed")?;

    ctx.stats.set_connected(true);
    info!("[WSS] Connected, subscribed to {} token(s)", tokens.len());

    let mut ping = tokio::time::interval(Duration::from_secs(WSS_PING_INTERVAL_SECS));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // first tick fires immediately
    let mut last_message = Instant::now();

    loop {
        if !ctx.is_running() {
            return Ok(());
        }

        tokio::select! {
            _ = ping.tick() => {
                if last_message.elapsed().as_secs() > WSS_STALE_TIMEOUT_SECS {
                    anyhow::bail!("feed stale for {}s", last_message.elapsed().as_secs());
                }
                write
                    .send(Message::Ping(Vec::new()))
                    .await
                    .context("Ping send failed")?;
            }
            _ = &mut resubscribe => {
                info!("[WSS] Resubscribe requested, closing connection");
                return Ok(());
            }
            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => anyhow::bail!("read error: {e}"),
                    None => anyhow::bail!("stream closed by venue"),
                };
                last_message = Instant::now();
                match msg {
                    Message::Text(text) => {
                        let received_at = Instant::now();
                        Stats::incr(&ctx.stats.wss_messages);
                        match parse_frame(&text) {
                            Some(events) => {
                                for event in &events {
                                    handle_event(ctx, intents, event, received_at);
                                }
                            }
                            None => {
                                Stats::incr(&ctx.stats.malformed_frames);
                                debug!("[WSS] Malformed frame dropped ({} bytes)", text.len());
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await.ok();
                    }
                    Message::Close(_) => anyhow::bail!("close frame received"),
                    _ => {}
                }
            }
        }
    }
}

/// Feed supervisor: reconnects with a fixed backoff until shutdown.
pub async fn run_feed_loop(ctx: Arc<EngineContext>, intents: mpsc::Sender<PairOrder>) {
    while ctx.is_running() {
        if ctx.markets.read().is_empty() {
            tokio::time::sleep(Duration::from_secs(WSS_RECONNECT_DELAY_SECS)).await;
            continue;
        }

        match connect_and_stream(&ctx, &intents).await {
            Ok(()) => {
                // Clean exit: rollover resubscribe or shutdown
                ctx.stats.set_connected(false);
            }
            Err(e) => {
                ctx.stats.set_connected(false);
                Stats::incr(&ctx.stats.wss_reconnects);
                warn!(
                    "[WSS] Connection lost: {e}; reconnecting in {}s",
                    WSS_RECONNECT_DELAY_SECS
                );
                tokio::time::sleep(Duration::from_secs(WSS_RECONNECT_DELAY_SECS)).await;
            }
        }
    }
    info!("[WSS] Feed loop stopped");
}
