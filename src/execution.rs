//! Pair execution: bounded submission pool, paired-leg coordination, and
//! compensating unwinds.
//!
//! Both legs of an admitted pair are submitted concurrently through a small
//! worker pool and awaited together. If exactly one leg fills, the coordinator
//! makes a single fill-or-kill attempt to sell it back at the best bid; a
//! failed unwind leaves a flagged one-sided position and is never retried.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn};

use crate::clob::{OrderApi, OrderOutcome, OrderRequest};
use crate::state::EngineContext;
use crate::stats::Stats;
use crate::storage::TradeRecord;
use crate::types::{
    cents_to_price, cents_to_usd, Cents, Outcome, PairOrder, PriceCents, Side, TimeInForce,
};

struct Job {
    request: OrderRequest,
    reply: oneshot::Sender<OrderOutcome>,
}

/// Bounded pool of order-submission workers. Capacity bounds how many
/// submissions are in flight at once; excess jobs queue.
#[derive(Clone)]
pub struct OrderPool {
    tx: mpsc::Sender<Job>,
}

impl OrderPool {
    pub fn spawn(client: Arc<dyn OrderApi>, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(workers * 4);
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..workers.max(1) {
            let client = client.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    let outcome = client.submit(&job.request).await;
                    let _ = job.reply.send(outcome);
                }
            });
        }

        Self { tx }
    }

    /// Submit one order and wait for the venue's answer.
    pub async fn submit(&self, request: OrderRequest) -> OrderOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            request,
            reply: reply_tx,
        };
        if self.tx.send(job).await.is_err() {
            return OrderOutcome::TransportError("order pool stopped".to_string());
        }
        reply_rx
            .await
            .unwrap_or_else(|_| OrderOutcome::TransportError("worker dropped reply".to_string()))
    }
}

/// How a pair attempt resolved, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairResult {
    /// Both legs filled; position is balanced
    BothFilled,
    /// One leg filled and was sold back successfully
    Unwound(Outcome),
    /// One leg filled and the compensating sell failed; exposure remains
    ResidualExposure(Outcome),
    /// Neither leg filled; nothing to clean up
    NoneFilled,
}

/// Coordinates paired submissions against the shared context.
pub struct ExecutionCoordinator {
    ctx: Arc<EngineContext>,
    pool: OrderPool,
}

struct LegReport {
    outcome: OrderOutcome,
    venue_ms: f64,
}

impl ExecutionCoordinator {
    pub fn new(ctx: Arc<EngineContext>, pool: OrderPool) -> Self {
        Self { ctx, pool }
    }

    async fn submit_timed(&self, request: OrderRequest) -> LegReport {
        let sent_at = Instant::now();
        let outcome = self.pool.submit(request).await;
        LegReport {
            outcome,
            venue_ms: sent_at.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Execute both legs of an admitted pair and resolve the result.
    pub async fn execute_pair(&self, pair: PairOrder) -> PairResult {
        Stats::incr(&self.ctx.stats.orders_sent);
        Stats::incr(&self.ctx.stats.orders_sent);

        let yes_request = OrderRequest {
            token_id: pair.yes_token.clone(),
            side: Side::Buy,
            price: pair.yes_price,
            shares: pair.shares,
            tif: TimeInForce::Gtc,
        };
        let no_request = OrderRequest {
            token_id: pair.no_token.clone(),
            side: Side::Buy,
            price: pair.no_price,
            shares: pair.shares,
            tif: TimeInForce::Gtc,
        };

        let (yes_report, no_report) = tokio::join!(
            self.submit_timed(yes_request),
            self.submit_timed(no_request)
        );

        let latency_ms = pair.detected_at.elapsed().as_secs_f64() * 1000.0;
        info!(
            "[{}] Pair submitted in {:.1}ms: YES {:?}, NO {:?}",
            pair.symbol, latency_ms, yes_report.outcome, no_report.outcome
        );

        let yes_filled = yes_report.outcome.is_filled();
        let no_filled = no_report.outcome.is_filled();

        if yes_filled {
            self.record_buy(&pair, Outcome::Yes, pair.yes_price, &yes_report, latency_ms);
        } else {
            self.record_miss(&pair, Outcome::Yes, &yes_report.outcome);
        }
        if no_filled {
            self.record_buy(&pair, Outcome::No, pair.no_price, &no_report, latency_ms);
        } else {
            self.record_miss(&pair, Outcome::No, &no_report.outcome);
        }

        match (yes_filled, no_filled) {
            (true, true) => PairResult::BothFilled,
            (false, false) => {
                info!("[{}] Missed opportunity, neither leg filled", pair.symbol);
                PairResult::NoneFilled
            }
            (true, false) => {
                self.unwind_leg(&pair, Outcome::Yes, pair.yes_price, latency_ms)
                    .await
            }
            (false, true) => {
                self.unwind_leg(&pair, Outcome::No, pair.no_price, latency_ms)
                    .await
            }
        }
    }

    fn record_buy(
        &self,
        pair: &PairOrder,
        outcome: Outcome,
        price: PriceCents,
        report: &LegReport,
        latency_ms: f64,
    ) {
        Stats::incr(&self.ctx.stats.orders_filled);
        let cost = pair.shares * price as Cents;
        self.ctx
            .stats
            .total_spent_cents
            .fetch_add(cost, std::sync::atomic::Ordering::Relaxed);

        // A fill addressed to a rolled-over window mutates nothing and is
        // not logged as a trade for the new window
        if !self
            .ctx
            .ledger
            .apply_fill(&pair.market_slug, outcome, pair.shares, price)
        {
            return;
        }

        let position = self.ctx.ledger.get(&pair.market_slug).unwrap_or_default();
        self.ctx.storage.record_trade(TradeRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            symbol: pair.symbol.to_string(),
            side: outcome.to_string(),
            price: cents_to_price(price),
            shares: pair.shares,
            cost: cents_to_usd(cost),
            latency_ms,
            exchange_latency_ms: report.venue_ms,
            combined_price: position.combined_price(),
            guaranteed_profit: cents_to_usd(position.guaranteed_profit_cents()),
            order_id: report.outcome.order_id().map(str::to_string),
        });

        info!(
            "[{}] Filled {} {} x{} @ {}¢ (${:.2})",
            pair.symbol,
            outcome,
            pair.market_slug,
            pair.shares,
            price,
            cents_to_usd(cost)
        );
    }

    fn record_miss(&self, pair: &PairOrder, outcome: Outcome, result: &OrderOutcome) {
        Stats::incr(&self.ctx.stats.orders_failed);
        match result {
            OrderOutcome::Resting { order_id } => warn!(
                "[{}] {} leg resting unmatched (order {:?})",
                pair.symbol, outcome, order_id
            ),
            OrderOutcome::Rejected { reason } => {
                warn!("[{}] {} leg rejected: {}", pair.symbol, outcome, reason)
            }
            OrderOutcome::TransportError(e) => {
                warn!("[{}] {} leg transport error: {}", pair.symbol, outcome, e)
            }
            OrderOutcome::Filled { .. } => {}
        }
    }

    /// Sell back the one filled leg with a single fill-or-kill attempt at the
    /// best bid. No retry on failure: the residual exposure is flagged and
    /// left for the operator.
    async fn unwind_leg(
        &self,
        pair: &PairOrder,
        filled: Outcome,
        buy_price: PriceCents,
        latency_ms: f64,
    ) -> PairResult {
        Stats::incr(&self.ctx.stats.unwinds);

        let token = match filled {
            Outcome::Yes => &pair.yes_token,
            Outcome::No => &pair.no_token,
        };
        // No bid means we accept whatever the venue gives at the floor tick
        let bid = self.ctx.books.best_bid(token).map(|l| l.price).unwrap_or(1);

        warn!(
            "[{}] One-sided fill ({}), selling back {} shares at {}¢ FOK",
            pair.symbol, filled, pair.shares, bid
        );

        let report = self
            .submit_timed(OrderRequest {
                token_id: token.clone(),
                side: Side::Sell,
                price: bid,
                shares: pair.shares,
                tif: TimeInForce::Fok,
            })
            .await;

        if report.outcome.is_filled() {
            self.ctx
                .ledger
                .unwind_fill(&pair.market_slug, filled, pair.shares, buy_price);

            let proceeds = pair.shares * bid as Cents;
            let position = self.ctx.ledger.get(&pair.market_slug).unwrap_or_default();
            self.ctx.storage.record_trade(TradeRecord {
                timestamp: chrono::Utc::now().to_rfc3339(),
                symbol: pair.symbol.to_string(),
                side: format!("SELL_{filled}"),
                price: cents_to_price(bid),
                shares: pair.shares,
                cost: cents_to_usd(proceeds),
                latency_ms,
                exchange_latency_ms: report.venue_ms,
                combined_price: position.combined_price(),
                guaranteed_profit: cents_to_usd(position.guaranteed_profit_cents()),
                order_id: report.outcome.order_id().map(str::to_string),
            });

            info!(
                "[{}] Unwind filled, realized {}¢/share slippage",
                pair.symbol,
                buy_price.saturating_sub(bid)
            );
            PairResult::Unwound(filled)
        } else {
            Stats::incr(&self.ctx.stats.residual_exposures);
            error!(
                "[{}] Unwind failed ({:?}); {} {} shares left exposed in {}",
                pair.symbol, report.outcome, pair.shares, filled, pair.market_slug
            );
            PairResult::ResidualExposure(filled)
        }
    }
}

/// Drains pair-order intents from the feed and executes them one at a time,
/// so at most one pair attempt per process is resolving at any moment.
pub async fn run_execution_loop(
    coordinator: ExecutionCoordinator,
    mut rx: mpsc::Receiver<PairOrder>,
) {
    info!("[EXEC] Execution loop started");
    while let Some(pair) = rx.recv().await {
        if !coordinator.ctx.is_running() {
            break;
        }
        coordinator.execute_pair(pair).await;
    }
    info!("[EXEC] Execution loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::SimOrderClient;
    use crate::config::Config;
    use crate::discovery::apply_markets;
    use crate::ledger::Position;
    use crate::orderbook::Level;
    use crate::storage::create_storage_channel_for_tests;
    use crate::types::Market;
    use parking_lot::Mutex as SyncMutex;

    /// Scripted venue: behavior keyed by (token, side), every request logged.
    struct ScriptedClient {
        script: Vec<((String, Side), OrderOutcome)>,
        log: SyncMutex<Vec<OrderRequest>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<((&str, Side), OrderOutcome)>) -> Self {
            Self {
                script: script
                    .into_iter()
                    .map(|((t, s), o)| ((t.to_string(), s), o))
                    .collect(),
                log: SyncMutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<OrderRequest> {
            self.log.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl OrderApi for ScriptedClient {
        async fn submit(&self, request: &OrderRequest) -> OrderOutcome {
            self.log.lock().push(request.clone());
            self.script
                .iter()
                .find(|((t, s), _)| t == request.token_id.as_ref() && *s == request.side)
                .map(|(_, o)| o.clone())
                .unwrap_or(OrderOutcome::Rejected {
                    reason: "unscripted".to_string(),
                })
        }
    }

    fn setup(client: Arc<dyn OrderApi>) -> (Arc<EngineContext>, ExecutionCoordinator) {
        let ctx = Arc::new(EngineContext::new(
            Config::default(),
            create_storage_channel_for_tests(),
        ));
        apply_markets(
            &ctx,
            vec![Market {
                symbol: "BTC".into(),
                slug: "btc-updown-15m-1000".into(),
                yes_token: "tok-yes".into(),
                no_token: "tok-no".into(),
                start_time: Some(1000),
            }],
        );
        let pool = OrderPool::spawn(client, 2);
        let coordinator = ExecutionCoordinator::new(ctx.clone(), pool);
        (ctx, coordinator)
    }

    fn pair() -> PairOrder {
        PairOrder {
            market_slug: "btc-updown-15m-1000".into(),
            symbol: "BTC".into(),
            yes_token: "tok-yes".into(),
            no_token: "tok-no".into(),
            yes_price: 42,
            no_price: 52,
            shares: 10,
            detected_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_both_legs_filled_updates_ledger() {
        let (ctx, coordinator) = setup(Arc::new(SimOrderClient::new()));

        let result = coordinator.execute_pair(pair()).await;
        assert_eq!(result, PairResult::BothFilled);

        let position = ctx.ledger.get("btc-updown-15m-1000").unwrap();
        assert_eq!(position.yes_shares, 10);
        assert_eq!(position.no_shares, 10);
        assert_eq!(position.total_cost(), 940);
        assert_eq!(position.guaranteed_profit_cents(), 60);
        assert_eq!(Stats::get(&ctx.stats.orders_filled), 2);
        assert_eq!(Stats::get(&ctx.stats.unwinds), 0);
    }

    #[tokio::test]
    async fn test_one_leg_filled_triggers_single_fok_unwind() {
        let client = Arc::new(ScriptedClient::new(vec![
            (
                ("tok-yes", Side::Buy),
                OrderOutcome::Filled {
                    order_id: Some("a".to_string()),
                },
            ),
            (
                ("tok-no", Side::Buy),
                OrderOutcome::Rejected {
                    reason: "no liquidity".to_string(),
                },
            ),
            (
                ("tok-yes", Side::Sell),
                OrderOutcome::Filled {
                    order_id: Some("b".to_string()),
                },
            ),
        ]));
        let (ctx, coordinator) = setup(client.clone());
        ctx.books
            .update(&"tok-yes".into(), vec![Level { price: 39, size: 50.0 }], vec![]);

        let result = coordinator.execute_pair(pair()).await;
        assert_eq!(result, PairResult::Unwound(Outcome::Yes));

        // Ledger restored exactly to its pre-attempt state
        let position = ctx.ledger.get("btc-updown-15m-1000").unwrap();
        assert_eq!(position, Position { fill_count: 1, ..Position::default() });

        // Exactly one sell, FOK, at the best bid
        let sells: Vec<_> = client
            .requests()
            .into_iter()
            .filter(|r| r.side == Side::Sell)
            .collect();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].tif, TimeInForce::Fok);
        assert_eq!(sells[0].price, 39);
        assert_eq!(sells[0].shares, 10);
        assert_eq!(Stats::get(&ctx.stats.unwinds), 1);
        assert_eq!(Stats::get(&ctx.stats.residual_exposures), 0);
    }

    #[tokio::test]
    async fn test_failed_unwind_flags_residual_exposure_without_retry() {
        let client = Arc::new(ScriptedClient::new(vec![
            (
                ("tok-no", Side::Buy),
                OrderOutcome::Filled {
                    order_id: Some("a".to_string()),
                },
            ),
            (
                ("tok-yes", Side::Buy),
                OrderOutcome::TransportError("timeout".to_string()),
            ),
            (
                ("tok-no", Side::Sell),
                OrderOutcome::Rejected {
                    reason: "FOK miss".to_string(),
                },
            ),
        ]));
        let (ctx, coordinator) = setup(client.clone());
        ctx.books
            .update(&"tok-no".into(), vec![Level { price: 48, size: 20.0 }], vec![]);

        let result = coordinator.execute_pair(pair()).await;
        assert_eq!(result, PairResult::ResidualExposure(Outcome::No));

        // One-sided position remains in the ledger, untouched by the miss
        let position = ctx.ledger.get("btc-updown-15m-1000").unwrap();
        assert_eq!(position.no_shares, 10);
        assert_eq!(position.yes_shares, 0);
        assert_eq!(Stats::get(&ctx.stats.residual_exposures), 1);

        // The failed FOK is not retried
        let sells = client
            .requests()
            .into_iter()
            .filter(|r| r.side == Side::Sell)
            .count();
        assert_eq!(sells, 1);
    }

    #[tokio::test]
    async fn test_no_fills_leaves_everything_untouched() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let (ctx, coordinator) = setup(client.clone());

        let result = coordinator.execute_pair(pair()).await;
        assert_eq!(result, PairResult::NoneFilled);
        assert_eq!(
            ctx.ledger.get("btc-updown-15m-1000").unwrap(),
            Position::default()
        );
        assert_eq!(Stats::get(&ctx.stats.orders_failed), 2);
        assert!(client.requests().iter().all(|r| r.side == Side::Buy));
    }

    #[tokio::test]
    async fn test_resting_leg_counts_as_unfilled() {
        let client = Arc::new(ScriptedClient::new(vec![
            (
                ("tok-yes", Side::Buy),
                OrderOutcome::Filled { order_id: None },
            ),
            (
                ("tok-no", Side::Buy),
                OrderOutcome::Resting {
                    order_id: Some("r".to_string()),
                },
            ),
            (
                ("tok-yes", Side::Sell),
                OrderOutcome::Filled { order_id: None },
            ),
        ]));
        let (_ctx, coordinator) = setup(client);
        let result = coordinator.execute_pair(pair()).await;
        assert_eq!(result, PairResult::Unwound(Outcome::Yes));
    }

    #[tokio::test]
    async fn test_stale_fill_after_rollover_mutates_nothing() {
        let (ctx, coordinator) = setup(Arc::new(SimOrderClient::new()));
        let stale = pair();

        // Window rolls while the pair is conceptually in flight
        apply_markets(
            &ctx,
            vec![Market {
                symbol: "BTC".into(),
                slug: "btc-updown-15m-1900".into(),
                yes_token: "y2".into(),
                no_token: "n2".into(),
                start_time: Some(1900),
            }],
        );

        let result = coordinator.execute_pair(stale).await;
        assert_eq!(result, PairResult::BothFilled);
        // New window's position is untouched, old window is gone
        assert_eq!(
            ctx.ledger.get("btc-updown-15m-1900").unwrap(),
            Position::default()
        );
        assert!(ctx.ledger.get("btc-updown-15m-1000").is_none());
    }
}
