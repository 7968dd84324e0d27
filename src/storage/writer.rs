//! Non-blocking SQLite writer using a dedicated thread and mpsc channel.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{error, info, warn};

use super::schema::create_tables;
use super::types::{MarketRecord, TradeRecord};

/// Messages sent to the storage writer thread.
pub enum StorageMessage {
    /// Register a discovered market window
    NewMarket(MarketRecord),
    /// Record a confirmed fill or compensating unwind
    Trade(TradeRecord),
    /// Graceful shutdown: flush pending records and exit
    Shutdown,
}

/// Channel handle for sending storage messages (non-blocking, clonable).
#[derive(Clone)]
pub struct StorageChannel {
    tx: Sender<StorageMessage>,
}

impl StorageChannel {
    /// Record market metadata (once per market on discovery).
    pub fn record_market(&self, market: MarketRecord) {
        let _ = self.tx.send(StorageMessage::NewMarket(market));
    }

    /// Record a trade.
    pub fn record_trade(&self, trade: TradeRecord) {
        let _ = self.tx.send(StorageMessage::Trade(trade));
    }

    /// Request graceful shutdown; pending records are flushed first.
    pub fn shutdown(&self) {
        let _ = self.tx.send(StorageMessage::Shutdown);
    }
}

/// Handle to the writer thread, joined at shutdown so the final flush
/// completes before the process exits.
pub struct StorageHandle {
    handle: Option<JoinHandle<()>>,
}

impl StorageHandle {
    /// Wait for the writer thread to drain and exit.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Create a storage channel and spawn the writer thread.
pub fn create_storage_channel(db_path: &str) -> (StorageChannel, StorageHandle) {
    let (tx, rx) = mpsc::channel();
    let path = db_path.to_string();

    let handle = thread::spawn(move || {
        storage_writer_loop(rx, &path);
    });

    (
        StorageChannel { tx },
        StorageHandle {
            handle: Some(handle),
        },
    )
}

/// Channel with no writer thread behind it; sends are dropped.
pub(super) fn detached_channel() -> StorageChannel {
    let (tx, _rx) = mpsc::channel();
    StorageChannel { tx }
}

/// Main writer loop running in a dedicated thread.
fn storage_writer_loop(rx: Receiver<StorageMessage>, db_path: &str) {
    let conn = match Connection::open(db_path) {
        Ok(c) => c,
        Err(e) => {
            error!("[STORAGE] Failed to open database at {}: {}", db_path, e);
            return;
        }
    };

    if let Err(e) = create_tables(&conn) {
        error!("[STORAGE] Failed to create tables: {}", e);
        return;
    }

    info!("[STORAGE] Database initialized at {}", db_path);

    let mut batch: Vec<StorageMessage> = Vec::with_capacity(64);
    let batch_timeout = Duration::from_millis(100);

    loop {
        match rx.recv_timeout(batch_timeout) {
            Ok(StorageMessage::Shutdown) => {
                flush_batch(&conn, &mut batch);
                info!("[STORAGE] Writer shutdown complete");
                break;
            }
            Ok(msg) => {
                batch.push(msg);
                if batch.len() >= 64 {
                    flush_batch(&conn, &mut batch);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                flush_batch(&conn, &mut batch);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                flush_batch(&conn, &mut batch);
                info!("[STORAGE] Channel disconnected, writer exiting");
                break;
            }
        }
    }
}

/// Flush a batch of messages in a single transaction.
fn flush_batch(conn: &Connection, batch: &mut Vec<StorageMessage>) {
    if batch.is_empty() {
        return;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            error!("[STORAGE] Failed to start transaction: {}", e);
            batch.clear();
            return;
        }
    };

    let mut trade_count = 0;
    for msg in batch.drain(..) {
        match msg {
            StorageMessage::NewMarket(m) => insert_market(&tx, &m),
            StorageMessage::Trade(t) => {
                if insert_trade(&tx, &t) {
                    trade_count += 1;
                }
            }
            StorageMessage::Shutdown => {}
        }
    }

    if let Err(e) = tx.commit() {
        error!("[STORAGE] Failed to commit transaction: {}", e);
    } else if trade_count > 0 {
        info!("[STORAGE] Flushed {} trade records", trade_count);
    }
}

fn insert_market(conn: &Connection, market: &MarketRecord) {
    let now = chrono::Utc::now().timestamp();
    let result = conn.execute(
        "INSERT OR IGNORE INTO markets (slug, symbol, yes_token, no_token, start_time, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            market.slug,
            market.symbol,
            market.yes_token,
            market.no_token,
            market.start_time,
            now,
        ],
    );
    if let Err(e) = result {
        warn!("[STORAGE] Failed to insert market {}: {}", market.slug, e);
    }
}

fn insert_trade(conn: &Connection, trade: &TradeRecord) -> bool {
    let result = conn.execute(
        "INSERT INTO trades (timestamp, symbol, side, price, shares, cost, latency_ms, clob_latency_ms, combined_price, profit, order_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            trade.timestamp,
            trade.symbol,
            trade.side,
            trade.price,
            trade.shares as f64,
            trade.cost,
            trade.latency_ms,
            trade.exchange_latency_ms,
            trade.combined_price,
            trade.guaranteed_profit,
            trade.order_id,
        ],
    );
    match result {
        Ok(_) => true,
        Err(e) => {
            warn!("[STORAGE] Failed to insert trade: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, side: &str) -> TradeRecord {
        TradeRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            symbol: symbol.to_string(),
            side: side.to_string(),
            price: 0.42,
            shares: 10,
            cost: 4.20,
            latency_ms: 1.5,
            exchange_latency_ms: 80.0,
            combined_price: 0.94,
            guaranteed_profit: 0.60,
            order_id: Some("order-1".to_string()),
        }
    }

    #[test]
    fn test_writer_persists_and_flushes_on_shutdown() {
        let dir = std::env::temp_dir().join(format!("parity_arb_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("trades.db");
        let db_path_str = db_path.to_str().unwrap().to_string();

        let (channel, handle) = create_storage_channel(&db_path_str);
        channel.record_market(MarketRecord {
            slug: "btc-updown-15m-1000".to_string(),
            symbol: "BTC".to_string(),
            yes_token: "y".to_string(),
            no_token: "n".to_string(),
            start_time: Some(1000),
        });
        channel.record_trade(trade("BTC", "YES"));
        channel.record_trade(trade("BTC", "NO"));
        channel.shutdown();
        handle.join();

        let conn = Connection::open(&db_path_str).unwrap();
        let trades: i64 = conn
            .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))
            .unwrap();
        let markets: i64 = conn
            .query_row("SELECT COUNT(*) FROM markets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(trades, 2);
        assert_eq!(markets, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_detached_channel_drops_sends() {
        let channel = detached_channel();
        // Must not panic or block
        channel.record_trade(trade("BTC", "YES"));
        channel.shutdown();
    }
}
