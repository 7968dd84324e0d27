//! Database schema creation.

use rusqlite::{Connection, Result};

/// Create tables and indexes if they do not exist.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS markets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT UNIQUE NOT NULL,
            symbol TEXT NOT NULL,
            yes_token TEXT NOT NULL,
            no_token TEXT NOT NULL,
            start_time INTEGER,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            price REAL NOT NULL,
            shares REAL NOT NULL,
            cost REAL NOT NULL,
            latency_ms REAL,
            clob_latency_ms REAL,
            combined_price REAL,
            profit REAL,
            order_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trades_time ON trades(timestamp DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
        [],
    )?;

    Ok(())
}
