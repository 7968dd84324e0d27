//! Atomic counters for observability. None of these gate trading decisions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    /// Feed connection currently streaming
    pub connected: AtomicBool,
    pub wss_messages: AtomicU64,
    pub wss_reconnects: AtomicU64,
    /// Malformed inbound frames dropped (never fatal)
    pub malformed_frames: AtomicU64,
    pub opportunities: AtomicU64,
    pub orders_sent: AtomicU64,
    pub orders_filled: AtomicU64,
    pub orders_failed: AtomicU64,
    pub unwinds: AtomicU64,
    /// One-sided positions left after a failed compensating unwind
    pub residual_exposures: AtomicU64,
    /// Total spend on confirmed fills, in cents
    pub total_spent_cents: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
