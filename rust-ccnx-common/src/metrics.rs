//! Metrics collection for the forwarder and transports.

use std::sync::atomic::{AtomicU64, Ordering};

/* ---------------------------------------------------------------- *
 * Simple Counter
 * ---------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        let c = Counter::new();
        c.value.store(self.value(), Ordering::Relaxed);
        c
    }
}

/* ---------------------------------------------------------------- *
 * Gauge
 * ---------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        let g = Gauge::new();
        g.value.store(self.value(), Ordering::Relaxed);
        g
    }
}

/* ---------------------------------------------------------------- *
 * Aggregate forwarder metrics
 * ---------------------------------------------------------------- */

/// The forwarder's public stat counters. Data-plane errors never crash:
/// they land here and the packet is dropped.
#[derive(Debug, Default, Clone)]
pub struct ForwarderMetrics {
    // Packet processing
    pub interests_received: Counter,
    pub data_received: Counter,
    pub naks_received: Counter,
    pub interests_forwarded: Counter,
    pub data_forwarded: Counter,
    pub naks_sent: Counter,

    // PIT outcomes
    pub pit_inserts: Counter,
    pub pit_aggregated: Counter,
    pub pit_suppressed: Counter,
    pub pit_expired: Counter,
    pub no_pit: Counter,

    // CS outcomes
    pub cs_hits: Counter,
    pub cs_misses: Counter,
    pub cs_inserts: Counter,
    pub cs_evictions: Counter,
    pub cs_expired: Counter,

    // Drops
    pub no_route: Counter,
    pub malformed: Counter,
    pub face_down: Counter,
    pub hop_limit_exceeded: Counter,

    // Sizes
    pub pit_size: Gauge,
    pub cs_size: Gauge,
    pub fib_size: Gauge,
}

impl ForwarderMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
