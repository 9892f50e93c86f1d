//! RAAQM configuration file loader.
//!
//! Plain text, one directive per line, tokens whitespace-separated with
//! an optional `=` between key and value; lines starting with `;` are
//! comments. Unknown directives are skipped. Conflicting directives are
//! last-writer-wins, in file order. Missing keys keep their defaults.

use std::fs;
use std::path::Path;

use log::debug;
use rust_ccnx_common::error::Result;

/// Conventional location of the consumer configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ccnx/consumer.conf";

#[derive(Debug, Clone, PartialEq)]
pub struct RaaqmConfig {
    pub autotune: bool,
    pub lifetime_ms: u64,
    pub retransmissions: u32,
    pub beta: f64,
    pub drop: f64,
    pub beta_wifi: f64,
    pub drop_wifi: f64,
    pub beta_lte: f64,
    pub drop_lte: f64,
    /// Propagation-delay thresholds, microseconds.
    pub wifi_delay_us: u64,
    pub lte_delay_us: u64,
    /// Rate-estimation EWMA weight.
    pub alpha: f64,
    pub batching_parameter: usize,
    /// 0 selects the batched EWMA estimator, 1 the TCP-alike one.
    pub rate_estimator: u32,

    pub gamma: f64,
    pub sample_number: usize,
    pub minimum_drop_probability: f64,
}

impl Default for RaaqmConfig {
    fn default() -> Self {
        Self {
            autotune: false,
            lifetime_ms: 1000,
            retransmissions: 128,
            beta: 0.8,
            drop: 0.2,
            beta_wifi: 0.8,
            drop_wifi: 0.2,
            beta_lte: 0.8,
            drop_lte: 0.2,
            wifi_delay_us: 1000,
            lte_delay_us: 15_000,
            alpha: 0.8,
            batching_parameter: 40,
            rate_estimator: 0,
            gamma: 1.0,
            sample_number: 30,
            minimum_drop_probability: 0.00001,
        }
    }
}

impl RaaqmConfig {
    /// Loads from a file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) => {
                debug!("raaqm config {} not read ({}), using defaults", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut cfg = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let key = match tokens.next() {
                Some(k) => k,
                None => continue,
            };
            // Accept both `key value` and `key = value`.
            let mut value = tokens.next();
            if value == Some("=") {
                value = tokens.next();
            }
            let value = match value {
                Some(v) => v,
                None => continue,
            };

            match key {
                "autotune" => cfg.autotune = value == "yes",
                "lifetime" => set(&mut cfg.lifetime_ms, value),
                "retransmissions" => set(&mut cfg.retransmissions, value),
                "beta" => set(&mut cfg.beta, value),
                "drop" => set(&mut cfg.drop, value),
                "beta_wifi" => set(&mut cfg.beta_wifi, value),
                "drop_wifi" => set(&mut cfg.drop_wifi, value),
                "beta_lte" => set(&mut cfg.beta_lte, value),
                "drop_lte" => set(&mut cfg.drop_lte, value),
                "wifi_delay" => set(&mut cfg.wifi_delay_us, value),
                "lte_delay" => set(&mut cfg.lte_delay_us, value),
                "alpha" => set(&mut cfg.alpha, value),
                "batching_parameter" => set(&mut cfg.batching_parameter, value),
                "rate_estimator" => set(&mut cfg.rate_estimator, value),
                other => debug!("raaqm config: unknown directive '{}'", other),
            }
        }
        cfg
    }
}

fn set<T: std::str::FromStr>(slot: &mut T, value: &str) {
    if let Ok(parsed) = value.parse::<T>() {
        *slot = parsed;
    } else {
        debug!("raaqm config: unparseable value '{}'", value);
    }
}
