//! RAAQM window rules: per-path drop probability with autotuning.
//!
//! Replaces the vanilla window behavior of the fetch pipeline. Every
//! delivered object updates its path's RTT statistics; the drop
//! probability positions itself inside the observed RTT window, and a
//! uniform draw against it decides multiplicative decrease. When
//! autotuning is on, the `(beta, drop)` pair adapts to the worst
//! propagation delay across live paths (wired / wifi / lte bands).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::raaqm_config::RaaqmConfig;
use crate::raaqm_path::RaaqmDataPath;
use crate::rate::{ALaTcpEstimator, RateEstimator, SimpleEstimator};
use crate::vegas::{ContentInfo, TransportOptions, WindowRules};

/// Path id seeded at construction; unseen labels clone its parameters.
pub const DEFAULT_PATH_ID: u8 = 0;

/// Segment size assumed by the TCP-alike estimator.
const RATE_SEGMENT_SIZE: usize = 1500;

pub struct RaaqmRules {
    config: RaaqmConfig,

    /// Current decrease factor and drop target, possibly autotuned.
    beta: f64,
    drop_factor: f64,

    paths: HashMap<u8, RaaqmDataPath>,
    cur_path: u8,

    avg_rtt_us: f64,
    rng: SmallRng,
    pub rate_estimator: Box<dyn RateEstimator>,
}

impl RaaqmRules {
    pub fn new(config: RaaqmConfig) -> Self {
        let rate_estimator: Box<dyn RateEstimator> = if config.rate_estimator == 1 {
            Box::new(ALaTcpEstimator::new(RATE_SEGMENT_SIZE))
        } else {
            Box::new(SimpleEstimator::new(config.alpha, config.batching_parameter))
        };

        let default_path = RaaqmDataPath::new(
            config.drop,
            config.minimum_drop_probability,
            Duration::from_millis(config.lifetime_ms),
            config.sample_number,
        );
        let mut paths = HashMap::new();
        paths.insert(DEFAULT_PATH_ID, default_path);

        Self {
            beta: config.beta,
            drop_factor: config.drop,
            config,
            paths,
            cur_path: DEFAULT_PATH_ID,
            avg_rtt_us: 0.0,
            rng: SmallRng::from_entropy(),
            rate_estimator,
        }
    }

    /// Applies transport-level settings the config file carries.
    pub fn apply_to_options(&self, opts: &mut TransportOptions) {
        opts.interest_lifetime_ms = self.config.lifetime_ms;
        opts.max_retransmissions = self.config.retransmissions;
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn current_beta(&self) -> f64 {
        self.beta
    }

    pub fn current_drop_factor(&self) -> f64 {
        self.drop_factor
    }

    /// Multiplicative decrease: `w <- max(w * beta, w_min)`.
    pub fn decrease(&mut self, window: &mut f64, opts: &TransportOptions) {
        if *window > opts.window_min {
            *window = (*window * self.beta).max(opts.window_min);
        }
        self.rate_estimator.on_window_decrease(*window);
    }

    /// Additive increase: `w <- w + gamma / w`, bounded.
    fn increase(&mut self, window: &mut f64, opts: &TransportOptions) {
        if *window < opts.window_max {
            *window += self.config.gamma / *window;
        }
        self.rate_estimator.on_window_increase(*window);
    }

    fn update_path_table(&mut self, info: &ContentInfo) {
        if !self.paths.contains_key(&info.path_label) {
            let seeded = self
                .paths
                .get(&DEFAULT_PATH_ID)
                .expect("default path always present")
                .clone_parameters();
            debug!("raaqm: new path label {}", info.path_label);
            self.paths.insert(info.path_label, seeded);
        }
        self.cur_path = info.path_label;
        if let Some(path) = self.paths.get_mut(&info.path_label) {
            path.update_received_stats(info.packet_size, info.data_size);
        }
    }

    fn update_rtt(&mut self, info: &ContentInfo) {
        let rtt = match info.rtt {
            Some(rtt) => rtt,
            None => return,
        };
        let rtt_us = rtt.as_micros() as u64;
        self.rate_estimator.on_rtt_update(rtt_us);

        let new_delay = if let Some(path) = self.paths.get_mut(&self.cur_path) {
            path.insert_new_rtt(rtt_us, info.now);
            path.take_new_propagation_delay()
        } else {
            false
        };

        self.avg_rtt_us = self.avg_rtt_us * 0.99 + rtt_us as f64 * 0.01;

        if new_delay {
            self.check_drop_probability(info.now);
        }
    }

    /// Autotune: pick `(beta, drop)` from the worst propagation delay
    /// across non-stale paths, and push the new target into every path.
    fn check_drop_probability(&mut self, now: Instant) {
        if !self.config.autotune {
            return;
        }
        let mut max_pd = 0u64;
        for path in self.paths.values() {
            let pd = path.propagation_delay_us();
            if pd != u64::MAX && pd > max_pd && !path.is_stale(now) {
                max_pd = pd;
            }
        }

        let (drop_factor, beta) = if max_pd < self.config.wifi_delay_us {
            // Only wired paths.
            (self.config.drop, self.config.beta)
        } else if max_pd < self.config.lte_delay_us {
            // At least one wifi path.
            (self.config.drop_wifi, self.config.beta_wifi)
        } else {
            // At least one lte path.
            (self.config.drop_lte, self.config.beta_lte)
        };

        if drop_factor == self.drop_factor && beta == self.beta {
            return;
        }
        info!(
            "raaqm tuning: beta {} drop {} (max pd {} us)",
            beta, drop_factor, max_pd
        );
        self.beta = beta;
        self.drop_factor = drop_factor;
        for path in self.paths.values_mut() {
            path.set_drop_prob(drop_factor);
        }
    }

    fn check_for_stale_paths(&mut self, now: Instant) {
        if !self.config.autotune {
            return;
        }
        let any_stale = self.paths.values().any(|p| p.is_stale(now));
        if any_stale {
            self.check_drop_probability(now);
        }
    }

    /// The RAAQM step: refresh the current path's drop probability, then
    /// draw against it.
    fn raaqm_step(&mut self, window: &mut f64, opts: &TransportOptions) {
        let drop_prob = match self.paths.get_mut(&self.cur_path) {
            Some(path) => {
                path.update_drop_prob();
                path.drop_prob()
            }
            None => return,
        };
        if self.rng.gen::<f64>() <= drop_prob {
            self.decrease(window, opts);
        }
    }
}

impl WindowRules for RaaqmRules {
    fn on_content(&mut self, window: &mut f64, opts: &TransportOptions, info: &ContentInfo) {
        self.update_path_table(info);
        self.increase(window, opts);
        self.update_rtt(info);
        self.rate_estimator.on_data_received(info.packet_size);
        self.raaqm_step(window, opts);
    }

    fn on_timeout(&mut self, window: &mut f64, opts: &TransportOptions, now: Instant) {
        // Stale paths may shift the autotune band before the decrease.
        self.check_for_stale_paths(now);
        self.decrease(window, opts);
    }

    /// RAAQM pins the interest lifetime from its configuration instead of
    /// chasing the RTO.
    fn update_interest_lifetime(&self) -> bool {
        false
    }

    fn fast_retransmit_enabled(&self) -> bool {
        false
    }

    fn on_start(&mut self) {
        self.rate_estimator.on_start();
    }

    fn on_download_finished(&mut self) {
        self.rate_estimator.on_download_finished();
    }
}
