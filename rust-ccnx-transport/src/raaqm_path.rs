//! Per-path RTT statistics and drop probability for RAAQM.
//!
//! Content objects carry a path label identifying the downstream path
//! that delivered them; each label gets one of these. The drop
//! probability tracks where the current RTT sits between the min and max
//! observed over a sliding window of samples.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RaaqmDataPath {
    drop_factor: f64,
    minimum_drop_probability: f64,
    /// Staleness horizon: no samples for this long marks the path stale.
    timer: Duration,
    samples: usize,

    rtt_us: u64,
    rtt_min_us: u64,
    rtt_max_us: u64,
    rtt_samples: VecDeque<u64>,

    /// Minimum RTT ever seen on this path: the propagation-delay estimate.
    prop_delay_us: u64,
    prop_delay_changed: bool,

    drop_prob: f64,

    last_received: Instant,
    received_bytes: u64,
    received_packets: u64,
}

impl RaaqmDataPath {
    pub fn new(
        drop_factor: f64,
        minimum_drop_probability: f64,
        timer: Duration,
        samples: usize,
    ) -> Self {
        Self {
            drop_factor,
            minimum_drop_probability,
            timer,
            samples: samples.max(1),
            rtt_us: 0,
            rtt_min_us: u64::MAX,
            rtt_max_us: 0,
            rtt_samples: VecDeque::new(),
            prop_delay_us: u64::MAX,
            prop_delay_changed: false,
            drop_prob: 0.0,
            last_received: Instant::now(),
            received_bytes: 0,
            received_packets: 0,
        }
    }

    /// Clones parameters (not statistics) from another path; new paths
    /// seed from the default path this way.
    pub fn clone_parameters(&self) -> Self {
        Self::new(
            self.drop_factor,
            self.minimum_drop_probability,
            self.timer,
            self.samples,
        )
    }

    /// Records one RTT sample, maintaining the sliding min/max window and
    /// the propagation-delay floor.
    pub fn insert_new_rtt(&mut self, rtt_us: u64, now: Instant) {
        self.rtt_us = rtt_us;
        self.last_received = now;

        self.rtt_samples.push_back(rtt_us);
        while self.rtt_samples.len() > self.samples {
            self.rtt_samples.pop_front();
        }
        self.rtt_min_us = self.rtt_samples.iter().copied().min().unwrap_or(rtt_us);
        self.rtt_max_us = self.rtt_samples.iter().copied().max().unwrap_or(rtt_us);

        if rtt_us < self.prop_delay_us {
            self.prop_delay_us = rtt_us;
            self.prop_delay_changed = true;
        }
    }

    /// Records packet/byte counts for rate bookkeeping.
    pub fn update_received_stats(&mut self, packet_size: usize, data_size: usize) {
        self.received_bytes += (packet_size + data_size) as u64;
        self.received_packets += 1;
    }

    /// True once per propagation-delay improvement; consuming resets it.
    pub fn take_new_propagation_delay(&mut self) -> bool {
        std::mem::replace(&mut self.prop_delay_changed, false)
    }

    pub fn propagation_delay_us(&self) -> u64 {
        self.prop_delay_us
    }

    /// A path with no samples for one timer interval is stale; stale
    /// paths are excluded from autotuning until they speak again.
    pub fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_received) > self.timer
    }

    pub fn rtt_us(&self) -> u64 {
        self.rtt_us
    }

    pub fn rtt_min_us(&self) -> u64 {
        self.rtt_min_us
    }

    pub fn rtt_max_us(&self) -> u64 {
        self.rtt_max_us
    }

    pub fn drop_prob(&self) -> f64 {
        self.drop_prob
    }

    pub fn set_drop_prob(&mut self, drop_prob: f64) {
        self.drop_prob = drop_prob;
    }

    /// The RAAQM update: position the drop probability by where the
    /// latest RTT sits in the observed [min, max] window.
    pub fn update_drop_prob(&mut self) {
        if self.rtt_max_us == self.rtt_min_us {
            self.drop_prob = self.minimum_drop_probability;
            return;
        }
        let excursion = (self.rtt_us - self.rtt_min_us) as f64
            / (self.rtt_max_us - self.rtt_min_us) as f64;
        self.drop_prob = self.minimum_drop_probability + self.drop_factor * excursion;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> RaaqmDataPath {
        RaaqmDataPath::new(0.2, 0.00001, Duration::from_millis(1000), 30)
    }

    #[test]
    fn test_window_min_max() {
        let mut p = path();
        let now = Instant::now();
        for rtt in [50_000u64, 10_000, 90_000, 30_000] {
            p.insert_new_rtt(rtt, now);
        }
        assert_eq!(p.rtt_min_us(), 10_000);
        assert_eq!(p.rtt_max_us(), 90_000);
        assert_eq!(p.rtt_us(), 30_000);
    }

    #[test]
    fn test_window_slides() {
        let mut p = RaaqmDataPath::new(0.2, 0.00001, Duration::from_millis(1000), 3);
        let now = Instant::now();
        for rtt in [100u64, 1, 50, 60, 70] {
            p.insert_new_rtt(rtt, now);
        }
        // Only the last three samples count for min/max.
        assert_eq!(p.rtt_min_us(), 50);
        assert_eq!(p.rtt_max_us(), 70);
        // The propagation delay floor remembers the best ever.
        assert_eq!(p.propagation_delay_us(), 1);
    }

    #[test]
    fn test_drop_prob_tracks_excursion() {
        let mut p = path();
        let now = Instant::now();
        p.insert_new_rtt(10_000, now);
        p.insert_new_rtt(90_000, now);

        // Latest sample at the max: full drop factor applies.
        p.update_drop_prob();
        assert!((p.drop_prob() - (0.00001 + 0.2)).abs() < 1e-9);

        // Latest at the min: probability collapses to the floor.
        p.insert_new_rtt(10_000, now);
        p.update_drop_prob();
        assert!((p.drop_prob() - (0.00001 + 0.0)).abs() < 1e-9);
    }

    #[test]
    fn test_flat_window_uses_floor() {
        let mut p = path();
        let now = Instant::now();
        p.insert_new_rtt(42_000, now);
        p.update_drop_prob();
        assert!((p.drop_prob() - 0.00001).abs() < 1e-12);
    }

    #[test]
    fn test_propagation_delay_flag() {
        let mut p = path();
        let now = Instant::now();
        p.insert_new_rtt(50_000, now);
        assert!(p.take_new_propagation_delay());
        assert!(!p.take_new_propagation_delay());
        p.insert_new_rtt(60_000, now);
        assert!(!p.take_new_propagation_delay());
        p.insert_new_rtt(40_000, now);
        assert!(p.take_new_propagation_delay());
    }

    #[test]
    fn test_staleness() {
        let mut p = RaaqmDataPath::new(0.2, 0.00001, Duration::from_millis(10), 30);
        let t0 = Instant::now();
        p.insert_new_rtt(1000, t0);
        assert!(!p.is_stale(t0));
        assert!(p.is_stale(t0 + Duration::from_millis(50)));
    }
}
