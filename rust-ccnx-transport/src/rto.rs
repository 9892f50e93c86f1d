//! Retransmission timeout estimator.
//!
//! Jacobson/Karn smoothing per RFC 6298: `SRTT = (1-a)*SRTT + a*R`,
//! `RTTVAR = (1-b)*RTTVAR + b*|SRTT - R|`, `RTO = SRTT + K*RTTVAR`, with
//! the first sample seeding `SRTT = R`, `RTTVAR = R/2`.

use std::time::Duration;

const ALPHA: f64 = 1.0 / 8.0;
const BETA: f64 = 1.0 / 4.0;
const K: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct RtoEstimator {
    smoothed_rtt: f64,
    rtt_variation: f64,
    first_measurement: bool,
    min_rto: Duration,
}

impl RtoEstimator {
    pub fn new(min_rto: Duration) -> Self {
        Self {
            smoothed_rtt: 0.0,
            rtt_variation: 0.0,
            first_measurement: true,
            min_rto,
        }
    }

    /// The RTO to use before any sample has arrived.
    pub fn initial_rtt() -> Duration {
        Duration::from_secs(1)
    }

    pub fn add_measurement(&mut self, measure: Duration) {
        let r = measure.as_micros() as f64;
        if self.first_measurement {
            self.smoothed_rtt = r;
            self.rtt_variation = r / 2.0;
            self.first_measurement = false;
        } else {
            self.rtt_variation =
                (1.0 - BETA) * self.rtt_variation + BETA * (self.smoothed_rtt - r).abs();
            self.smoothed_rtt = (1.0 - ALPHA) * self.smoothed_rtt + ALPHA * r;
        }
    }

    pub fn smoothed_rtt(&self) -> Duration {
        Duration::from_micros(self.smoothed_rtt as u64)
    }

    pub fn compute_rto(&self) -> Duration {
        if self.first_measurement {
            return Self::initial_rtt().max(self.min_rto);
        }
        let rto = Duration::from_micros((self.smoothed_rtt + K * self.rtt_variation) as u64);
        rto.max(self.min_rto)
    }
}

impl Default for RtoEstimator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
