//! Throughput estimation, pluggable at consumer construction.
//!
//! Two variants: a batched EWMA over received bytes, and a TCP-alike
//! estimate derived from the congestion window and smoothed RTT. Both
//! feed a single observer hook so applications can sample throughput.

use std::time::Instant;

/// Receives rate samples as they are produced.
pub trait RateObserver: Send {
    /// `rate` is in bits per second.
    fn notify_rate(&mut self, rate: f64);

    /// Called once when a download completes, with the total duration in
    /// milliseconds.
    fn notify_download_time(&mut self, _ms: f64) {}
}

/// The estimator interface the transport drives.
pub trait RateEstimator: Send {
    fn on_start(&mut self);
    fn on_rtt_update(&mut self, _rtt_us: u64) {}
    fn on_data_received(&mut self, _packet_size: usize) {}
    fn on_window_increase(&mut self, _window: f64) {}
    fn on_window_decrease(&mut self, _window: f64) {}
    fn on_download_finished(&mut self);
    fn set_observer(&mut self, observer: Box<dyn RateObserver>);
}

/* ---------------------------------------------------------------- *\
 * Simple batched EWMA
\* ---------------------------------------------------------------- */

pub struct SimpleEstimator {
    alpha: f64,
    batching: usize,
    rate: f64,
    bytes_in_batch: usize,
    packets_in_batch: usize,
    batch_start: Instant,
    download_start: Instant,
    observer: Option<Box<dyn RateObserver>>,
}

impl SimpleEstimator {
    pub fn new(alpha: f64, batching: usize) -> Self {
        Self {
            alpha,
            batching: batching.max(1),
            rate: 0.0,
            bytes_in_batch: 0,
            packets_in_batch: 0,
            batch_start: Instant::now(),
            download_start: Instant::now(),
            observer: None,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl RateEstimator for SimpleEstimator {
    fn on_start(&mut self) {
        self.bytes_in_batch = 0;
        self.packets_in_batch = 0;
        self.batch_start = Instant::now();
        self.download_start = Instant::now();
    }

    fn on_data_received(&mut self, packet_size: usize) {
        self.bytes_in_batch += packet_size;
        self.packets_in_batch += 1;
        if self.packets_in_batch < self.batching {
            return;
        }
        let dt = self.batch_start.elapsed().as_secs_f64();
        if dt > 0.0 {
            let sample = (self.bytes_in_batch as f64 * 8.0) / dt;
            self.rate = if self.rate == 0.0 {
                sample
            } else {
                (1.0 - self.alpha) * self.rate + self.alpha * sample
            };
            if let Some(observer) = self.observer.as_mut() {
                observer.notify_rate(self.rate);
            }
        }
        self.bytes_in_batch = 0;
        self.packets_in_batch = 0;
        self.batch_start = Instant::now();
    }

    fn on_download_finished(&mut self) {
        let ms = self.download_start.elapsed().as_secs_f64() * 1000.0;
        if let Some(observer) = self.observer.as_mut() {
            observer.notify_download_time(ms);
        }
    }

    fn set_observer(&mut self, observer: Box<dyn RateObserver>) {
        self.observer = Some(observer);
    }
}

/* ---------------------------------------------------------------- *\
 * TCP-alike: rate ~ cwnd / SRTT
\* ---------------------------------------------------------------- */

pub struct ALaTcpEstimator {
    window: f64,
    srtt_us: f64,
    segment_size: usize,
    download_start: Instant,
    observer: Option<Box<dyn RateObserver>>,
}

impl ALaTcpEstimator {
    pub fn new(segment_size: usize) -> Self {
        Self {
            window: 0.0,
            srtt_us: 0.0,
            segment_size,
            download_start: Instant::now(),
            observer: None,
        }
    }

    fn publish(&mut self) {
        if self.srtt_us <= 0.0 || self.window <= 0.0 {
            return;
        }
        let per_second = 1_000_000.0 / self.srtt_us;
        let rate = self.window * self.segment_size as f64 * 8.0 * per_second;
        if let Some(observer) = self.observer.as_mut() {
            observer.notify_rate(rate);
        }
    }
}

impl RateEstimator for ALaTcpEstimator {
    fn on_start(&mut self) {
        self.download_start = Instant::now();
    }

    fn on_rtt_update(&mut self, rtt_us: u64) {
        // Light smoothing keeps the published rate from jittering.
        let r = rtt_us as f64;
        self.srtt_us = if self.srtt_us == 0.0 {
            r
        } else {
            0.875 * self.srtt_us + 0.125 * r
        };
        self.publish();
    }

    fn on_window_increase(&mut self, window: f64) {
        self.window = window;
    }

    fn on_window_decrease(&mut self, window: f64) {
        self.window = window;
        self.publish();
    }

    fn on_download_finished(&mut self) {
        let ms = self.download_start.elapsed().as_secs_f64() * 1000.0;
        if let Some(observer) = self.observer.as_mut() {
            observer.notify_download_time(ms);
        }
    }

    fn set_observer(&mut self, observer: Box<dyn RateObserver>) {
        self.observer = Some(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Capture {
        rates: Arc<Mutex<Vec<f64>>>,
        finished: Arc<Mutex<Vec<f64>>>,
    }

    impl RateObserver for Capture {
        fn notify_rate(&mut self, rate: f64) {
            self.rates.lock().unwrap().push(rate);
        }
        fn notify_download_time(&mut self, ms: f64) {
            self.finished.lock().unwrap().push(ms);
        }
    }

    #[test]
    fn test_simple_estimator_batches() {
        let rates = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut est = SimpleEstimator::new(0.8, 3);
        est.set_observer(Box::new(Capture {
            rates: rates.clone(),
            finished: finished.clone(),
        }));

        est.on_start();
        est.on_data_received(1500);
        est.on_data_received(1500);
        assert!(rates.lock().unwrap().is_empty(), "no sample mid-batch");
        est.on_data_received(1500);
        assert_eq!(rates.lock().unwrap().len(), 1);
        assert!(est.rate() > 0.0);

        est.on_download_finished();
        assert_eq!(finished.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tcp_alike_needs_window_and_rtt() {
        let rates = Arc::new(Mutex::new(Vec::new()));
        let mut est = ALaTcpEstimator::new(1500);
        est.set_observer(Box::new(Capture {
            rates: rates.clone(),
            finished: Default::default(),
        }));

        est.on_start();
        est.on_rtt_update(20_000);
        assert!(rates.lock().unwrap().is_empty(), "window still zero");

        est.on_window_increase(10.0);
        est.on_rtt_update(20_000);
        let observed = rates.lock().unwrap();
        assert_eq!(observed.len(), 1);
        // 10 segments of 1500B per 20 ms ~ 6 Mbit/s.
        let expect = 10.0 * 1500.0 * 8.0 * (1_000_000.0 / 20_000.0);
        assert!((observed[0] - expect).abs() / expect < 0.01);
    }
}
