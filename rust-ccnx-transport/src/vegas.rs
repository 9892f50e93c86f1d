//! Pipelined segment fetcher with fast retransmit ("vanilla" window rules).
//!
//! The protocol is a state machine: the event loop (or a test harness)
//! feeds it content arrivals and timeouts, and it emits interests through
//! a [`PortalSink`]. Window behavior is pluggable through [`WindowRules`],
//! which is how the RAAQM overlay replaces the vanilla rules without
//! duplicating the fetch pipeline.

use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, warn};
use rust_ccnx_common::error::{Error, Result};
use rust_ccnx_common::name::Name;
use rust_ccnx_common::packet::{ContentObject, Interest};
use rust_ccnx_common::tlv::PayloadType;

use crate::rto::RtoEstimator;

/// Default reassembly ring size; a power of two.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 17;
/// A gap with this many later segments already received triggers a fast
/// retransmission.
pub const DEFAULT_OOO_THRESHOLD: u32 = 3;
pub const DEFAULT_MAX_RETX: u32 = 128;
pub const DEFAULT_INTEREST_LIFETIME_MS: u64 = 1000;
pub const MIN_WINDOW: f64 = 1.0;
pub const MAX_WINDOW: f64 = 128_000.0;

/// Where outgoing interests go. The real implementation queues them on
/// the portal; tests record them.
pub trait PortalSink {
    fn send_interest(&mut self, interest: Interest);
    /// The download finished or aborted; the event loop should wind down.
    fn stop_loop(&mut self);
}

/// Consumer callback slots. Each is separately nullable; a `None` slot is
/// a no-op.
#[derive(Default)]
pub struct ConsumerCallbacks {
    /// Reassembled payload delivery: `(bytes, complete)`.
    pub on_payload_retrieved: Option<Box<dyn FnMut(&[u8], bool) + Send>>,
    pub on_interest_output: Option<Box<dyn FnMut(&Interest) + Send>>,
    pub on_interest_retransmission: Option<Box<dyn FnMut(&Interest) + Send>>,
    pub on_interest_satisfied: Option<Box<dyn FnMut(&Interest) + Send>>,
    pub on_interest_timeout: Option<Box<dyn FnMut(&Name) + Send>>,
    pub on_content_object_input: Option<Box<dyn FnMut(&ContentObject) + Send>>,
    /// Content verification; returning false discards the object.
    pub on_content_to_verify: Option<Box<dyn FnMut(&ContentObject) -> bool + Send>>,
    /// Manifest handling, for manifest-typed payloads.
    pub on_manifest: Option<Box<dyn FnMut(&ContentObject) + Send>>,
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub window_min: f64,
    pub window_max: f64,
    pub initial_window: f64,
    pub max_retransmissions: u32,
    pub interest_lifetime_ms: u64,
    /// Reassembly ring size; must be a power of two and exceed
    /// `window_max`.
    pub buffer_size: usize,
    pub ooo_threshold: u32,
    /// Deliver the contiguous prefix when the retransmission budget runs
    /// out mid-download.
    pub partial_on_failure: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            window_min: MIN_WINDOW,
            window_max: MAX_WINDOW,
            initial_window: MIN_WINDOW,
            max_retransmissions: DEFAULT_MAX_RETX,
            interest_lifetime_ms: DEFAULT_INTEREST_LIFETIME_MS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            ooo_threshold: DEFAULT_OOO_THRESHOLD,
            partial_on_failure: true,
        }
    }
}

impl TransportOptions {
    fn validate(&self) -> Result<()> {
        if !self.buffer_size.is_power_of_two() {
            return Err(Error::InvalidArgument(
                "reassembly buffer size must be a power of two".into(),
            ));
        }
        if self.window_max > (self.buffer_size - 1) as f64 {
            return Err(Error::InvalidArgument(format!(
                "window_max {} must stay below buffer_size {}",
                self.window_max, self.buffer_size
            )));
        }
        if self.window_min < 1.0 || self.initial_window < self.window_min {
            return Err(Error::InvalidArgument("bad window bounds".into()));
        }
        Ok(())
    }
}

/// What the window rules get to see about one delivered object.
pub struct ContentInfo {
    pub segment: u64,
    pub rtt: Option<Duration>,
    pub path_label: u8,
    pub packet_size: usize,
    pub data_size: usize,
    pub now: Instant,
}

/// The congestion-control surface the fetch pipeline calls into.
pub trait WindowRules: Send {
    /// A fresh (non-retransmitted) object arrived.
    fn on_content(&mut self, window: &mut f64, opts: &TransportOptions, info: &ContentInfo);

    /// A segment timed out.
    fn on_timeout(&mut self, window: &mut f64, opts: &TransportOptions, now: Instant);

    /// Whether arrivals re-derive the interest lifetime from the RTO.
    fn update_interest_lifetime(&self) -> bool {
        true
    }

    fn fast_retransmit_enabled(&self) -> bool {
        true
    }

    fn on_start(&mut self) {}
    fn on_download_finished(&mut self) {}
}

/// The vanilla rules: additive increase by one, halve on loss.
#[derive(Debug, Default)]
pub struct VanillaRules;

impl WindowRules for VanillaRules {
    fn on_content(&mut self, window: &mut f64, opts: &TransportOptions, _info: &ContentInfo) {
        if *window < opts.window_max {
            *window += 1.0;
        }
    }

    fn on_timeout(&mut self, window: &mut f64, opts: &TransportOptions, _now: Instant) {
        if *window > opts.window_min {
            *window = (*window / 2.0).ceil().max(opts.window_min);
        }
    }
}

/* ---------------------------------------------------------------- *\
 * The fetch pipeline
\* ---------------------------------------------------------------- */

pub struct VegasTransport<S: PortalSink> {
    sink: S,
    opts: TransportOptions,
    pub callbacks: ConsumerCallbacks,
    rules: Box<dyn WindowRules>,

    prefix: Name,
    running: bool,
    delivered: bool,

    final_known: bool,
    final_segment: u64,
    next_segment: u64,
    in_flight: u64,
    window: f64,
    lifetime_ms: u64,

    retx_count: Vec<u32>,
    sent_at: Vec<Option<Instant>>,
    recv_buf: Vec<Option<ContentObject>>,

    received_segments: BTreeSet<u64>,
    fast_retransmitted: HashSet<u64>,

    last_reassembled: u64,
    content: Vec<u8>,

    rto: RtoEstimator,
}

impl<S: PortalSink> VegasTransport<S> {
    pub fn new(
        sink: S,
        opts: TransportOptions,
        rules: Box<dyn WindowRules>,
        callbacks: ConsumerCallbacks,
    ) -> Result<Self> {
        opts.validate()?;
        let buf = opts.buffer_size;
        let window = opts.initial_window;
        let lifetime_ms = opts.interest_lifetime_ms;
        Ok(Self {
            sink,
            opts,
            callbacks,
            rules,
            prefix: Name::new(),
            running: false,
            delivered: false,
            final_known: false,
            final_segment: u64::MAX,
            next_segment: 0,
            in_flight: 0,
            window,
            lifetime_ms,
            retx_count: vec![0; buf],
            sent_at: vec![None; buf],
            recv_buf: vec![None; buf],
            received_segments: BTreeSet::new(),
            fast_retransmitted: HashSet::new(),
            last_reassembled: 0,
            content: Vec::new(),
            rto: RtoEstimator::default(),
        })
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn rules_mut(&mut self) -> &mut dyn WindowRules {
        self.rules.as_mut()
    }

    /// The interest lifetime currently in force (retransmit timer).
    pub fn interest_lifetime_ms(&self) -> u64 {
        self.lifetime_ms
    }

    fn slot(&self, segment: u64) -> usize {
        (segment as usize) & (self.opts.buffer_size - 1)
    }

    /// Begins fetching sequentially numbered segments under `prefix`.
    pub fn start(&mut self, prefix: Name, now: Instant) {
        self.prefix = prefix.without_segment();
        self.running = true;
        self.delivered = false;
        self.final_known = false;
        self.final_segment = u64::MAX;
        self.next_segment = 0;
        self.in_flight = 0;
        self.window = self.opts.initial_window;
        self.lifetime_ms = self.opts.interest_lifetime_ms;
        self.retx_count.fill(0);
        self.sent_at.fill(None);
        self.recv_buf.fill(None);
        self.received_segments.clear();
        self.fast_retransmitted.clear();
        self.last_reassembled = 0;
        self.content.clear();
        self.rto = RtoEstimator::default();

        self.rules.on_start();
        self.schedule_next_interests(now);
    }

    /// Stops the download. Pending retransmit state is dropped and the
    /// payload callback will not fire.
    pub fn stop(&mut self) {
        self.running = false;
        self.sink.stop_loop();
    }

    fn send_interest(&mut self, segment: u64, now: Instant) {
        let name = self.prefix.with_segment(segment);
        let interest = Interest::new(name).with_lifetime(self.lifetime_ms);

        if let Some(cb) = self.callbacks.on_interest_output.as_mut() {
            cb(&interest);
        }
        if !self.running {
            return;
        }

        let slot = self.slot(segment);
        self.in_flight += 1;
        self.retx_count[slot] = 0;
        self.sent_at[slot] = Some(now);
        self.sink.send_interest(interest);
    }

    /// Fills the pipeline up to the current window.
    fn schedule_next_interests(&mut self, now: Instant) {
        while self.running && (self.in_flight as f64) < self.window {
            if self.final_known && self.next_segment > self.final_segment {
                break;
            }
            let segment = self.next_segment;
            self.next_segment += 1;
            self.send_interest(segment, now);
        }
    }

    /// Feeds one arriving content object into the pipeline.
    pub fn on_content(&mut self, content: ContentObject, now: Instant) {
        if !self.running {
            return;
        }
        let segment = match content.name.segment() {
            Some(s) => s,
            None => {
                warn!("content without a chunk component: {}", content.name);
                return;
            }
        };

        self.in_flight = self.in_flight.saturating_sub(1);
        let slot = self.slot(segment);
        let rtt = self.sent_at[slot].map(|t| now.duration_since(t));

        // Karn-free sampling as in the base protocol: every arrival feeds
        // the RTO used for the interest lifetime.
        if self.rules.update_interest_lifetime() {
            if let Some(rtt) = rtt {
                self.rto.add_measurement(rtt);
                self.lifetime_ms = self.rto.compute_rto().as_millis() as u64;
            }
        }

        if let Some(cb) = self.callbacks.on_content_object_input.as_mut() {
            cb(&content);
        }
        if let Some(cb) = self.callbacks.on_interest_satisfied.as_mut() {
            let interest = Interest::new(content.name.clone());
            cb(&interest);
        }

        if content.payload_type == PayloadType::Manifest {
            if let Some(cb) = self.callbacks.on_manifest.as_mut() {
                cb(&content);
            }
            self.schedule_next_interests(now);
            return;
        }

        if let Some(cb) = self.callbacks.on_content_to_verify.as_mut() {
            if !cb(&content) {
                debug!("segment {} failed verification, dropped", segment);
                self.schedule_next_interests(now);
                return;
            }
        }

        if self.rules.fast_retransmit_enabled() {
            self.check_fast_retransmit(segment, now);
        } else {
            self.received_segments.insert(segment);
        }

        // Only fresh deliveries drive the window.
        if self.retx_count[slot] == 0 {
            let info = ContentInfo {
                segment,
                rtt,
                path_label: content.path_label,
                packet_size: content.packet_size,
                data_size: content.payload.len(),
                now,
            };
            self.rules.on_content(&mut self.window, &self.opts, &info);
            self.window = self.window.clamp(self.opts.window_min, self.opts.window_max);
        }

        if let Some(final_chunk) = content.final_chunk {
            self.final_known = true;
            self.final_segment = final_chunk;
        }

        self.recv_buf[slot] = Some(content);
        self.reassemble();

        self.schedule_next_interests(now);
    }

    /// Feeds one interest timeout into the pipeline.
    pub fn on_timeout(&mut self, name: &Name, now: Instant) {
        if !self.running {
            return;
        }
        let segment = match name.segment() {
            Some(s) => s,
            None => return,
        };

        self.in_flight = self.in_flight.saturating_sub(1);

        if let Some(cb) = self.callbacks.on_interest_timeout.as_mut() {
            cb(name);
        }

        // Never chase segments past the end of the object.
        if self.final_known && segment > self.final_segment {
            return;
        }

        self.rules.on_timeout(&mut self.window, &self.opts, now);
        self.window = self.window.clamp(self.opts.window_min, self.opts.window_max);

        let slot = self.slot(segment);
        if self.retx_count[slot] < self.opts.max_retransmissions {
            let interest = Interest::new(name.clone()).with_lifetime(self.lifetime_ms);
            if let Some(cb) = self.callbacks.on_interest_retransmission.as_mut() {
                cb(&interest);
            }
            if let Some(cb) = self.callbacks.on_interest_output.as_mut() {
                cb(&interest);
            }
            if !self.running {
                return;
            }
            self.in_flight += 1;
            self.retx_count[slot] += 1;
            self.sink.send_interest(interest);
        } else {
            // Retransmission budget exhausted: the download failed.
            debug!("segment {} exhausted its retransmissions", segment);
            self.running = false;
            if self.opts.partial_on_failure && !self.delivered {
                self.delivered = true;
                if let Some(cb) = self.callbacks.on_payload_retrieved.as_mut() {
                    cb(&self.content, false);
                }
            }
            self.sink.stop_loop();
        }
    }

    /// Detects holes with `ooo_threshold` later arrivals and retransmits
    /// them once per detection.
    fn check_fast_retransmit(&mut self, segment: u64, now: Instant) {
        self.received_segments.insert(segment);
        self.fast_retransmitted.remove(&segment);

        let highest = match self.received_segments.iter().next_back() {
            Some(&h) => h,
            None => return,
        };
        let mut candidates = Vec::new();
        for missing in self.last_reassembled..highest {
            if self.received_segments.contains(&missing)
                || self.fast_retransmitted.contains(&missing)
            {
                continue;
            }
            let later = self
                .received_segments
                .range(missing + 1..=highest)
                .count() as u32;
            if later >= self.opts.ooo_threshold {
                candidates.push(missing);
            }
        }
        for missing in candidates {
            self.fast_retransmitted.insert(missing);
            self.fast_retransmit(missing, now);
        }
    }

    fn fast_retransmit(&mut self, segment: u64, now: Instant) {
        let slot = self.slot(segment);
        if self.retx_count[slot] >= self.opts.max_retransmissions {
            return;
        }
        let interest = Interest::new(self.prefix.with_segment(segment))
            .with_lifetime(self.lifetime_ms);
        if let Some(cb) = self.callbacks.on_interest_retransmission.as_mut() {
            cb(&interest);
        }
        if let Some(cb) = self.callbacks.on_interest_output.as_mut() {
            cb(&interest);
        }
        if !self.running {
            return;
        }
        debug!("fast retransmit of segment {} at {:?}", segment, now);
        self.in_flight += 1;
        self.retx_count[slot] += 1;
        self.sink.send_interest(interest);
    }

    /// Advances the in-order frontier, copying payloads out of the ring,
    /// and delivers the whole object once the final segment lands.
    fn reassemble(&mut self) {
        loop {
            let slot = self.slot(self.last_reassembled);
            let content = match self.recv_buf[slot].take() {
                Some(c) => c,
                None => break,
            };
            let segment = self.last_reassembled;
            self.content.extend_from_slice(&content.payload);
            self.last_reassembled += 1;

            if self.final_known && segment == self.final_segment {
                if !self.delivered {
                    self.delivered = true;
                    if let Some(cb) = self.callbacks.on_payload_retrieved.as_mut() {
                        cb(&self.content, true);
                    }
                }
                // Keep the window from speculative growth across reuse.
                if self.window > (self.final_segment + 1) as f64 {
                    self.window = ((self.final_segment + 1) as f64).max(self.opts.window_min);
                }
                self.rules.on_download_finished();
                self.running = false;
                self.sink.stop_loop();
                return;
            }
        }
    }

    /// The reassembled bytes so far (tests and partial-delivery paths).
    pub fn assembled(&self) -> &[u8] {
        &self.content
    }

    pub fn payload_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every interest; never stops anything by itself.
    #[derive(Default)]
    struct MockSink {
        sent: Vec<Interest>,
        stopped: bool,
    }

    impl PortalSink for MockSink {
        fn send_interest(&mut self, interest: Interest) {
            self.sent.push(interest);
        }
        fn stop_loop(&mut self) {
            self.stopped = true;
        }
    }

    fn opts(window: f64, max_retx: u32) -> TransportOptions {
        TransportOptions {
            window_min: 1.0,
            window_max: window.max(1.0),
            initial_window: window.max(1.0),
            max_retransmissions: max_retx,
            interest_lifetime_ms: 1000,
            buffer_size: 64,
            ooo_threshold: 3,
            partial_on_failure: true,
        }
    }

    fn transport(
        o: TransportOptions,
        callbacks: ConsumerCallbacks,
    ) -> VegasTransport<MockSink> {
        VegasTransport::new(MockSink::default(), o, Box::<VanillaRules>::default(), callbacks)
            .unwrap()
    }

    fn content(prefix: &Name, seg: u64, payload: &[u8], final_seg: Option<u64>) -> ContentObject {
        let mut c = ContentObject::new(
            prefix.with_segment(seg),
            Bytes::copy_from_slice(payload),
        );
        c.packet_size = payload.len() + 40;
        c.final_chunk = final_seg;
        c
    }

    fn sent_segments(t: &VegasTransport<MockSink>) -> Vec<u64> {
        t.sink.sent.iter().map(|i| i.name.segment().unwrap()).collect()
    }

    #[test]
    fn test_initial_window_fill() {
        let mut t = transport(opts(4.0, 2), ConsumerCallbacks::default());
        t.start(Name::from_uri("/video").unwrap(), Instant::now());
        assert_eq!(sent_segments(&t), vec![0, 1, 2, 3]);
        assert_eq!(t.in_flight(), 4);
    }

    #[test]
    fn test_in_order_reassembly_and_delivery() {
        let delivered: Arc<Mutex<Vec<(Vec<u8>, bool)>>> = Arc::default();
        let sink_copy = delivered.clone();
        let mut cb = ConsumerCallbacks::default();
        cb.on_payload_retrieved = Some(Box::new(move |bytes, complete| {
            sink_copy.lock().unwrap().push((bytes.to_vec(), complete));
        }));

        let prefix = Name::from_uri("/file").unwrap();
        let mut t = transport(opts(8.0, 2), cb);
        let now = Instant::now();
        t.start(prefix.clone(), now);

        for seg in 0..4u64 {
            let payload = vec![seg as u8; 3];
            t.on_content(content(&prefix, seg, &payload, Some(3)), now);
        }

        let got = delivered.lock().unwrap();
        assert_eq!(got.len(), 1, "delivered exactly once");
        let (bytes, complete) = &got[0];
        assert!(*complete);
        assert_eq!(bytes, &[0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3]);
        assert!(!t.is_running());
        assert!(t.sink.stopped);
    }

    #[test]
    fn test_out_of_order_permutation() {
        let delivered: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
        let sink_copy = delivered.clone();
        let mut cb = ConsumerCallbacks::default();
        cb.on_payload_retrieved = Some(Box::new(move |bytes, complete| {
            assert!(complete);
            sink_copy.lock().unwrap().push(bytes.to_vec());
        }));

        let prefix = Name::from_uri("/perm").unwrap();
        let mut t = transport(opts(8.0, 2), cb);
        let now = Instant::now();
        t.start(prefix.clone(), now);

        // Deliver 5 segments in a scrambled order.
        for seg in [2u64, 0, 4, 1, 3] {
            t.on_content(content(&prefix, seg, &[seg as u8], Some(4)), now);
        }

        let got = delivered.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_fast_retransmit_exactly_once() {
        // Window 8, threshold 3, budget 2. Receive 1,2,3,4 with 0
        // missing: one fast retransmission of segment 0 after the third
        // out-of-order arrival, and no second one.
        let prefix = Name::from_uri("/s4").unwrap();
        let mut t = transport(opts(8.0, 2), ConsumerCallbacks::default());
        let now = Instant::now();
        t.start(prefix.clone(), now);

        for seg in 1..=4u64 {
            t.on_content(content(&prefix, seg, &[0u8; 2], None), now);
        }

        let zeros = sent_segments(&t)
            .iter()
            .filter(|&&s| s == 0)
            .count();
        assert_eq!(zeros, 2, "initial send plus exactly one fast retransmit");
    }

    #[test]
    fn test_fast_retransmit_respects_budget() {
        let prefix = Name::from_uri("/budget").unwrap();
        let mut o = opts(8.0, 0); // no retransmissions allowed
        o.ooo_threshold = 3;
        let mut t = transport(o, ConsumerCallbacks::default());
        let now = Instant::now();
        t.start(prefix.clone(), now);

        for seg in 1..=4u64 {
            t.on_content(content(&prefix, seg, &[0u8; 2], None), now);
        }
        let zeros = sent_segments(&t).iter().filter(|&&s| s == 0).count();
        assert_eq!(zeros, 1, "budget zero: no fast retransmit");
    }

    #[test]
    fn test_timeout_retransmits_then_fails() {
        let delivered: Arc<Mutex<Vec<(usize, bool)>>> = Arc::default();
        let sink_copy = delivered.clone();
        let mut cb = ConsumerCallbacks::default();
        cb.on_payload_retrieved = Some(Box::new(move |bytes, complete| {
            sink_copy.lock().unwrap().push((bytes.len(), complete));
        }));

        let prefix = Name::from_uri("/t").unwrap();
        let mut t = transport(opts(2.0, 1), cb);
        let now = Instant::now();
        t.start(prefix.clone(), now);

        let name0 = prefix.with_segment(0);
        // First timeout: retransmitted.
        t.on_timeout(&name0, now);
        assert!(t.is_running());
        assert_eq!(sent_segments(&t).iter().filter(|&&s| s == 0).count(), 2);

        // Second timeout: budget exhausted, partial (empty) delivery.
        t.on_timeout(&name0, now);
        assert!(!t.is_running());
        assert!(t.sink.stopped);
        let got = delivered.lock().unwrap();
        assert_eq!(*got, vec![(0, false)]);
    }

    #[test]
    fn test_timeout_halves_window() {
        let prefix = Name::from_uri("/w").unwrap();
        let mut t = transport(opts(8.0, 5), ConsumerCallbacks::default());
        let now = Instant::now();
        t.start(prefix.clone(), now);
        assert_eq!(t.window(), 8.0);

        t.on_timeout(&prefix.with_segment(0), now);
        assert_eq!(t.window(), 4.0);
        t.on_timeout(&prefix.with_segment(1), now);
        assert_eq!(t.window(), 2.0);
        for seg in 2..6u64 {
            t.on_timeout(&prefix.with_segment(seg), now);
        }
        assert_eq!(t.window(), 1.0, "window floors at the minimum");
    }

    #[test]
    fn test_window_grows_on_fresh_content_only() {
        let prefix = Name::from_uri("/g").unwrap();
        let mut o = opts(4.0, 5);
        o.window_max = 16.0;
        let mut t = transport(o, ConsumerCallbacks::default());
        let now = Instant::now();
        t.start(prefix.clone(), now);

        t.on_content(content(&prefix, 0, b"x", None), now);
        assert_eq!(t.window(), 5.0);

        // A retransmitted segment must not grow the window.
        t.on_timeout(&prefix.with_segment(1), now); // window 3, retx of 1
        let w = t.window();
        t.on_content(content(&prefix, 1, b"x", None), now);
        assert_eq!(t.window(), w);
    }

    #[test]
    fn test_stop_suppresses_delivery() {
        let delivered: Arc<Mutex<u32>> = Arc::default();
        let sink_copy = delivered.clone();
        let mut cb = ConsumerCallbacks::default();
        cb.on_payload_retrieved = Some(Box::new(move |_, _| {
            *sink_copy.lock().unwrap() += 1;
        }));

        let prefix = Name::from_uri("/stop").unwrap();
        let mut t = transport(opts(4.0, 2), cb);
        let now = Instant::now();
        t.start(prefix.clone(), now);
        t.on_content(content(&prefix, 0, b"abc", Some(3)), now);

        t.stop();
        // Late arrivals after stop are ignored; nothing is delivered.
        for seg in 1..=3u64 {
            t.on_content(content(&prefix, seg, b"x", Some(3)), now);
        }
        assert_eq!(*delivered.lock().unwrap(), 0);
        assert!(t.sink.stopped);
    }

    #[test]
    fn test_no_interests_past_final_segment() {
        let prefix = Name::from_uri("/fin").unwrap();
        let mut t = transport(opts(4.0, 2), ConsumerCallbacks::default());
        let now = Instant::now();
        t.start(prefix.clone(), now);

        // Learn the final segment early: pipeline must not run past it.
        t.on_content(content(&prefix, 0, b"x", Some(5)), now);
        t.on_content(content(&prefix, 1, b"x", Some(5)), now);
        let max_sent = *sent_segments(&t).iter().max().unwrap();
        assert!(max_sent <= 5, "sent segment {} past final", max_sent);
    }

    #[test]
    fn test_rto_drives_interest_lifetime() {
        let prefix = Name::from_uri("/rto").unwrap();
        let mut t = transport(opts(2.0, 2), ConsumerCallbacks::default());
        let t0 = Instant::now();
        t.start(prefix.clone(), t0);

        // An arrival 100 ms after send seeds SRTT=100ms, RTO=300ms.
        let later = t0 + Duration::from_millis(100);
        t.on_content(content(&prefix, 0, b"x", None), later);
        assert_eq!(t.interest_lifetime_ms(), 300);
    }

    #[test]
    fn test_bad_options_rejected() {
        let mut o = TransportOptions::default();
        o.buffer_size = 100; // not a power of two
        assert!(VegasTransport::new(
            MockSink::default(),
            o,
            Box::<VanillaRules>::default(),
            ConsumerCallbacks::default()
        )
        .is_err());

        let mut o = TransportOptions::default();
        o.buffer_size = 64;
        o.window_max = 64.0; // must stay below buffer_size
        assert!(VegasTransport::new(
            MockSink::default(),
            o,
            Box::<VanillaRules>::default(),
            ConsumerCallbacks::default()
        )
        .is_err());
    }
}
