//! The forwarding node: per-packet PIT/CS/FIB decisions.
//!
//! All forwarder state is explicit: a [`ForwarderState`] built at startup
//! (FIB, face table, tick clock, config generation) and one [`Shard`] per
//! worker owning a PIT/CS instance. Nothing here is global; every routine
//! takes its context as a parameter. Workers observe configuration
//! changes at frame boundaries through the generation counter.

use bytes::Bytes;
use log::{debug, trace};
use rust_ccnx_common::error::Error;
use rust_ccnx_common::hasher::hash_prefixes;
use rust_ccnx_common::metrics::ForwarderMetrics;
use rust_ccnx_common::packet::{encode_nak, parse_packet};
use rust_ccnx_common::tlv::{self, NakCode};

use crate::face::FaceDb;
use crate::fib::Fib;
use crate::params::{
    PIT_LIFETIME_DFLT_DFLT_MS, PIT_LIFETIME_DFLT_MAX_MS, PIT_LIFETIME_DFLT_MIN_MS,
};
use crate::pcs::{DataDisposition, InterestDisposition, PitCs};
use crate::ticks::TickClock;

/// Global forwarder state, shared across workers (read-mostly; management
/// mutates it and bumps the generation counter).
pub struct ForwarderState {
    pub fib: Fib,
    pub faces: FaceDb,
    pub clock: TickClock,
    /// Incremented on config changes; workers reload when they lag.
    pub cfg_generation: u64,

    pub pit_lifetime_min_ms: u64,
    pub pit_lifetime_dflt_ms: u64,
    pub pit_lifetime_max_ms: u64,

    /// Serve cache hits to peers.
    pub cs_serve: bool,
    /// Store passing content in the cache.
    pub cs_store: bool,
}

impl ForwarderState {
    pub fn new(fib: Fib, faces: FaceDb) -> Self {
        Self {
            fib,
            faces,
            clock: TickClock::new(),
            cfg_generation: 0,
            pit_lifetime_min_ms: PIT_LIFETIME_DFLT_MIN_MS,
            pit_lifetime_dflt_ms: PIT_LIFETIME_DFLT_DFLT_MS,
            pit_lifetime_max_ms: PIT_LIFETIME_DFLT_MAX_MS,
            cs_serve: true,
            cs_store: true,
        }
    }

    pub fn bump_generation(&mut self) {
        self.cfg_generation += 1;
    }

    /// Clamps a wire-carried interest lifetime into the configured bounds.
    fn clamp_lifetime(&self, wire_ms: Option<u64>) -> u64 {
        match wire_ms {
            Some(ms) => ms.clamp(self.pit_lifetime_min_ms, self.pit_lifetime_max_ms),
            None => self.pit_lifetime_dflt_ms,
        }
    }
}

/// Per-worker state: the PIT/CS shard plus counters and the worker's view
/// of the config generation.
pub struct Shard {
    pub worker: usize,
    pub pcs: PitCs,
    pub metrics: ForwarderMetrics,
    pub cfg_generation_seen: u64,
}

impl Shard {
    pub fn new(worker: usize, pcs: PitCs) -> Self {
        Self {
            worker,
            pcs,
            metrics: ForwarderMetrics::new(),
            cfg_generation_seen: 0,
        }
    }

    /// Called at frame boundaries; returns true when configuration moved
    /// and the worker should refresh any cached snapshot.
    pub fn observe_generation(&mut self, state: &ForwarderState) -> bool {
        if self.cfg_generation_seen != state.cfg_generation {
            self.cfg_generation_seen = state.cfg_generation;
            return true;
        }
        false
    }
}

/// The forwarding decision for one packet.
#[derive(Debug, PartialEq)]
pub enum Verdict {
    /// Send `pkt` out of each listed face.
    Forward { faces: Vec<u16>, pkt: Bytes },
    /// Reply to the requesting face (cache hit or NAK).
    Reply { face: u16, pkt: Bytes },
    /// Interest joined an existing PIT entry.
    Aggregated,
    /// Dropped without further action.
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    FaceDown,
    NoPit,
    Suppressed,
    HopLimit,
    NoRoute,
    Resources,
    UnknownType,
}

/// Processes one packet arriving on `rx_face`. `now_ms` comes from the
/// worker's monotonic clock.
pub fn process_packet(
    state: &mut ForwarderState,
    shard: &mut Shard,
    rx_face: u16,
    pkt: Bytes,
    now_ms: u64,
) -> Verdict {
    let parsed = match parse_packet(&pkt) {
        Ok(p) => p,
        Err(_) => {
            shard.metrics.malformed.increment();
            return Verdict::Drop(DropReason::Malformed);
        }
    };

    match state.faces.find_by_id(rx_face) {
        Ok(face) if face.is_up() => {}
        _ => {
            shard.metrics.face_down.increment();
            return Verdict::Drop(DropReason::FaceDown);
        }
    }

    match parsed.hdr.pkt_type {
        tlv::PKT_TYPE_INTEREST => process_interest(state, shard, rx_face, pkt, now_ms),
        tlv::PKT_TYPE_CONTENT => process_data(state, shard, rx_face, pkt, now_ms),
        tlv::PKT_TYPE_NAK => {
            shard.metrics.naks_received.increment();
            // NAKs terminate locally: flush the PIT entry without caching.
            process_nak(state, shard, rx_face, pkt, now_ms)
        }
        _ => {
            shard.metrics.malformed.increment();
            Verdict::Drop(DropReason::UnknownType)
        }
    }
}

fn process_interest(
    state: &mut ForwarderState,
    shard: &mut Shard,
    rx_face: u16,
    pkt: Bytes,
    now_ms: u64,
) -> Verdict {
    shard.metrics.interests_received.increment();
    if let Some(stats) = state.faces.stats_mut(shard.worker, rx_face) {
        stats.in_interests += 1;
    }

    let parsed = match parse_packet(&pkt) {
        Ok(p) => p,
        Err(_) => return Verdict::Drop(DropReason::Malformed),
    };

    if parsed.hdr.hop_limit == 0 {
        shard.metrics.hop_limit_exceeded.increment();
        return nak_reply(state, shard, rx_face, &pkt, NakCode::HopLimitExceeded);
    }

    let pfx = match hash_prefixes(parsed.name_slice(&pkt), true, 0) {
        Ok(pfx) => pfx,
        Err(_) => {
            shard.metrics.malformed.increment();
            return Verdict::Drop(DropReason::Malformed);
        }
    };

    let lifetime = state.clamp_lifetime(parsed.hop_time_ms(&pkt));

    // The PIT/CS answers first; routing only happens on a genuine miss.
    let fib = &state.fib;
    let faces = &state.faces;
    let disposition = shard.pcs.on_interest(
        pfx.full_key(),
        pfx.full_hash,
        rx_face,
        lifetime,
        now_ms,
        &state.clock,
        || {
            fib.lookup(&pfx)
                .ok()
                .and_then(|entry| {
                    entry.select_nh(|face| {
                        faces.find_by_id(face).map(|f| f.is_up()).unwrap_or(false)
                    })
                })
                .map(|nh| (nh.face, 0))
        },
    );
    shard.metrics.pit_size.set(shard.pcs.pit_count() as u64);
    shard.metrics.cs_size.set(shard.pcs.cs_count() as u64);

    match disposition {
        Ok(InterestDisposition::Forward(tx_face)) => {
            shard.metrics.pit_inserts.increment();
            shard.metrics.cs_misses.increment();
            shard.metrics.interests_forwarded.increment();
            if let Some(stats) = state.faces.stats_mut(shard.worker, tx_face) {
                stats.out_interests += 1;
            }
            // Forwarding consumes one hop.
            let mut out = bytes::BytesMut::from(&pkt[..]);
            out[4] = out[4].saturating_sub(1);
            Verdict::Forward {
                faces: vec![tx_face],
                pkt: out.freeze(),
            }
        }
        Ok(InterestDisposition::Aggregate) => {
            shard.metrics.pit_aggregated.increment();
            Verdict::Aggregated
        }
        Ok(InterestDisposition::Suppress) => {
            shard.metrics.pit_suppressed.increment();
            Verdict::Drop(DropReason::Suppressed)
        }
        Ok(InterestDisposition::ServeFromCache(cached)) => {
            shard.metrics.cs_hits.increment();
            if !state.cs_serve {
                // Cache disabled for serving: fall back to forwarding is
                // not possible without PIT state, so drop.
                return Verdict::Drop(DropReason::Suppressed);
            }
            if let Some(stats) = state.faces.stats_mut(shard.worker, rx_face) {
                stats.out_datas += 1;
                stats.orig_datas += 1;
            }
            trace!("cs hit served to face {}", rx_face);
            Verdict::Reply {
                face: rx_face,
                pkt: cached,
            }
        }
        Err(Error::NoRoute) => {
            shard.metrics.no_route.increment();
            nak_reply(state, shard, rx_face, &pkt, NakCode::NoRoute)
        }
        Err(Error::OutOfMemory) | Err(Error::CapacityExceeded(_)) => {
            nak_reply(state, shard, rx_face, &pkt, NakCode::ResourceExhausted)
        }
        Err(e) => {
            debug!("interest path error: {}", e);
            Verdict::Drop(DropReason::Malformed)
        }
    }
}

fn process_data(
    state: &mut ForwarderState,
    shard: &mut Shard,
    rx_face: u16,
    pkt: Bytes,
    now_ms: u64,
) -> Verdict {
    shard.metrics.data_received.increment();
    if let Some(stats) = state.faces.stats_mut(shard.worker, rx_face) {
        stats.in_datas += 1;
    }

    let parsed = match parse_packet(&pkt) {
        Ok(p) => p,
        Err(_) => return Verdict::Drop(DropReason::Malformed),
    };

    let pfx = match hash_prefixes(parsed.name_slice(&pkt), true, 0) {
        Ok(pfx) => pfx,
        Err(_) => {
            shard.metrics.malformed.increment();
            return Verdict::Drop(DropReason::Malformed);
        }
    };

    let cache_ttl = parsed
        .hop_time_ms(&pkt)
        .unwrap_or(crate::params::CS_LIFETIME_DFLT_MS)
        .clamp(
            crate::params::CS_LIFETIME_MIN_MS,
            crate::params::CS_LIFETIME_MAX_MS,
        );

    let disposition = shard.pcs.on_data(
        pfx.full_key(),
        pfx.full_hash,
        rx_face,
        pkt.clone(),
        cache_ttl,
        now_ms,
        &state.clock,
        state.cs_store,
    );
    shard.metrics.pit_size.set(shard.pcs.pit_count() as u64);
    shard.metrics.cs_size.set(shard.pcs.cs_count() as u64);

    match disposition {
        Ok(DataDisposition { rx_faces, stored }) => {
            if stored {
                shard.metrics.cs_inserts.increment();
            }
            shard.metrics.data_forwarded.increment();
            let faces: Vec<u16> = rx_faces
                .into_iter()
                .filter(|&f| {
                    state
                        .faces
                        .find_by_id(f)
                        .map(|face| face.is_up())
                        .unwrap_or(false)
                })
                .collect();
            for &f in &faces {
                if let Some(stats) = state.faces.stats_mut(shard.worker, f) {
                    stats.out_datas += 1;
                }
            }
            Verdict::Forward { faces, pkt }
        }
        Err(Error::NotFound) => {
            shard.metrics.no_pit.increment();
            Verdict::Drop(DropReason::NoPit)
        }
        Err(e) => {
            debug!("data path error: {}", e);
            Verdict::Drop(DropReason::NoPit)
        }
    }
}

/// NAKs flush the matching PIT entry to the waiting faces without
/// touching the CS.
fn process_nak(
    state: &mut ForwarderState,
    shard: &mut Shard,
    _rx_face: u16,
    pkt: Bytes,
    now_ms: u64,
) -> Verdict {
    let parsed = match parse_packet(&pkt) {
        Ok(p) => p,
        Err(_) => return Verdict::Drop(DropReason::Malformed),
    };
    let pfx = match hash_prefixes(parsed.name_slice(&pkt), true, 0) {
        Ok(pfx) => pfx,
        Err(_) => return Verdict::Drop(DropReason::Malformed),
    };

    // A NAK flushes the PIT entry but is never cached.
    let result = shard.pcs.on_data(
        pfx.full_key(),
        pfx.full_hash,
        0,
        pkt.clone(),
        0,
        now_ms,
        &state.clock,
        false,
    );

    match result {
        Ok(DataDisposition { rx_faces, .. }) => {
            let faces: Vec<u16> = rx_faces
                .into_iter()
                .filter(|&f| state.faces.find_by_id(f).map(|x| x.is_up()).unwrap_or(false))
                .collect();
            for &f in &faces {
                if let Some(stats) = state.faces.stats_mut(shard.worker, f) {
                    stats.out_naks += 1;
                }
            }
            Verdict::Forward { faces, pkt }
        }
        Err(_) => {
            shard.metrics.no_pit.increment();
            Verdict::Drop(DropReason::NoPit)
        }
    }
}

fn nak_reply(
    state: &mut ForwarderState,
    shard: &mut Shard,
    rx_face: u16,
    interest_pkt: &Bytes,
    code: NakCode,
) -> Verdict {
    match encode_nak(code, interest_pkt) {
        Ok(nak) => {
            shard.metrics.naks_sent.increment();
            if let Some(stats) = state.faces.stats_mut(shard.worker, rx_face) {
                stats.orig_naks += 1;
                stats.out_naks += 1;
            }
            Verdict::Reply {
                face: rx_face,
                pkt: nak,
            }
        }
        Err(_) => Verdict::Drop(DropReason::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ccnx_common::name::Name;
    use rust_ccnx_common::packet::{nak_code, ContentObject, Interest};

    fn setup(routes: &[(&str, u16)]) -> (ForwarderState, Shard) {
        let mut fib = Fib::new(64).unwrap();
        let mut faces = FaceDb::new(1);
        // Faces 1..=4 exist on distinct remote ports.
        for i in 0..4u16 {
            faces
                .add(
                    "127.0.0.1:9695".parse().unwrap(),
                    format!("127.0.0.1:{}", 41000 + i).parse().unwrap(),
                    false,
                )
                .unwrap();
        }
        for (uri, face) in routes {
            let name = Name::from_uri(uri).unwrap();
            let pfx = hash_prefixes(&name.to_component_bytes(), false, 0).unwrap();
            fib.insert_next_hop(&pfx, *face, 16).unwrap();
        }
        let state = ForwarderState::new(fib, faces);
        let shard = Shard::new(0, PitCs::new(256).unwrap());
        (state, shard)
    }

    fn interest_pkt(uri: &str, seg: u64) -> Bytes {
        Interest::new(Name::from_uri(uri).unwrap().with_segment(seg))
            .with_lifetime(2000)
            .encode()
    }

    fn content_pkt(uri: &str, seg: u64, payload: &'static [u8]) -> Bytes {
        ContentObject::new(Name::from_uri(uri).unwrap().with_segment(seg), payload)
            .with_cache_time(5000)
            .encode()
    }

    #[test]
    fn test_interest_forwarded_via_lpm() {
        let (mut state, mut shard) = setup(&[("/a", 1), ("/a/b", 2)]);

        let v = process_packet(&mut state, &mut shard, 3, interest_pkt("/a/b/c", 0), 0);
        match v {
            Verdict::Forward { faces, .. } => assert_eq!(faces, vec![2]),
            other => panic!("expected forward, got {:?}", other),
        }
        assert_eq!(shard.metrics.interests_forwarded.value(), 1);

        let v = process_packet(&mut state, &mut shard, 3, interest_pkt("/a/x", 0), 0);
        match v {
            Verdict::Forward { faces, .. } => assert_eq!(faces, vec![1]),
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_no_route_naks() {
        let (mut state, mut shard) = setup(&[("/a", 1)]);
        let v = process_packet(&mut state, &mut shard, 2, interest_pkt("/z", 0), 0);
        match v {
            Verdict::Reply { face, pkt } => {
                assert_eq!(face, 2);
                let parsed = parse_packet(&pkt).unwrap();
                assert_eq!(nak_code(&parsed), Some(NakCode::NoRoute));
            }
            other => panic!("expected NAK reply, got {:?}", other),
        }
        assert_eq!(shard.metrics.no_route.value(), 1);
    }

    #[test]
    fn test_aggregate_then_satisfy_flushes_all() {
        let (mut state, mut shard) = setup(&[("/a", 1)]);

        let v = process_packet(&mut state, &mut shard, 2, interest_pkt("/a/b", 0), 0);
        assert!(matches!(v, Verdict::Forward { .. }));
        let v = process_packet(&mut state, &mut shard, 3, interest_pkt("/a/b", 0), 5);
        assert_eq!(v, Verdict::Aggregated);
        assert_eq!(shard.pcs.pit_count(), 1);

        // Data flushes both pending faces and converts to CS.
        let v = process_packet(
            &mut state,
            &mut shard,
            1,
            content_pkt("/a/b", 0, b"\xaa\xbb\xcc"),
            10,
        );
        match v {
            Verdict::Forward { faces, .. } => {
                let mut f = faces;
                f.sort_unstable();
                assert_eq!(f, vec![2, 3]);
            }
            other => panic!("expected flush, got {:?}", other),
        }
        assert_eq!(shard.pcs.pit_count(), 0);
        assert_eq!(shard.pcs.cs_count(), 1);

        // The next interest is a cache hit carrying the same packet.
        let v = process_packet(&mut state, &mut shard, 2, interest_pkt("/a/b", 0), 20);
        match v {
            Verdict::Reply { face, pkt } => {
                assert_eq!(face, 2);
                let content = ContentObject::decode(&pkt).unwrap();
                assert_eq!(&content.payload[..], b"\xaa\xbb\xcc");
            }
            other => panic!("expected cache reply, got {:?}", other),
        }
        assert_eq!(shard.metrics.cs_hits.value(), 1);
    }

    #[test]
    fn test_data_without_pit_dropped() {
        let (mut state, mut shard) = setup(&[("/a", 1)]);
        let v = process_packet(
            &mut state,
            &mut shard,
            1,
            content_pkt("/a/b", 0, b"zz"),
            0,
        );
        assert_eq!(v, Verdict::Drop(DropReason::NoPit));
        assert_eq!(shard.metrics.no_pit.value(), 1);
    }

    #[test]
    fn test_down_face_rejects_traffic() {
        let (mut state, mut shard) = setup(&[("/a", 1)]);
        state
            .faces
            .flags_update(2, true, crate::face::FACE_FLAG_ADMIN_DOWN)
            .unwrap();
        let v = process_packet(&mut state, &mut shard, 2, interest_pkt("/a", 0), 0);
        assert_eq!(v, Verdict::Drop(DropReason::FaceDown));
    }

    #[test]
    fn test_nexthop_skips_down_face() {
        let (mut state, mut shard) = setup(&[("/a", 1), ("/a", 2)]);
        // Ensure face 2 (weight tie broken by order) still usable; take
        // face 1 down and verify traffic lands on 2.
        state
            .faces
            .flags_update(1, true, crate::face::FACE_FLAG_HELLO_DOWN)
            .unwrap();
        let v = process_packet(&mut state, &mut shard, 3, interest_pkt("/a/b", 0), 0);
        match v {
            Verdict::Forward { faces, .. } => assert_eq!(faces, vec![2]),
            other => panic!("expected forward via face 2, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_counted() {
        let (mut state, mut shard) = setup(&[]);
        let v = process_packet(&mut state, &mut shard, 1, Bytes::from_static(&[0; 4]), 0);
        assert_eq!(v, Verdict::Drop(DropReason::Malformed));
        assert_eq!(shard.metrics.malformed.value(), 1);
    }

    #[test]
    fn test_generation_observation() {
        let (mut state, mut shard) = setup(&[]);
        assert!(!shard.observe_generation(&state));
        state.bump_generation();
        assert!(shard.observe_generation(&state));
        assert!(!shard.observe_generation(&state));
    }
}
