//! PIT/CS: pending-interest state and the content cache, one table.
//!
//! A single hashtable holds both kinds of entry, discriminated by a tag;
//! every accessor checks the tag first. The shared header (timestamps,
//! flags) lives outside the variant. CS entries are threaded on an
//! intrusive doubly-linked LRU expressed as hashtable node indices, with
//! index 0 as the null link.
//!
//! Expiry has two mechanisms: an exact per-entry expiry time checked
//! opportunistically on every lookup, and a compressed 16-bit tick expiry
//! in the row entry that drives periodic bulk sweeps.

use bytes::Bytes;
use log::trace;
use rust_ccnx_common::error::{Error, Result};

use crate::hashtable::{Hashtable, ENTRY_FLAG_FAST_TIMEOUT};
use crate::params::{CS_LRU_DEFAULT, PIT_ENTRY_PHOPS_MAX};
use crate::ticks::TickClock;

/* ---------------------------------------------------------------- *\
 * Entries
\* ---------------------------------------------------------------- */

/// PIT side of the union: where the interest went, who is waiting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PitData {
    pub tx_face: u16,
    /// Previous hops whose interests were aggregated, in arrival order.
    pub rx_faces: [u16; PIT_ENTRY_PHOPS_MAX],
    pub rx_count: u8,
    /// Bitmap of FIB next hops already tried.
    pub tx_face_map: u16,
    /// FIB node that routed this interest.
    pub fib_node: u32,
}

impl PitData {
    pub fn rx_faces(&self) -> &[u16] {
        &self.rx_faces[..self.rx_count as usize]
    }

    fn has_rx(&self, face: u16) -> bool {
        self.rx_faces().contains(&face)
    }

    fn add_rx(&mut self, face: u16) -> Result<()> {
        if self.rx_count as usize >= PIT_ENTRY_PHOPS_MAX {
            return Err(Error::CapacityExceeded(format!(
                "interest aggregation limit {}",
                PIT_ENTRY_PHOPS_MAX
            )));
        }
        self.rx_faces[self.rx_count as usize] = face;
        self.rx_count += 1;
        Ok(())
    }
}

/// CS side of the union: the cached packet and the LRU links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsData {
    pub rx_face: u16,
    pub pkt: Bytes,
    lru_prev: u32,
    lru_next: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum PcsVariant {
    #[default]
    None,
    Pit(PitData),
    Cs(CsData),
}

/// Combined PIT/CS entry, embedded in a hashtable node.
#[derive(Debug, Clone, Default)]
pub struct PcsEntry {
    pub create_ms: u64,
    pub expire_ms: u64,
    pub entry_flags: u8,
    variant: PcsVariant,
}

impl PcsEntry {
    pub fn is_pit(&self) -> bool {
        matches!(self.variant, PcsVariant::Pit(_))
    }

    pub fn is_cs(&self) -> bool {
        matches!(self.variant, PcsVariant::Cs(_))
    }

    pub fn pit(&self) -> Option<&PitData> {
        match &self.variant {
            PcsVariant::Pit(p) => Some(p),
            _ => None,
        }
    }

    pub fn cs(&self) -> Option<&CsData> {
        match &self.variant {
            PcsVariant::Cs(c) => Some(c),
            _ => None,
        }
    }

    fn pit_mut(&mut self) -> Option<&mut PitData> {
        match &mut self.variant {
            PcsVariant::Pit(p) => Some(p),
            _ => None,
        }
    }

    fn cs_mut(&mut self) -> Option<&mut CsData> {
        match &mut self.variant {
            PcsVariant::Cs(c) => Some(c),
            _ => None,
        }
    }
}

/* ---------------------------------------------------------------- *\
 * Dispositions
\* ---------------------------------------------------------------- */

/// What the caller should do with an arriving interest.
#[derive(Debug, Clone, PartialEq)]
pub enum InterestDisposition {
    /// New PIT entry; send the interest upstream out of this face.
    Forward(u16),
    /// Joined an existing PIT entry; do not forward.
    Aggregate,
    /// Same face asked again while pending; drop.
    Suppress,
    /// Cache hit; reply with the stored packet.
    ServeFromCache(Bytes),
}

/// What the caller should do with arriving data: flush it to the faces
/// that were waiting.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDisposition {
    pub rx_faces: Vec<u16>,
    /// Whether the object was retained in the CS.
    pub stored: bool,
}

/* ---------------------------------------------------------------- *\
 * PitCs
\* ---------------------------------------------------------------- */

pub struct PitCs {
    table: Hashtable<PcsEntry>,
    pit_count: u32,
    cs_count: u32,
    lru_max: u32,
    lru_count: u32,
    lru_head: u32,
    lru_tail: u32,
}

impl PitCs {
    pub fn new(capacity: u32) -> Result<Self> {
        Ok(Self {
            table: Hashtable::new(capacity, 0)?,
            pit_count: 0,
            cs_count: 0,
            lru_max: CS_LRU_DEFAULT,
            lru_count: 0,
            lru_head: 0,
            lru_tail: 0,
        })
    }

    /// Caps the CS; 0 disables caching entirely.
    pub fn set_lru_max(&mut self, limit: u32) {
        self.lru_max = limit;
    }

    pub fn pit_count(&self) -> u32 {
        self.pit_count
    }

    pub fn cs_count(&self) -> u32 {
        self.cs_count
    }

    pub fn lru_count(&self) -> u32 {
        self.lru_count
    }

    pub fn cs_enabled(&self) -> bool {
        self.lru_max > 0
    }

    /* ------------------------------------------------------------ *
     * Interest path
     * ------------------------------------------------------------ */

    /// Runs the per-name state machine for an arriving interest.
    ///
    /// `key`/`hash` are the whole-name key bytes and hash; `lifetime_ms`
    /// has already been clamped by the caller. The PIT/CS is consulted
    /// before any routing: `resolve_tx` is only invoked on a genuine
    /// miss, returning the egress face and FIB anchor for the new PIT
    /// entry, or `None` for no route (no state is created then).
    #[allow(clippy::too_many_arguments)]
    pub fn on_interest(
        &mut self,
        key: &[u8],
        hash: u64,
        rx_face: u16,
        lifetime_ms: u64,
        now_ms: u64,
        clock: &TickClock,
        resolve_tx: impl FnOnce() -> Option<(u16, u32)>,
    ) -> Result<InterestDisposition> {
        if let Ok(node) = self.table.lookup(key, hash) {
            let entry = self.table.data(node);
            if now_ms >= entry.expire_ms {
                // Expired in place; collect it and fall through to a miss.
                let expired_cs = entry.is_cs();
                self.delete_node(node, false)?;
                if expired_cs {
                    trace!("pcs: expired CS entry on interest path");
                }
            } else if entry.is_cs() {
                self.lru_update_head(node);
                let pkt = self
                    .table
                    .data(node)
                    .cs()
                    .map(|cs| cs.pkt.clone())
                    .ok_or_else(|| Error::Corruption("CS tag without CS data".into()))?;
                return Ok(InterestDisposition::ServeFromCache(pkt));
            } else {
                let expire_ms = now_ms + lifetime_ms;
                let entry = self.table.data_mut(node);
                let pit = entry
                    .pit_mut()
                    .ok_or_else(|| Error::Corruption("PIT tag without PIT data".into()))?;
                if pit.has_rx(rx_face) {
                    return Ok(InterestDisposition::Suppress);
                }
                pit.add_rx(rx_face)?;
                // A later interest refreshes the entry lifetime.
                if expire_ms > entry.expire_ms {
                    entry.expire_ms = expire_ms;
                    self.table.set_expiration(
                        node,
                        clock.fast_expiry(lifetime_ms),
                        ENTRY_FLAG_FAST_TIMEOUT,
                    )?;
                }
                return Ok(InterestDisposition::Aggregate);
            }
        }

        // Miss: route, then create a PIT entry.
        let (tx_face, fib_node) = resolve_tx().ok_or(Error::NoRoute)?;
        let node = self.table.alloc_node()?;
        if let Err(e) = self.table.init_node(node, hash, key) {
            self.table.free_node(node);
            return Err(e);
        }
        {
            let entry = self.table.data_mut(node);
            entry.create_ms = now_ms;
            entry.expire_ms = now_ms + lifetime_ms;
            let mut pit = PitData {
                tx_face,
                fib_node,
                ..Default::default()
            };
            pit.add_rx(rx_face)?;
            entry.variant = PcsVariant::Pit(pit);
        }
        if let Err(e) = self.table.insert(node) {
            self.table.free_node(node);
            return Err(e);
        }
        self.pit_count += 1;
        self.table
            .set_expiration(node, clock.fast_expiry(lifetime_ms), ENTRY_FLAG_FAST_TIMEOUT)?;
        Ok(InterestDisposition::Forward(tx_face))
    }

    /* ------------------------------------------------------------ *
     * Data path
     * ------------------------------------------------------------ */

    /// Matches arriving data against the PIT. On a hit the entry flips to
    /// a CS entry (or is dropped when caching is off or `store` is
    /// false), and every aggregated requestor is released to the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn on_data(
        &mut self,
        key: &[u8],
        hash: u64,
        rx_face: u16,
        pkt: Bytes,
        cache_ttl_ms: u64,
        now_ms: u64,
        clock: &TickClock,
        store: bool,
    ) -> Result<DataDisposition> {
        let node = self.table.lookup(key, hash).map_err(|_| Error::NotFound)?;
        let entry = self.table.data(node);

        if !entry.is_pit() {
            // Duplicate data for something already cached.
            return Err(Error::Duplicate("data already in CS".into()));
        }
        if now_ms >= entry.expire_ms {
            self.delete_node(node, false)?;
            return Err(Error::NotFound);
        }

        let rx_faces = entry
            .pit()
            .map(|p| p.rx_faces().to_vec())
            .unwrap_or_default();

        if !store || !self.cs_enabled() {
            self.delete_node(node, false)?;
            return Ok(DataDisposition {
                rx_faces,
                stored: false,
            });
        }

        // PIT -> CS conversion in place.
        {
            let entry = self.table.data_mut(node);
            entry.create_ms = now_ms;
            entry.expire_ms = now_ms + cache_ttl_ms;
            entry.variant = PcsVariant::Cs(CsData {
                rx_face,
                pkt,
                lru_prev: 0,
                lru_next: 0,
            });
        }
        self.pit_count -= 1;
        self.cs_count += 1;
        self.lru_insert(node);
        self.table
            .set_expiration(node, clock.slow_expiry(cache_ttl_ms), 0)?;

        // Bound the cache.
        if self.lru_count > self.lru_max {
            let excess = self.lru_count - self.lru_max;
            let trimmed = self.lru_trim(excess as usize);
            for victim in trimmed {
                self.delete_trimmed(victim)?;
            }
        }

        self.check_lru_invariants();
        Ok(DataDisposition {
            rx_faces,
            stored: true,
        })
    }

    /* ------------------------------------------------------------ *
     * LRU
     * ------------------------------------------------------------ */

    fn cs_links(&self, node: u32) -> (u32, u32) {
        let cs = self.table.data(node).cs().expect("node not on the LRU");
        (cs.lru_prev, cs.lru_next)
    }

    fn set_prev(&mut self, node: u32, prev: u32) {
        if let Some(cs) = self.table.data_mut(node).cs_mut() {
            cs.lru_prev = prev;
        }
    }

    fn set_next(&mut self, node: u32, next: u32) {
        if let Some(cs) = self.table.data_mut(node).cs_mut() {
            cs.lru_next = next;
        }
    }

    /// Inserts a CS node at the head of the LRU.
    fn lru_insert(&mut self, node: u32) {
        if self.lru_head != 0 {
            debug_assert_eq!(self.cs_links(self.lru_head).0, 0);
            self.set_prev(self.lru_head, node);
            self.set_prev(node, 0);
            self.set_next(node, self.lru_head);
            self.lru_head = node;
        } else {
            debug_assert_eq!(self.lru_tail, 0);
            self.lru_head = node;
            self.lru_tail = node;
            self.set_prev(node, 0);
            self.set_next(node, 0);
        }
        self.lru_count += 1;
    }

    /// Detaches a CS node from wherever it sits in the LRU.
    fn lru_dequeue(&mut self, node: u32) {
        let (prev, next) = self.cs_links(node);
        if prev != 0 {
            self.set_next(prev, next);
        } else {
            debug_assert_eq!(self.lru_head, node);
            self.lru_head = next;
        }
        if next != 0 {
            self.set_prev(next, prev);
        } else {
            debug_assert_eq!(self.lru_tail, node);
            self.lru_tail = prev;
        }
        self.lru_count -= 1;
    }

    /// Moves a CS node to the head after a hit.
    fn lru_update_head(&mut self, node: u32) {
        let (prev, _) = self.cs_links(node);
        if prev != 0 {
            self.lru_dequeue(node);
            self.lru_insert(node);
        } else {
            debug_assert_eq!(self.lru_head, node);
        }
    }

    /// Detaches the `count` tail-most CS nodes in O(count), returning
    /// their node indices. The caller deletes them with
    /// [`delete_trimmed`](Self::delete_trimmed), which skips the (already
    /// done) LRU unlink.
    pub fn lru_trim(&mut self, count: usize) -> Vec<u32> {
        let mut victims = Vec::with_capacity(count);
        let mut idx = self.lru_tail;
        for _ in 0..count {
            if idx == 0 {
                break;
            }
            victims.push(idx);
            idx = self.cs_links(idx).0;
        }
        self.lru_count -= victims.len() as u32;
        self.lru_tail = idx;
        if idx != 0 {
            self.set_next(idx, 0);
        } else {
            // Emptied the whole list.
            self.lru_head = 0;
        }
        victims
    }

    /* ------------------------------------------------------------ *
     * Deletion and expiry
     * ------------------------------------------------------------ */

    /// Deletes an entry, maintaining the counters. `trimmed` marks nodes
    /// already detached from the LRU by [`lru_trim`](Self::lru_trim).
    fn delete_node(&mut self, node: u32, trimmed: bool) -> Result<()> {
        let entry = self.table.data(node);
        if entry.is_pit() {
            self.pit_count -= 1;
        } else if entry.is_cs() {
            self.cs_count -= 1;
            if !trimmed {
                self.lru_dequeue(node);
            }
        }
        self.table.delete(node)
    }

    /// Deletes a node that a bulk trim already took off the LRU.
    pub fn delete_trimmed(&mut self, node: u32) -> Result<()> {
        self.delete_node(node, true)
    }

    /// Explicitly removes one name, e.g. from management.
    pub fn remove(&mut self, key: &[u8], hash: u64) -> Result<()> {
        let node = self.table.lookup(key, hash)?;
        self.delete_node(node, false)
    }

    /// Bulk expiry sweep over the compressed per-entry tick expiries.
    /// Returns `(pit_expired, cs_expired)`.
    pub fn expire_sweep(&mut self, clock: &TickClock) -> (u32, u32) {
        let mut pit_expired = 0;
        let mut cs_expired = 0;
        for node in self.table.expired_nodes(clock) {
            let entry = self.table.data(node);
            if entry.is_pit() {
                pit_expired += 1;
            } else {
                cs_expired += 1;
            }
            let _ = self.delete_node(node, false);
        }
        self.check_lru_invariants();
        (pit_expired, cs_expired)
    }

    /// Debug-build check of the structural invariants tying the counters
    /// to the LRU chain.
    fn check_lru_invariants(&self) {
        #[cfg(debug_assertions)]
        {
            debug_assert_eq!(self.lru_count, self.cs_count);
            debug_assert_eq!(self.lru_head == 0, self.lru_tail == 0);
            debug_assert_eq!(self.lru_head == 0, self.lru_count == 0);
        }
    }

    /// Walks the LRU from the head; test and diagnostics helper.
    pub fn lru_from_head(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut idx = self.lru_head;
        while idx != 0 {
            out.push(idx);
            idx = self.cs_links(idx).1;
        }
        out
    }

    /// Walks the LRU from the tail; test and diagnostics helper.
    pub fn lru_from_tail(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut idx = self.lru_tail;
        while idx != 0 {
            out.push(idx);
            idx = self.cs_links(idx).0;
        }
        out
    }
}
