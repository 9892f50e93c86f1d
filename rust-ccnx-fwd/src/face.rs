//! Face table: the forwarder's registry of logical ports.
//!
//! A fixed-capacity array indexed by a compact id (ids start at 1; 0 is
//! reserved). Mutations come from management; the data plane only reads.
//! Per-worker stats are written solely by their owning worker and summed
//! on demand.

use std::net::SocketAddr;

use rust_ccnx_common::error::{Error, Result};
use serde::Serialize;

use crate::params::FACES_MAX;

/// Face flags.
pub const FACE_FLAG_ADMIN_DOWN: u32 = 0x02;
pub const FACE_FLAG_HELLO_DOWN: u32 = 0x04;
pub const FACE_FLAG_DELETED: u32 = 0x08;

pub const FACE_FLAGS_DOWN_HARD: u32 = FACE_FLAG_ADMIN_DOWN | FACE_FLAG_DELETED;
pub const FACE_FLAGS_DOWN: u32 = FACE_FLAGS_DOWN_HARD | FACE_FLAG_HELLO_DOWN;

/// Per-face, per-worker packet counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FaceStats {
    pub orig_interests: u64,
    pub orig_datas: u64,
    pub orig_naks: u64,
    pub term_interests: u64,
    pub term_datas: u64,
    pub term_naks: u64,
    pub in_interests: u64,
    pub in_datas: u64,
    pub in_naks: u64,
    pub out_interests: u64,
    pub out_datas: u64,
    pub out_naks: u64,
}

impl FaceStats {
    fn merge(&mut self, other: &FaceStats) {
        self.orig_interests += other.orig_interests;
        self.orig_datas += other.orig_datas;
        self.orig_naks += other.orig_naks;
        self.term_interests += other.term_interests;
        self.term_datas += other.term_datas;
        self.term_naks += other.term_naks;
        self.in_interests += other.in_interests;
        self.in_datas += other.in_datas;
        self.in_naks += other.in_naks;
        self.out_interests += other.out_interests;
        self.out_datas += other.out_datas;
        self.out_naks += other.out_naks;
    }
}

#[derive(Debug, Clone)]
pub struct Face {
    pub id: u16,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    /// Owning interface index, when bound to one.
    pub swif: u32,
    pub flags: u32,
    /// Refcount of FIB next hops pointing at this face.
    pub fib_nh_refs: u32,
    /// True for faces created by a local application connection.
    pub app_face: bool,
}

impl Face {
    /// A face is up iff none of the DOWN flags are set.
    pub fn is_up(&self) -> bool {
        self.flags & FACE_FLAGS_DOWN == 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & FACE_FLAG_DELETED != 0
    }
}

pub struct FaceDb {
    entries: Vec<Option<Face>>,
    /// `stats[worker][face_id - 1]`.
    stats: Vec<Vec<FaceStats>>,
}

impl FaceDb {
    pub fn new(workers: usize) -> Self {
        Self {
            entries: vec![None; FACES_MAX],
            stats: vec![vec![FaceStats::default(); FACES_MAX]; workers.max(1)],
        }
    }

    /// Registers a face, handing out the first free id. Duplicate
    /// (local, remote) pairs are rejected.
    pub fn add(&mut self, local: SocketAddr, remote: SocketAddr, app_face: bool) -> Result<u16> {
        if self.find_by_addr(&local, &remote).is_ok() {
            return Err(Error::Duplicate(format!("face for {} -> {}", local, remote)));
        }
        let slot = self
            .entries
            .iter()
            .position(|e| e.is_none())
            .ok_or_else(|| Error::CapacityExceeded(format!("{} faces", FACES_MAX)))?;
        let id = (slot + 1) as u16;
        self.entries[slot] = Some(Face {
            id,
            local,
            remote,
            swif: 0,
            flags: 0,
            fib_nh_refs: 0,
            app_face,
        });
        // A reused slot starts with clean stats on every worker.
        for worker in &mut self.stats {
            worker[slot] = FaceStats::default();
        }
        Ok(id)
    }

    pub fn find_by_id(&self, id: u16) -> Result<&Face> {
        self.slot(id)
            .and_then(|s| self.entries[s].as_ref())
            .filter(|f| !f.is_deleted())
            .ok_or(Error::NotFound)
    }

    pub fn find_by_id_mut(&mut self, id: u16) -> Result<&mut Face> {
        let slot = self.slot(id).ok_or(Error::NotFound)?;
        self.entries[slot]
            .as_mut()
            .filter(|f| !f.is_deleted())
            .ok_or(Error::NotFound)
    }

    pub fn find_by_addr(&self, local: &SocketAddr, remote: &SocketAddr) -> Result<&Face> {
        self.entries
            .iter()
            .flatten()
            .find(|f| !f.is_deleted() && f.local == *local && f.remote == *remote)
            .ok_or(Error::NotFound)
    }

    /// Sets or clears flag bits on a face.
    pub fn flags_update(&mut self, id: u16, set: bool, flags: u32) -> Result<()> {
        let face = self.find_by_id_mut(id)?;
        if set {
            face.flags |= flags;
        } else {
            face.flags &= !flags;
        }
        Ok(())
    }

    /// Marks a face deleted and frees its slot for reuse.
    pub fn remove(&mut self, id: u16) -> Result<Face> {
        let slot = self.slot(id).ok_or(Error::NotFound)?;
        self.entries[slot].take().ok_or(Error::NotFound)
    }

    /// Adjusts the FIB next-hop refcount when routes come and go.
    pub fn fib_nh_ref_update(&mut self, id: u16, add: bool) -> Result<()> {
        let face = self.find_by_id_mut(id)?;
        if add {
            face.fib_nh_refs += 1;
        } else {
            face.fib_nh_refs = face.fib_nh_refs.saturating_sub(1);
        }
        Ok(())
    }

    /// Mutable stats access for one worker; unilateral writes only.
    pub fn stats_mut(&mut self, worker: usize, id: u16) -> Option<&mut FaceStats> {
        let slot = self.slot(id)?;
        self.stats.get_mut(worker).map(|w| &mut w[slot])
    }

    /// Sums a face's counters across every worker.
    pub fn stats_aggregate(&self, id: u16) -> Result<FaceStats> {
        let slot = self.slot(id).ok_or(Error::NotFound)?;
        self.find_by_id(id)?;
        let mut total = FaceStats::default();
        for worker in &self.stats {
            total.merge(&worker[slot]);
        }
        Ok(total)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Face> {
        self.entries.iter().flatten().filter(|f| !f.is_deleted())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: u16) -> Option<usize> {
        if id == 0 || id as usize > FACES_MAX {
            None
        } else {
            Some(id as usize - 1)
        }
    }
}
