//! FIB: longest-prefix-match route table with weighted multipath next hops.
//!
//! Entries live in the shared hashtable, keyed by the bare component bytes
//! of a prefix and probed with the per-prefix hashes computed by the name
//! hasher. A prefix that exists only to anchor a longer one is a *virtual*
//! entry: it carries a child refcount and no usable next hops. The table
//! runs in seven-mode so route edits happen in place, never migrating a
//! neighbour entry.

use log::debug;
use rust_ccnx_common::error::{Error, Result};
use rust_ccnx_common::hasher::PrefixHashes;

use crate::hashtable::{Hashtable, TABLE_FLAG_USE_SEVEN, WALK_CTX_INITIAL};
use crate::params::{FIB_NHOPS_MAX, FIB_PREFIX_BYTES_MAX, FIB_PREFIX_COMPS_MAX};

/// Flags for a FIB next hop.
pub const FIB_NH_FLAG_DOWN: u8 = 0x01;

/// Flags for a FIB entry.
pub const FIB_ENTRY_FLAG_DELETED: u8 = 0x1;
pub const FIB_ENTRY_FLAG_VIRTUAL: u8 = 0x2;

/// One next hop: a face and its weight. A face id of zero means the slot
/// is free.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NextHop {
    pub face: u16,
    pub weight: u8,
    pub flags: u8,
}

/// A FIB entry. Embedded in a hashtable node, so keep it small.
#[derive(Debug, Clone, Default)]
pub struct FibEntry {
    /// Refcount of longer prefixes anchored below this one.
    pub child_refcount: i32,
    /// Next hops; no count field, slots are not assumed contiguous.
    pub next_hops: [NextHop; FIB_NHOPS_MAX],
    pub flags: u8,
    /// Component count of this prefix.
    pub comps: u8,
}

impl FibEntry {
    pub fn is_virtual(&self) -> bool {
        self.flags & FIB_ENTRY_FLAG_VIRTUAL != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & FIB_ENTRY_FLAG_DELETED != 0
    }

    /// Number of occupied next-hop slots.
    pub fn nh_count(&self) -> usize {
        self.next_hops.iter().filter(|nh| nh.face != 0).count()
    }

    /// Picks the heaviest next hop whose face passes `usable`.
    pub fn select_nh(&self, usable: impl Fn(u16) -> bool) -> Option<NextHop> {
        self.next_hops
            .iter()
            .filter(|nh| nh.face != 0 && nh.flags & FIB_NH_FLAG_DOWN == 0 && usable(nh.face))
            .max_by_key(|nh| nh.weight)
            .copied()
    }
}

pub struct Fib {
    table: Hashtable<FibEntry>,
    default_entry: Option<FibEntry>,
    /// Longest prefix currently installed, bounds LPM probing.
    max_comps: u16,
    entry_count: u32,
}

impl Fib {
    pub fn new(capacity: u32) -> Result<Self> {
        Ok(Self {
            table: Hashtable::new(capacity, TABLE_FLAG_USE_SEVEN)?,
            default_entry: None,
            max_comps: 0,
            entry_count: 0,
        })
    }

    /// Number of installed real (non-virtual) entries.
    pub fn len(&self) -> u32 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// LPM lookup: probes the longest hashed prefix first and walks down.
    /// Virtual and deleted entries never match; if nothing matches and a
    /// default entry is installed, the default is returned.
    pub fn lookup(&self, pfx: &PrefixHashes) -> Result<&FibEntry> {
        let probes = (pfx.count as u16).min(self.max_comps) as usize;
        for i in (0..probes).rev() {
            if let Ok(node) = self.table.lookup(pfx.prefix_key(i), pfx.hashes[i]) {
                let entry = self.table.data(node);
                if !entry.is_virtual() && !entry.is_deleted() {
                    return Ok(entry);
                }
            }
        }
        self.default_entry.as_ref().ok_or(Error::NoRoute)
    }

    /// Adds a next hop for the exact prefix, creating the entry (and any
    /// virtual ancestors) as needed. An existing next hop for the same
    /// face gets its weight updated instead.
    pub fn insert_next_hop(&mut self, pfx: &PrefixHashes, face: u16, weight: u8) -> Result<()> {
        if face == 0 {
            return Err(Error::InvalidArgument("face id 0 is reserved".into()));
        }
        if pfx.count == 0 || pfx.overflow || pfx.count > FIB_PREFIX_COMPS_MAX {
            return Err(Error::CapacityExceeded(format!(
                "prefix of more than {} components",
                FIB_PREFIX_COMPS_MAX
            )));
        }
        if pfx.full_key().len() > FIB_PREFIX_BYTES_MAX {
            return Err(Error::CapacityExceeded(format!(
                "prefix longer than {} wire bytes",
                FIB_PREFIX_BYTES_MAX
            )));
        }

        let depth = pfx.count;
        let node = self.locate_or_create(pfx, depth, false)?;
        let entry = self.table.data_mut(node);

        // Freshly created, virtual, or tombstoned entries all become a
        // real route here; children (if any) keep their refcounts.
        let was_route =
            !entry.is_virtual() && !entry.is_deleted() && entry.nh_count() > 0;
        entry.flags &= !(FIB_ENTRY_FLAG_VIRTUAL | FIB_ENTRY_FLAG_DELETED);

        if let Some(nh) = entry.next_hops.iter_mut().find(|nh| nh.face == face) {
            nh.weight = weight;
            return Ok(());
        }
        let slot = entry
            .next_hops
            .iter_mut()
            .find(|nh| nh.face == 0)
            .ok_or_else(|| {
                Error::CapacityExceeded(format!(
                    "entry already has {} next hops",
                    FIB_NHOPS_MAX
                ))
            })?;
        *slot = NextHop {
            face,
            weight,
            flags: 0,
        };
        if !was_route {
            self.entry_count += 1;
        }
        Ok(())
    }

    /// Removes one next hop from the exact prefix. When the last real next
    /// hop goes away the entry either becomes virtual (children remain) or
    /// is deleted, cascading through virtual ancestors that anchored it.
    pub fn delete_next_hop(&mut self, pfx: &PrefixHashes, face: u16) -> Result<()> {
        if pfx.count == 0 || pfx.overflow {
            return Err(Error::InvalidArgument("bad prefix".into()));
        }
        let depth = pfx.count;
        let node = self
            .table
            .lookup(pfx.prefix_key(depth - 1), pfx.hashes[depth - 1])?;

        let entry = self.table.data_mut(node);
        if entry.is_virtual() {
            return Err(Error::NotFound);
        }
        let slot = entry
            .next_hops
            .iter_mut()
            .find(|nh| nh.face == face)
            .ok_or(Error::NotFound)?;
        *slot = NextHop::default();

        if entry.nh_count() > 0 {
            return Ok(());
        }

        self.entry_count -= 1;
        if entry.child_refcount > 0 {
            // Still anchoring longer prefixes: keep the node as virtual.
            entry.flags |= FIB_ENTRY_FLAG_VIRTUAL;
            return Ok(());
        }

        entry.flags |= FIB_ENTRY_FLAG_DELETED;
        self.table.delete(node)?;
        self.release_ancestors(pfx, depth)?;
        Ok(())
    }

    /// Installs or replaces the default route.
    pub fn set_default(&mut self, face: u16, weight: u8) {
        let mut entry = FibEntry::default();
        entry.next_hops[0] = NextHop {
            face,
            weight,
            flags: 0,
        };
        self.default_entry = Some(entry);
    }

    pub fn clear_default(&mut self) {
        self.default_entry = None;
    }

    /// Iterates the installed real entries as `(prefix-key bytes, entry)`.
    pub fn entries(&self) -> Vec<(Vec<u8>, FibEntry)> {
        let mut out = Vec::new();
        let mut ctx = WALK_CTX_INITIAL;
        while let Some(node) = self.table.next_node(&mut ctx) {
            let entry = self.table.data(node);
            if !entry.is_virtual() && !entry.is_deleted() {
                out.push((self.table.node_key(node), entry.clone()));
            }
        }
        out
    }

    /// Drops every next hop pointing at `face`, for face teardown.
    pub fn purge_face(&mut self, face: u16) -> u32 {
        let mut purged = 0;
        let mut victims = Vec::new();
        let mut ctx = WALK_CTX_INITIAL;
        while let Some(node) = self.table.next_node(&mut ctx) {
            let entry = self.table.data(node);
            if !entry.is_virtual() && entry.next_hops.iter().any(|nh| nh.face == face) {
                victims.push(self.table.node_key(node));
            }
        }
        for key in victims {
            if let Ok(pfx) = rust_ccnx_common::hasher::hash_prefixes(&key, false, 0) {
                if self.delete_next_hop(&pfx, face).is_ok() {
                    purged += 1;
                }
            }
        }
        purged
    }

    /// Finds the node for prefix length `depth`, creating it (virtual when
    /// `as_virtual`) along with shorter virtual ancestors.
    fn locate_or_create(
        &mut self,
        pfx: &PrefixHashes,
        depth: usize,
        as_virtual: bool,
    ) -> Result<u32> {
        let key = pfx.prefix_key(depth - 1);
        let hash = pfx.hashes[depth - 1];

        if let Ok(node) = self.table.lookup_ex(key, hash, true) {
            return Ok(node);
        }

        // Make sure every shorter prefix exists first, bumping each
        // ancestor's child refcount for the entry we are about to add.
        if depth > 1 {
            let parent = self.locate_or_create(pfx, depth - 1, true)?;
            self.table.data_mut(parent).child_refcount += 1;
        }

        let node = self.table.alloc_node()?;
        if let Err(e) = self.table.init_node(node, hash, key) {
            self.table.free_node(node);
            return Err(e);
        }
        {
            let entry = self.table.data_mut(node);
            entry.comps = depth as u8;
            if as_virtual {
                entry.flags |= FIB_ENTRY_FLAG_VIRTUAL;
            }
        }
        self.table.insert(node)?;
        self.max_comps = self.max_comps.max(depth as u16);
        debug!(
            "fib: created {} entry at depth {}",
            if as_virtual { "virtual" } else { "real" },
            depth
        );
        Ok(node)
    }

    /// Walks ancestors of a removed entry from longest to shortest,
    /// dropping refcounts and cleaning up virtual nodes left with no
    /// children and no next hops.
    fn release_ancestors(&mut self, pfx: &PrefixHashes, depth: usize) -> Result<()> {
        for d in (1..depth).rev() {
            let key = pfx.prefix_key(d - 1);
            let hash = pfx.hashes[d - 1];
            let node = match self.table.lookup_ex(key, hash, true) {
                Ok(node) => node,
                Err(_) => {
                    debug_assert!(false, "missing FIB ancestor at depth {}", d);
                    return Err(Error::Corruption("missing FIB ancestor".into()));
                }
            };
            let entry = self.table.data_mut(node);
            entry.child_refcount -= 1;
            if entry.is_virtual() && entry.child_refcount <= 0 {
                self.table.delete(node)?;
                // Keep cascading upward.
                continue;
            }
            break;
        }
        Ok(())
    }
}
