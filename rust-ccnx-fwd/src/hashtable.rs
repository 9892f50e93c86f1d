//! Fast-path hashtable, the base for the PIT/CS and FIB.
//!
//! One substrate serves both tables: open-addressed rows of eight entries,
//! chained overflow rows, and chained key buffers for names too long to
//! embed in a node. All links are compact `u32` indices into pools; index
//! zero is a reserved sentinel (the pools allocate but never hand out
//! slot 0), which keeps the structures serializable and stable across
//! growth.
//!
//! Lookup matches at the row level first (full 64-bit hash per entry),
//! then at the node level (key size, then key bytes, walking the key chain
//! for long keys). A row's last entry can instead carry the index of an
//! overflow row; the `UseSeven` policy reserves that slot exclusively for
//! the overflow link so in-place edits never migrate a neighbour entry
//! (the FIB wants this).

use rust_ccnx_common::error::{Error, Result};

use crate::params::HASHTB_KEY_BYTES_MAX;
use crate::ticks::{seq16_le, TickClock};

pub const BUCKET_ENTRIES: usize = 8;
const LAST: usize = BUCKET_ENTRIES - 1;

/// Target fill factor: rows = capacity / FILL_FACTOR.
pub const FILL_FACTOR: u32 = 4;
/// Overflow rows allocated as a fraction of capacity.
const OVERFLOW_FRACTION: u32 = 8;
/// Extra key buffers allocated as a fraction of capacity.
const KEY_RATIO: u32 = 8;

/// Bytes of key embedded directly in a node.
pub const KEY_EMBED_BYTES: usize = 128;
/// Bytes of key per chained buffer (the tail 4 bytes hold the next index).
pub const KEY_LIST_BYTES: usize = KEY_EMBED_BYTES - 4;

pub const MIN_ENTRIES: u32 = 1 << 4;
pub const MAX_ENTRIES: u32 = 1 << 24;

/// Iteration cookie value signalling "first call".
pub const WALK_CTX_INITIAL: u64 = u64::MAX;

/// End-of-chain marker inside key buffers.
const KEY_CHAIN_END: u32 = u32::MAX;

/// Entry flags.
pub const ENTRY_FLAG_OVERFLOW: u8 = 0x01;
pub const ENTRY_FLAG_DELETED: u8 = 0x02;
pub const ENTRY_FLAG_FAST_TIMEOUT: u8 = 0x04;

/// Table flags.
pub const TABLE_FLAG_USE_SEVEN: u32 = 0x01;

/* ---------------------------------------------------------------- *\
 * Rows, entries, nodes, key buffers
\* ---------------------------------------------------------------- */

/// One slot in a row: enough hash to qualify a candidate, the node index,
/// and the compressed expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Entry {
    pub hash: u64,
    pub node: u32,
    pub timeout: u16,
    pub flags: u8,
    pub app: u8,
}

impl Entry {
    fn occupied(node: u32, hash: u64) -> Self {
        Self {
            hash,
            node,
            timeout: 0,
            flags: 0,
            app: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.hash == 0 && self.node == 0
    }
}

#[derive(Debug, Clone, Default)]
struct Bucket {
    entries: [Entry; BUCKET_ENTRIES],
}

/// A chained key buffer for keys longer than the embedded area.
#[derive(Debug, Clone)]
struct KeyBuf {
    bytes: [u8; KEY_LIST_BYTES],
    next: u32,
}

impl Default for KeyBuf {
    fn default() -> Self {
        Self {
            bytes: [0; KEY_LIST_BYTES],
            next: KEY_CHAIN_END,
        }
    }
}

/// A hashtable node: full hash, key (embedded, spilling to a chain), and
/// the application payload stored inline.
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub hash: u64,
    key_size: u16,
    pub flags: u8,
    embed: [u8; KEY_EMBED_BYTES],
    key_next: u32,
    pub data: T,
}

impl<T: Default> Default for Node<T> {
    fn default() -> Self {
        Self {
            hash: 0,
            key_size: 0,
            flags: 0,
            embed: [0; KEY_EMBED_BYTES],
            key_next: KEY_CHAIN_END,
            data: T::default(),
        }
    }
}

impl<T> Node<T> {
    pub fn key_size(&self) -> usize {
        self.key_size as usize
    }
}

/* ---------------------------------------------------------------- *\
 * Index pools
\* ---------------------------------------------------------------- */

/// A bounded pool handing out `u32` slot indices. Slot 0 is allocated at
/// construction and never returned, so 0 stays usable as a sentinel.
#[derive(Debug)]
struct Pool<U> {
    slots: Vec<U>,
    free: Vec<u32>,
    capacity: u32,
    used: u32,
}

impl<U: Default> Pool<U> {
    fn new(capacity: u32) -> Self {
        let mut slots = Vec::new();
        slots.push(U::default()); // reserved slot 0
        Self {
            slots,
            free: Vec::new(),
            capacity,
            used: 1,
        }
    }

    fn alloc(&mut self) -> Option<u32> {
        if self.used >= self.capacity {
            return None;
        }
        self.used += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = U::default();
            Some(idx)
        } else {
            self.slots.push(U::default());
            Some((self.slots.len() - 1) as u32)
        }
    }

    fn release(&mut self, idx: u32) {
        debug_assert!(idx != 0, "pool slot 0 is reserved");
        debug_assert!(self.used > 1);
        self.free.push(idx);
        self.used -= 1;
    }

    fn get(&self, idx: u32) -> &U {
        &self.slots[idx as usize]
    }

    fn get_mut(&mut self, idx: u32) -> &mut U {
        &mut self.slots[idx as usize]
    }
}

/* ---------------------------------------------------------------- *\
 * Hashtable
\* ---------------------------------------------------------------- */

/// Identifies a row: either a slot of the fixed array or an overflow row.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RowRef {
    Fixed(usize),
    Ovf(u32),
}

#[derive(Debug)]
pub struct Hashtable<T> {
    buckets: Vec<Bucket>,
    bucket_count: u32,
    overflow: Pool<Bucket>,
    nodes: Pool<Node<T>>,
    keys: Pool<KeyBuf>,
    flags: u32,
}

impl<T: Default> Hashtable<T> {
    /// Allocates a table able to hold `capacity` entries.
    pub fn new(capacity: u32, flags: u32) -> Result<Self> {
        if !(MIN_ENTRIES..=MAX_ENTRIES).contains(&capacity) {
            return Err(Error::InvalidArgument(format!(
                "hashtable capacity {} out of range",
                capacity
            )));
        }

        // Power-of-two row count so the hash mask is a clean modulo.
        let bucket_count = capacity.div_ceil(FILL_FACTOR).next_power_of_two();
        let overflow_cap = capacity.div_ceil(OVERFLOW_FRACTION) + 1;
        let key_cap = capacity.div_ceil(KEY_RATIO) + 1;

        Ok(Self {
            buckets: vec![Bucket::default(); bucket_count as usize],
            bucket_count,
            overflow: Pool::new(overflow_cap),
            nodes: Pool::new(capacity + 1),
            keys: Pool::new(key_cap),
            flags,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.nodes.capacity - 1
    }

    pub fn nodes_used(&self) -> u32 {
        self.nodes.used - 1
    }

    fn bucket_idx(&self, hash: u64) -> usize {
        (hash & u64::from(self.bucket_count - 1)) as usize
    }

    fn row(&self, r: RowRef) -> &Bucket {
        match r {
            RowRef::Fixed(i) => &self.buckets[i],
            RowRef::Ovf(i) => self.overflow.get(i),
        }
    }

    fn row_mut(&mut self, r: RowRef) -> &mut Bucket {
        match r {
            RowRef::Fixed(i) => &mut self.buckets[i],
            RowRef::Ovf(i) => self.overflow.get_mut(i),
        }
    }

    pub fn node(&self, idx: u32) -> &Node<T> {
        self.nodes.get(idx)
    }

    pub fn node_mut(&mut self, idx: u32) -> &mut Node<T> {
        self.nodes.get_mut(idx)
    }

    pub fn data(&self, idx: u32) -> &T {
        &self.nodes.get(idx).data
    }

    pub fn data_mut(&mut self, idx: u32) -> &mut T {
        &mut self.nodes.get_mut(idx).data
    }

    /// Takes a node from the free pool. The node is zeroed but not keyed;
    /// follow with [`init_node`](Self::init_node).
    pub fn alloc_node(&mut self) -> Result<u32> {
        self.nodes.alloc().ok_or(Error::OutOfMemory)
    }

    /// Sets up a node's hash and key, spilling long keys into a chain of
    /// key buffers.
    pub fn init_node(&mut self, node_idx: u32, hash: u64, key: &[u8]) -> Result<()> {
        if key.is_empty() || key.len() > HASHTB_KEY_BYTES_MAX {
            return Err(Error::InvalidArgument(format!(
                "key of {} bytes unsupported",
                key.len()
            )));
        }

        // Build the chain before touching the node, so a failed allocation
        // leaves nothing half-linked.
        let mut chain_head = KEY_CHAIN_END;
        if key.len() > KEY_EMBED_BYTES {
            let mut rest = &key[KEY_LIST_BYTES..];
            let mut allocated: Vec<u32> = Vec::new();
            while !rest.is_empty() {
                let idx = match self.keys.alloc() {
                    Some(idx) => idx,
                    None => {
                        for idx in allocated {
                            self.keys.release(idx);
                        }
                        return Err(Error::OutOfMemory);
                    }
                };
                let take = rest.len().min(KEY_LIST_BYTES);
                let buf = self.keys.get_mut(idx);
                buf.bytes[..take].copy_from_slice(&rest[..take]);
                buf.next = KEY_CHAIN_END;
                if let Some(&prev) = allocated.last() {
                    self.keys.get_mut(prev).next = idx;
                } else {
                    chain_head = idx;
                }
                allocated.push(idx);
                rest = &rest[take..];
            }
        }

        let node = self.nodes.get_mut(node_idx);
        node.hash = hash;
        node.flags = 0;
        node.key_size = key.len() as u16;
        node.key_next = chain_head;
        if key.len() <= KEY_EMBED_BYTES {
            node.embed[..key.len()].copy_from_slice(key);
        } else {
            node.embed[..KEY_LIST_BYTES].copy_from_slice(&key[..KEY_LIST_BYTES]);
        }
        Ok(())
    }

    /// Returns a node (and its key chain) to the free pools.
    pub fn free_node(&mut self, node_idx: u32) {
        let mut key_idx = self.nodes.get(node_idx).key_next;
        while key_idx != KEY_CHAIN_END {
            let next = self.keys.get(key_idx).next;
            self.keys.release(key_idx);
            key_idx = next;
        }
        *self.nodes.get_mut(node_idx) = Node::default();
        self.nodes.release(node_idx);
    }

    /// Compares a node's stored key with `key`.
    pub fn key_matches(&self, node_idx: u32, key: &[u8]) -> bool {
        let node = self.nodes.get(node_idx);
        if node.key_size as usize != key.len() {
            return false;
        }
        if key.len() <= KEY_EMBED_BYTES {
            return &node.embed[..key.len()] == key;
        }
        if &node.embed[..KEY_LIST_BYTES] != &key[..KEY_LIST_BYTES] {
            return false;
        }
        let mut seen = KEY_LIST_BYTES;
        let mut key_idx = node.key_next;
        while seen < key.len() {
            if key_idx == KEY_CHAIN_END {
                return false;
            }
            let buf = self.keys.get(key_idx);
            let take = (key.len() - seen).min(KEY_LIST_BYTES);
            if &buf.bytes[..take] != &key[seen..seen + take] {
                return false;
            }
            seen += take;
            key_idx = buf.next;
        }
        true
    }

    /// Materializes a node's key bytes (for display paths only).
    pub fn node_key(&self, node_idx: u32) -> Vec<u8> {
        let node = self.nodes.get(node_idx);
        let total = node.key_size as usize;
        let mut out = Vec::with_capacity(total);
        if total <= KEY_EMBED_BYTES {
            out.extend_from_slice(&node.embed[..total]);
            return out;
        }
        out.extend_from_slice(&node.embed[..KEY_LIST_BYTES]);
        let mut key_idx = node.key_next;
        while out.len() < total && key_idx != KEY_CHAIN_END {
            let buf = self.keys.get(key_idx);
            let take = (total - out.len()).min(KEY_LIST_BYTES);
            out.extend_from_slice(&buf.bytes[..take]);
            key_idx = buf.next;
        }
        out
    }

    /// Inserts a prepared node. Never checks uniqueness; the caller
    /// guarantees the key is not already present.
    pub fn insert(&mut self, node_idx: u32) -> Result<()> {
        let hash = self.nodes.get(node_idx).hash;
        let use_seven = self.flags & TABLE_FLAG_USE_SEVEN != 0;
        let mut row = RowRef::Fixed(self.bucket_idx(hash));

        'rows: loop {
            for i in 0..BUCKET_ENTRIES {
                let e = self.row(row).entries[i];
                if i == LAST {
                    if e.flags & ENTRY_FLAG_OVERFLOW != 0 {
                        row = RowRef::Ovf(e.node);
                        continue 'rows;
                    }
                    if e.is_empty() && !use_seven {
                        self.row_mut(row).entries[i] = Entry::occupied(node_idx, hash);
                        return Ok(());
                    }
                    // Reached the end of the row: chain a fresh overflow
                    // row. Without seven-mode the displaced last entry
                    // migrates into slot 0 of the new row so the row
                    // stays contiguous.
                    let new_row = self.overflow.alloc().ok_or(Error::OutOfMemory)?;
                    if !use_seven {
                        self.overflow.get_mut(new_row).entries[0] = e;
                    }
                    {
                        let last = &mut self.row_mut(row).entries[LAST];
                        last.flags |= ENTRY_FLAG_OVERFLOW;
                        last.node = new_row;
                    }
                    let slot = if use_seven { 0 } else { 1 };
                    self.overflow.get_mut(new_row).entries[slot] =
                        Entry::occupied(node_idx, hash);
                    return Ok(());
                }
                if e.flags & ENTRY_FLAG_DELETED != 0 {
                    continue;
                }
                if e.is_empty() {
                    self.row_mut(row).entries[i] = Entry::occupied(node_idx, hash);
                    return Ok(());
                }
            }
            unreachable!("the last row slot always resolves the scan");
        }
    }

    /// Looks up `key` (with its precomputed hash), skipping entries marked
    /// for deletion.
    pub fn lookup(&self, key: &[u8], hash: u64) -> Result<u32> {
        self.lookup_ex(key, hash, false)
    }

    /// Extended lookup that can also see tombstoned entries; the FIB uses
    /// this to resurrect deleted prefixes in place.
    pub fn lookup_ex(&self, key: &[u8], hash: u64, include_deleted: bool) -> Result<u32> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty lookup key".into()));
        }
        let mut row = RowRef::Fixed(self.bucket_idx(hash));

        'rows: loop {
            for i in 0..BUCKET_ENTRIES {
                let e = self.row(row).entries[i];
                if i == LAST && e.flags & ENTRY_FLAG_OVERFLOW != 0 {
                    row = RowRef::Ovf(e.node);
                    continue 'rows;
                }
                if e.flags & ENTRY_FLAG_DELETED != 0 && !include_deleted {
                    continue;
                }
                if e.node != 0 && e.hash == hash {
                    debug_assert_eq!(self.nodes.get(e.node).hash, hash);
                    if self.key_matches(e.node, key) {
                        return Ok(e.node);
                    }
                }
            }
            return Err(Error::NotFound);
        }
    }

    /// Finds the row slot carrying `node_idx`. Deleted entries are
    /// considered, unlike lookup.
    fn find_slot(&self, node_idx: u32) -> Result<(RowRef, usize, bool)> {
        let hash = self.nodes.get(node_idx).hash;
        let mut row = RowRef::Fixed(self.bucket_idx(hash));
        let mut in_overflow = false;

        'rows: loop {
            for i in 0..BUCKET_ENTRIES {
                let e = self.row(row).entries[i];
                if i == LAST && e.flags & ENTRY_FLAG_OVERFLOW != 0 {
                    row = RowRef::Ovf(e.node);
                    in_overflow = true;
                    continue 'rows;
                }
                if e.node == node_idx && e.node != 0 {
                    return Ok((row, i, in_overflow));
                }
            }
            return Err(Error::NotFound);
        }
    }

    /// Unhooks a node from its row. The node itself is not freed. Empty
    /// overflow rows are unlinked and returned to their pool; removal
    /// never rehashes.
    pub fn remove(&mut self, node_idx: u32) -> Result<()> {
        let (row, slot, in_overflow) = self.find_slot(node_idx)?;
        self.row_mut(row).entries[slot] = Entry::default();

        if !in_overflow {
            return Ok(());
        }
        let ovf_idx = match row {
            RowRef::Ovf(i) => i,
            RowRef::Fixed(_) => unreachable!(),
        };

        // If this overflow row still holds a real entry, leave it alone.
        let mut count = 0;
        let mut successor = None;
        for i in 0..BUCKET_ENTRIES {
            let e = self.row(row).entries[i];
            if i == LAST && e.flags & ENTRY_FLAG_OVERFLOW != 0 {
                successor = Some(e.node);
                continue;
            }
            if e.node != 0 {
                count += 1;
            }
        }
        if count > 0 {
            return Ok(());
        }

        // Liberate the bucket: find its predecessor from the head of the
        // chain and relink (or clear) the tail pointer.
        let hash = self.nodes.get(node_idx).hash;
        let mut parent = RowRef::Fixed(self.bucket_idx(hash));
        loop {
            let last = self.row(parent).entries[LAST];
            if last.flags & ENTRY_FLAG_OVERFLOW == 0 {
                debug_assert!(false, "overflow row missing from its chain");
                return Err(Error::Corruption("overflow chain broken".into()));
            }
            if last.node == ovf_idx {
                match successor {
                    Some(next) => self.row_mut(parent).entries[LAST].node = next,
                    None => self.row_mut(parent).entries[LAST] = Entry::default(),
                }
                break;
            }
            parent = RowRef::Ovf(last.node);
        }

        self.overflow.release(ovf_idx);
        Ok(())
    }

    /// Removes a node and frees it, key chain included.
    pub fn delete(&mut self, node_idx: u32) -> Result<()> {
        self.remove(node_idx)?;
        self.free_node(node_idx);
        Ok(())
    }

    /// Updates the compressed expiry of a node's row entry. `flags`
    /// selects fast or slow tick units via [`ENTRY_FLAG_FAST_TIMEOUT`].
    pub fn set_expiration(&mut self, node_idx: u32, timeout: u16, flags: u8) -> Result<()> {
        let (row, slot, _) = self.find_slot(node_idx)?;
        let entry = &mut self.row_mut(row).entries[slot];
        entry.timeout = timeout;
        if flags & ENTRY_FLAG_FAST_TIMEOUT != 0 {
            entry.flags |= ENTRY_FLAG_FAST_TIMEOUT;
        } else {
            entry.flags &= !ENTRY_FLAG_FAST_TIMEOUT;
        }
        Ok(())
    }

    /// Walks the table, one node per call, keeping position in `ctx`
    /// between calls. Start with [`WALK_CTX_INITIAL`]. Not safe across
    /// mutations: a concurrent insert or remove may cause the walk to
    /// skip or revisit entries.
    pub fn next_node(&self, ctx: &mut u64) -> Option<u32> {
        let (start_bidx, resume_entry) = if *ctx == WALK_CTX_INITIAL {
            (0u32, None)
        } else {
            (((*ctx) & 0xffff_ffff) as u32, Some((*ctx >> 32) as u32))
        };
        if start_bidx >= self.bucket_count {
            return None;
        }

        for bidx in start_bidx..self.bucket_count {
            let resume = if bidx == start_bidx { resume_entry } else { None };
            let mut row = RowRef::Fixed(bidx as usize);
            // Flat index across the row and its overflow chain; the
            // overflow-pointer slots consume an index of their own.
            let mut j: u32 = 0;
            loop {
                let mut next_row = None;
                for i in 0..BUCKET_ENTRIES {
                    let e = self.row(row).entries[i];
                    if i == LAST && e.flags & ENTRY_FLAG_OVERFLOW != 0 {
                        next_row = Some(e.node);
                        j += 1;
                        break;
                    }
                    let already_returned = matches!(resume, Some(r) if j <= r);
                    if !already_returned
                        && e.flags & ENTRY_FLAG_DELETED == 0
                        && e.node != 0
                    {
                        *ctx = u64::from(bidx) | (u64::from(j) << 32);
                        return Some(e.node);
                    }
                    j += 1;
                }
                match next_row {
                    Some(idx) => row = RowRef::Ovf(idx),
                    None => break,
                }
            }
        }
        None
    }

    /// Collects the nodes whose compressed expiry has passed, for a bulk
    /// expiry sweep. Entries with no timeout set are skipped.
    pub fn expired_nodes(&self, clock: &TickClock) -> Vec<u32> {
        let mut expired = Vec::new();
        let mut ctx = WALK_CTX_INITIAL;
        while let Some(node_idx) = self.next_node(&mut ctx) {
            if let Ok((row, slot, _)) = self.find_slot(node_idx) {
                let e = self.row(row).entries[slot];
                if e.timeout == 0 {
                    continue;
                }
                let now = if e.flags & ENTRY_FLAG_FAST_TIMEOUT != 0 {
                    clock.fast
                } else {
                    clock.slow
                };
                if seq16_le(e.timeout, now) {
                    expired.push(node_idx);
                }
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ccnx_common::siphash::hash_bytes;

    fn table(cap: u32) -> Hashtable<u32> {
        Hashtable::new(cap, 0).unwrap()
    }

    fn put(t: &mut Hashtable<u32>, key: &[u8], val: u32) -> u32 {
        let hash = hash_bytes(key);
        let idx = t.alloc_node().unwrap();
        t.init_node(idx, hash, key).unwrap();
        t.node_mut(idx).data = val;
        t.insert(idx).unwrap();
        idx
    }

    fn get(t: &Hashtable<u32>, key: &[u8]) -> Result<u32> {
        t.lookup(key, hash_bytes(key))
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut t = table(64);
        for i in 0..40u32 {
            let key = format!("key-{}", i);
            put(&mut t, key.as_bytes(), i);
        }
        for i in 0..40u32 {
            let key = format!("key-{}", i);
            let idx = get(&t, key.as_bytes()).unwrap();
            assert_eq!(*t.data(idx), i);
        }
        assert!(matches!(get(&t, b"missing"), Err(Error::NotFound)));

        for i in (0..40u32).step_by(2) {
            let key = format!("key-{}", i);
            let idx = get(&t, key.as_bytes()).unwrap();
            t.delete(idx).unwrap();
        }
        for i in 0..40u32 {
            let key = format!("key-{}", i);
            let found = get(&t, key.as_bytes());
            if i % 2 == 0 {
                assert!(found.is_err(), "key-{} should be gone", i);
            } else {
                assert!(found.is_ok(), "key-{} should remain", i);
            }
        }
    }

    #[test]
    fn test_fill_to_capacity_then_oom() {
        let mut t = table(MIN_ENTRIES);
        let cap = t.capacity();
        for i in 0..cap {
            let key = format!("k{}", i);
            put(&mut t, key.as_bytes(), i);
        }
        assert_eq!(t.nodes_used(), cap);
        // One past capacity fails loudly, nothing is silently dropped.
        assert!(matches!(t.alloc_node(), Err(Error::OutOfMemory)));
        for i in 0..cap {
            let key = format!("k{}", i);
            assert!(get(&t, key.as_bytes()).is_ok());
        }
    }

    #[test]
    fn test_collision_overflow_rows() {
        // Force every key into one row by fixing the low hash bits.
        let mut t: Hashtable<u32> = Hashtable::new(256, 0).unwrap();
        let mask = u64::from(t.bucket_count - 1);
        let mut hashes = Vec::new();
        for i in 0..30u64 {
            let h = (i << 32) | 0x5; // same bucket, distinct msb
            hashes.push(h & !mask | 0x5 & mask);
        }
        for (i, &h) in hashes.iter().enumerate() {
            let key = format!("collide-{}", i);
            let idx = t.alloc_node().unwrap();
            t.init_node(idx, h, key.as_bytes()).unwrap();
            t.node_mut(idx).data = i as u32;
            t.insert(idx).unwrap();
        }
        for (i, &h) in hashes.iter().enumerate() {
            let key = format!("collide-{}", i);
            let idx = t.lookup(key.as_bytes(), h).unwrap();
            assert_eq!(*t.data(idx), i as u32);
        }
        // Remove them all; overflow rows must unlink cleanly.
        for (i, &h) in hashes.iter().enumerate() {
            let key = format!("collide-{}", i);
            let idx = t.lookup(key.as_bytes(), h).unwrap();
            t.delete(idx).unwrap();
        }
        assert_eq!(t.nodes_used(), 0);
        assert_eq!(t.overflow.used, 1);
    }

    #[test]
    fn test_use_seven_reserves_last_slot() {
        let mut t: Hashtable<u32> = Hashtable::new(256, TABLE_FLAG_USE_SEVEN).unwrap();
        let mask = u64::from(t.bucket_count - 1);
        // Nine same-row inserts: seven in the fixed row, the rest in an
        // overflow row reached through the reserved slot.
        for i in 0..9u64 {
            let h = ((i + 1) << 32) | (0x3 & mask);
            let key = format!("seven-{}", i);
            let idx = t.alloc_node().unwrap();
            t.init_node(idx, h, key.as_bytes()).unwrap();
            t.insert(idx).unwrap();
        }
        assert_eq!(t.overflow.used, 2); // slot 0 + one live row
        for i in 0..9u64 {
            let h = ((i + 1) << 32) | (0x3 & mask);
            let key = format!("seven-{}", i);
            assert!(t.lookup(key.as_bytes(), h).is_ok());
        }
    }

    #[test]
    fn test_long_keys_chain() {
        let mut t = table(64);
        let long_a: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
        let mut long_b = long_a.clone();
        *long_b.last_mut().unwrap() ^= 0xff; // differ only in the last chained buffer

        put(&mut t, &long_a, 1);
        put(&mut t, &long_b, 2);

        assert_eq!(*t.data(get(&t, &long_a).unwrap()), 1);
        assert_eq!(*t.data(get(&t, &long_b).unwrap()), 2);

        // Key reconstruction round-trips.
        let idx = get(&t, &long_a).unwrap();
        assert_eq!(t.node_key(idx), long_a);

        // Deleting returns the chained buffers to the pool.
        let used_before = t.keys.used;
        t.delete(idx).unwrap();
        assert!(t.keys.used < used_before);
        assert!(get(&t, &long_a).is_err());
        assert_eq!(*t.data(get(&t, &long_b).unwrap()), 2);
    }

    #[test]
    fn test_oversize_key_rejected() {
        let mut t = table(64);
        let idx = t.alloc_node().unwrap();
        let huge = vec![0u8; HASHTB_KEY_BYTES_MAX + 1];
        assert!(t.init_node(idx, 1, &huge).is_err());
    }

    #[test]
    fn test_deleted_flag_visibility() {
        let mut t = table(64);
        let idx = put(&mut t, b"tomb", 7);
        let (row, slot, _) = t.find_slot(idx).unwrap();
        t.row_mut(row).entries[slot].flags |= ENTRY_FLAG_DELETED;

        assert!(t.lookup(b"tomb", hash_bytes(b"tomb")).is_err());
        assert_eq!(
            t.lookup_ex(b"tomb", hash_bytes(b"tomb"), true).unwrap(),
            idx
        );
    }

    #[test]
    fn test_walk_visits_everything_once() {
        let mut t = table(256);
        let mut expected = std::collections::HashSet::new();
        for i in 0..120u32 {
            let key = format!("walk-{}", i);
            expected.insert(put(&mut t, key.as_bytes(), i));
        }

        let mut seen = std::collections::HashSet::new();
        let mut ctx = WALK_CTX_INITIAL;
        while let Some(idx) = t.next_node(&mut ctx) {
            assert!(seen.insert(idx), "node {} visited twice", idx);
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_expiry_sweep() {
        let mut t = table(64);
        let a = put(&mut t, b"fast", 1);
        let b = put(&mut t, b"slow", 2);
        let c = put(&mut t, b"later", 3);

        let mut clock = TickClock::new();
        t.set_expiration(a, clock.fast_expiry(1500), ENTRY_FLAG_FAST_TIMEOUT)
            .unwrap();
        t.set_expiration(b, clock.slow_expiry(90_000), 0).unwrap();
        t.set_expiration(c, clock.fast_expiry(60_000), ENTRY_FLAG_FAST_TIMEOUT)
            .unwrap();

        assert!(t.expired_nodes(&clock).is_empty());

        clock.advance(2_000); // expires "fast"
        assert_eq!(t.expired_nodes(&clock), vec![a]);

        clock.advance(119_000); // expires "slow" (2 slow ticks) and "later"
        let mut expired = t.expired_nodes(&clock);
        expired.sort_unstable();
        let mut want = vec![a, b, c];
        want.sort_unstable();
        assert_eq!(expired, want);
    }
}
