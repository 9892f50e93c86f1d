//! One-pass prefix hashing of names.
//!
//! Walks a name as a sequence of component TLVs and emits, in order, the
//! hash of the first `k` components for every `k`, plus the hash of the
//! whole name, all from a single pass over the bytes. A chunk-number
//! component terminates the prefix chain (FIB entries never include it).

use crate::error::{Error, Result};
use crate::siphash::SipState;
use crate::tlv::{self, COMP_TYPE_CHUNK};
use bytes::Bytes;

/// Max prefix components tracked per name; used by the FIB's LPM walk.
pub const MAX_PREFIX_COMPS: usize = 8;

/// Prefix-hash record for one name: per-prefix hashes and byte offsets,
/// the whole-name hash, and an overflow flag for names with more
/// components than the fixed arrays hold.
#[derive(Debug, Clone)]
pub struct PrefixHashes {
    /// The bare component bytes the hashes cover (no leading name TLV).
    pub data: Bytes,

    /// Byte length of prefix `i+1` within `data`.
    pub lens: [u16; MAX_PREFIX_COMPS],

    /// `hashes[i]` is the hash of the first `i+1` components.
    pub hashes: [u64; MAX_PREFIX_COMPS],

    /// Number of prefix slots filled.
    pub count: usize,

    /// Hash of the entire component sequence.
    pub full_hash: u64,

    /// True when the name had more components than we hashed.
    pub overflow: bool,
}

impl PrefixHashes {
    /// The key bytes for prefix `i+1`, suitable for a hashtable probe.
    pub fn prefix_key(&self, i: usize) -> &[u8] {
        &self.data[..self.lens[i] as usize]
    }

    /// The key bytes for the whole name.
    pub fn full_key(&self) -> &[u8] {
        &self.data
    }
}

/// Hashes every prefix of `name` in one pass.
///
/// When `is_full_name` is set, `name` starts with the enclosing name TLV
/// header, which is skipped before hashing (prefix hashes cover component
/// bytes only, so packet names and bare FIB prefixes hash identically).
/// `limit` bounds the number of per-prefix hashes computed; 0 means
/// [`MAX_PREFIX_COMPS`].
pub fn hash_prefixes(name: &[u8], is_full_name: bool, limit: usize) -> Result<PrefixHashes> {
    if name.len() < tlv::TLV_HDR_LEN {
        return Err(Error::InvalidPacket("name shorter than one TLV header".into()));
    }
    let limit = if limit == 0 || limit > MAX_PREFIX_COMPS {
        MAX_PREFIX_COMPS
    } else {
        limit
    };

    let data = if is_full_name {
        &name[tlv::TLV_HDR_LEN..]
    } else {
        name
    };

    let mut pfx = PrefixHashes {
        data: Bytes::copy_from_slice(data),
        lens: [0; MAX_PREFIX_COMPS],
        hashes: [0; MAX_PREFIX_COMPS],
        count: 0,
        full_hash: 0,
        overflow: false,
    };

    let mut state = SipState::with_default_seed();
    let mut cur_hash = 0u64;
    let mut comp_offset = 0usize;
    let mut idx = 0usize;

    while comp_offset < data.len() {
        if data.len() - comp_offset < tlv::TLV_HDR_LEN {
            return Err(Error::InvalidPacket("truncated component header".into()));
        }
        let comp = &data[comp_offset..];
        let comp_type = tlv::peek_tlv_type(comp);
        let comp_vlen = tlv::peek_tlv_length(comp) as usize;
        let comp_flen = tlv::TLV_HDR_LEN + comp_vlen;

        let mut pfx_len = comp_offset + comp_flen;
        if pfx_len > data.len() {
            return Err(Error::InvalidPacket(
                "component length overruns name".into(),
            ));
        }

        // A chunk component ends partial hashing; FIB entries never carry
        // one. Running out of slots likewise ends it; either way the last
        // hash computed covers the full byte range.
        let terminal = if comp_type == COMP_TYPE_CHUNK {
            pfx_len = data.len();
            true
        } else if idx >= limit {
            pfx.overflow = true;
            pfx_len = data.len();
            true
        } else {
            false
        };

        cur_hash = state.hash_prefix(data, pfx_len, comp_offset);

        if terminal {
            break;
        }

        pfx.lens[idx] = pfx_len as u16;
        pfx.hashes[idx] = cur_hash;
        idx += 1;
        comp_offset += comp_flen;
    }

    pfx.count = idx;

    if idx == 0 && comp_offset == 0 && data.is_empty() {
        // Empty name still has a (fixed) hash.
        cur_hash = state.hash_prefix(data, 0, 0);
    }

    pfx.full_hash = cur_hash;
    Ok(pfx)
}
