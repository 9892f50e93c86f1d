//! SipHash-2-4 with an incremental mode.
//!
//! The forwarder hashes every prefix of a name in one pass: the running
//! compression vector is checkpointed after each full 8-byte block, so the
//! hash of prefix `k+1` reuses the work done for prefix `k` instead of
//! restarting from the first byte. Finalization runs on a scratch copy of
//! the vector; the running vector only ever moves forward through whole
//! blocks.

/// Fixed hash seed. Kept stable so hashes are comparable across tables.
pub const SIP_SEED: [u8; 16] = [
    0x12, 0x34, 0x56, 0x78, 0x98, 0x76, 0x54, 0x32, //
    0x12, 0x34, 0x56, 0x78, 0x98, 0x76, 0x54, 0x32,
];

const C_ROUNDS: usize = 2;
const D_ROUNDS: usize = 4;

#[inline(always)]
fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

#[inline(always)]
fn sip_round(v: &mut [u64; 4]) {
    v[0] = v[0].wrapping_add(v[1]);
    v[2] = v[2].wrapping_add(v[3]);
    v[1] = v[1].rotate_left(13);
    v[3] = v[3].rotate_left(16);
    v[1] ^= v[0];
    v[3] ^= v[2];
    v[0] = v[0].rotate_left(32);
    v[2] = v[2].wrapping_add(v[1]);
    v[0] = v[0].wrapping_add(v[3]);
    v[1] = v[1].rotate_left(17);
    v[3] = v[3].rotate_left(21);
    v[1] ^= v[2];
    v[3] ^= v[0];
    v[2] = v[2].rotate_left(32);
}

/// One-shot SipHash-2-4 of a byte string.
pub fn siphash24(input: &[u8], key: &[u8; 16]) -> u64 {
    let mut state = SipState::new(key);
    let full = input.len() & !7;
    for block in input[..full].chunks_exact(8) {
        state.compress(read_u64_le(block));
    }
    let mut scratch = state;
    scratch.compress(partial_block_val(input, input.len(), full));
    scratch.finalize()
}

/// Hashes a byte string with the default seed.
pub fn hash_bytes(input: &[u8]) -> u64 {
    siphash24(input, &SIP_SEED)
}

/// The running state of a SipHash computation: the 4x64-bit vector.
///
/// Copyable so a caller can checkpoint it before finalizing.
#[derive(Debug, Clone, Copy)]
pub struct SipState {
    v: [u64; 4],
}

impl SipState {
    pub fn new(key: &[u8; 16]) -> Self {
        let k0 = read_u64_le(&key[0..8]);
        let k1 = read_u64_le(&key[8..16]);
        Self {
            v: [
                k0 ^ 0x736f6d6570736575,
                k1 ^ 0x646f72616e646f6d,
                k0 ^ 0x6c7967656e657261,
                k1 ^ 0x7465646279746573,
            ],
        }
    }

    pub fn with_default_seed() -> Self {
        Self::new(&SIP_SEED)
    }

    /// Runs one full 8-byte block through the compression rounds.
    #[inline]
    pub fn compress(&mut self, block: u64) {
        self.v[3] ^= block;
        for _ in 0..C_ROUNDS {
            sip_round(&mut self.v);
        }
        self.v[0] ^= block;
    }

    /// Finalization rounds. Consumes the state; callers finalizing a
    /// checkpoint copy keep their running state untouched.
    pub fn finalize(mut self) -> u64 {
        self.v[2] ^= 0xff;
        for _ in 0..D_ROUNDS {
            sip_round(&mut self.v);
        }
        self.v[0] ^ self.v[1] ^ self.v[2] ^ self.v[3]
    }

    /// Incrementally hash the prefix `base[..pfx_len]`, given that the
    /// running state has already absorbed all full blocks up to
    /// `prev_offset`. Advances the running state through any new full
    /// blocks, then finalizes on a scratch copy.
    ///
    /// The length byte folded into the last block is the *total* prefix
    /// length, matching the reference SipHash construction.
    pub fn hash_prefix(&mut self, base: &[u8], pfx_len: usize, prev_offset: usize) -> u64 {
        let cur_blk = prev_offset & !7;
        let next_blk = pfx_len & !7;
        let mut blk = cur_blk;
        while blk < next_blk {
            self.compress(read_u64_le(&base[blk..blk + 8]));
            blk += 8;
        }

        let mut scratch = *self;
        scratch.compress(partial_block_val(base, pfx_len, blk));
        scratch.finalize()
    }
}

/// Builds the final 64-bit block from the 0-7 trailing bytes of the prefix
/// plus one byte derived from the overall prefix length.
#[inline]
fn partial_block_val(base: &[u8], len: usize, pblk_offset: usize) -> u64 {
    let mut val = (len as u64 & 0xff) << 56;
    let partial = len & 0x7;
    for i in 0..partial {
        val |= (base[pblk_offset + i] as u64) << (8 * i);
    }
    val
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference key 00 01 02 .. 0f from the SipHash paper.
    const REF_KEY: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f,
    ];

    /// First entries of the official SipHash-2-4 test-vector table:
    /// vectors[i] = siphash24(&[0, 1, .., i-1], REF_KEY).
    const REF_VECTORS: [u64; 9] = [
        0x726fdb47dd0e0e31,
        0x74f839c593dc67fd,
        0x0d6c8009d9a94f5a,
        0x85676696d7fb7e2d,
        0xcf2794e0277187b7,
        0x18765564cd99a68d,
        0xcbc9466e58fee3ce,
        0xab0200f58b01d137,
        0x93f5f5799a932462,
    ];

    #[test]
    fn test_reference_vectors() {
        let input: Vec<u8> = (0u8..16).collect();
        for (len, expected) in REF_VECTORS.iter().enumerate() {
            assert_eq!(
                siphash24(&input[..len], &REF_KEY),
                *expected,
                "vector {} mismatch",
                len
            );
        }
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data: Vec<u8> = (0u8..64).map(|b| b.wrapping_mul(37)).collect();
        let mut state = SipState::with_default_seed();
        let mut prev = 0;
        // Walk through irregular prefix lengths covering partial and full
        // block boundaries.
        for &len in &[3usize, 8, 11, 16, 24, 29, 40, 64] {
            let inc = state.hash_prefix(&data, len, prev);
            assert_eq!(inc, hash_bytes(&data[..len]), "prefix len {}", len);
            prev = len;
        }
    }

    #[test]
    fn test_empty_input() {
        // Hash of the empty string is well-defined.
        let mut state = SipState::with_default_seed();
        assert_eq!(state.hash_prefix(&[], 0, 0), hash_bytes(&[]));
    }
}
