//! Forwarder data plane for rust-ccnx.
//!
//! The fast path: a shared hashtable substrate carrying both the FIB and
//! the PIT/CS, longest-prefix-match routing over incremental name hashes,
//! an intrusive LRU for the content store, a fixed-capacity face table,
//! and the per-packet forwarding node tying them together.

pub mod face;
pub mod fib;
pub mod hashtable;
pub mod node;
pub mod params;
pub mod pcs;
pub mod ticks;

pub use face::{Face, FaceDb};
pub use fib::{Fib, FibEntry};
pub use node::{process_packet, ForwarderState, Shard, Verdict};
pub use pcs::PitCs;
