//! Error types for the rust-ccnx implementation.

use thiserror::Error;

/// All possible errors that can occur within the rust-ccnx core.
///
/// Data-plane operations propagate these up to the forwarding node, which
/// converts them into drop counters; packets are dropped, never crash.
#[derive(Error, Debug)]
pub enum Error {
    /// Null/empty input where forbidden, out-of-range sizes, bad versions.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A pool or arena allocation could not be satisfied.
    #[error("out of memory")]
    OutOfMemory,

    /// Lookup miss in FIB/PIT/CS/face-table.
    #[error("not found")]
    NotFound,

    /// Re-insertion where the contract forbids it.
    #[error("already exists: {0}")]
    Duplicate(String),

    /// A fixed-capacity structure is full.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Malformed wire bytes: length overruns, wrong version, missing name.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// LPM yielded nothing and no default route is installed.
    #[error("no route")]
    NoRoute,

    /// The retransmission budget was exhausted.
    #[error("timeout")]
    Timeout,

    /// The portal socket closed and the reconnection window elapsed.
    #[error("link down")]
    LinkDown,

    /// Internal structure corruption (double free, LRU inconsistency).
    /// Assert-fails in debug builds before this is ever returned.
    #[error("corruption: {0}")]
    Corruption(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
