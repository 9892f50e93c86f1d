//! Common types and utilities for the rust-ccnx stack.
//!
//! Shared between the forwarder data plane, the consumer transport, and
//! the management CLI: names and their wire form, the TLV codec, packet
//! types, the SipHash-2-4 engine with its incremental prefix-hashing mode,
//! error types, and metrics counters.

pub mod error;
pub mod hasher;
pub mod metrics;
pub mod mgmt;
pub mod name;
pub mod packet;
pub mod siphash;
pub mod tlv;

pub use error::{Error, Result};
pub use name::{Name, NameComponent};
pub use packet::{ContentObject, Interest};
