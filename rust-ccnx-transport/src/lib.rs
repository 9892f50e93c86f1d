//! Consumer transport for rust-ccnx.
//!
//! The portal owns one socket to a local forwarder and a registry of
//! pending interests with exactly-once dispatch. On top sit two fetch
//! protocols sharing one pipeline: the vanilla windowed fetcher with
//! fast retransmit, and the RAAQM overlay with per-path drop control.

pub mod connector;
pub mod consumer;
pub mod message;
pub mod portal;
pub mod raaqm;
pub mod raaqm_config;
pub mod raaqm_path;
pub mod rate;
pub mod rto;
pub mod vegas;

pub use consumer::{ConsumerSocket, ProtocolKind, StopHandle};
pub use portal::{Portal, PortalEvent};
pub use raaqm::RaaqmRules;
pub use raaqm_config::RaaqmConfig;
pub use vegas::{ConsumerCallbacks, TransportOptions, VegasTransport};
