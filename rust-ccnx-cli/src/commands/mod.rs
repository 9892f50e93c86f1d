//! Command execution against the forwarder's control surface.

mod control;
mod fetch;

pub use control::control;
pub use fetch::fetch;
