//! Daemon configuration: defaults, optional file, environment overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use rust_ccnx_fwd::params;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Control/data listen address.
    pub listen: String,
    pub fib_size: u32,
    pub pit_size: u32,
    /// CS entry cap; 0 disables caching.
    pub cs_lru_max: u32,
    pub cs_serve: bool,
    pub cs_store: bool,
    pub pit_lifetime_min_ms: u64,
    pub pit_lifetime_dflt_ms: u64,
    pub pit_lifetime_max_ms: u64,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("listen", "127.0.0.1:9695")?
            .set_default("fib_size", params::FIB_ENTRIES_DFLT as i64)?
            .set_default("pit_size", params::PIT_ENTRIES_DFLT as i64)?
            .set_default("cs_lru_max", params::CS_LRU_DEFAULT as i64)?
            .set_default("cs_serve", true)?
            .set_default("cs_store", true)?
            .set_default("pit_lifetime_min_ms", params::PIT_LIFETIME_DFLT_MIN_MS as i64)?
            .set_default("pit_lifetime_dflt_ms", params::PIT_LIFETIME_DFLT_DFLT_MS as i64)?
            .set_default("pit_lifetime_max_ms", params::PIT_LIFETIME_DFLT_MAX_MS as i64)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }
        builder = builder.add_source(config::Environment::with_prefix("CCNXD"));

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .context("loading daemon settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::load(None).unwrap();
        assert_eq!(s.listen, "127.0.0.1:9695");
        assert_eq!(s.fib_size, params::FIB_ENTRIES_DFLT);
        assert!(s.cs_serve);
        assert!(s.cs_store);
    }
}
