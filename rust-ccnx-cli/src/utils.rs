use anyhow::{bail, Result};
use rust_ccnx_common::mgmt::valid_symbolic;

/// Symbolic names must be a letter followed by letters or digits.
pub fn check_symbolic(name: &str) -> Result<()> {
    if !valid_symbolic(name) {
        bail!(
            "invalid symbolic name '{}': expected [A-Za-z][A-Za-z0-9]*",
            name
        );
    }
    Ok(())
}

/// clap value parser for on/off toggles.
pub fn parse_on_off(value: &str) -> Result<bool, String> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected 'on' or 'off', got '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_off() {
        assert_eq!(parse_on_off("on"), Ok(true));
        assert_eq!(parse_on_off("off"), Ok(false));
        assert!(parse_on_off("maybe").is_err());
    }

    #[test]
    fn test_symbolic() {
        assert!(check_symbolic("conn0").is_ok());
        assert!(check_symbolic("0conn").is_err());
    }
}
