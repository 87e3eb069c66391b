//! Utility functions for identity generation.

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::{LedgerError, Result};

// construct a unique entity id then encode using bech32
pub fn new_entity_id(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|err| LedgerError::Validation(format!("invalid id prefix {hrp:?}: {err}")))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|err| LedgerError::Validation(format!("failed to encode entity id: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_unique_prefixed_ids() {
        let a = new_entity_id("sup").unwrap();
        let b = new_entity_id("sup").unwrap();

        assert!(a.starts_with("sup1"));
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_empty_prefix() {
        assert!(new_entity_id("").is_err());
    }
}
