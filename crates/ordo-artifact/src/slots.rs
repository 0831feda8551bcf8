//! EIP-1967 proxy storage slots
//!
//! Transparent proxies keep their implementation and admin addresses in
//! fixed slots, each `keccak256(label) - 1`, stored as left-padded words.

use alloy_primitives::{b256, B256};

/// Slot holding a transparent proxy's implementation address
pub const IMPLEMENTATION_SLOT: B256 = b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// Slot holding a transparent proxy's admin address
pub const ADMIN_SLOT: B256 = b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

#[cfg(test)]
mod tests {
    use alloy_primitives::{keccak256, Address, U256};

    use super::*;

    fn derived(label: &str) -> B256 {
        let slot = U256::from_be_bytes(keccak256(label).0) - U256::from(1);
        B256::from(slot.to_be_bytes::<32>())
    }

    #[test]
    fn slots_follow_the_labels() {
        assert_eq!(IMPLEMENTATION_SLOT, derived("eip1967.proxy.implementation"));
        assert_eq!(ADMIN_SLOT, derived("eip1967.proxy.admin"));
    }

    #[test]
    fn slot_word_holds_address_in_low_bytes() {
        let addr = Address::new([0xff; 20]);
        let word = addr.into_word();
        assert!(word.0[..12].iter().all(|b| *b == 0));
        assert_eq!(Address::from_word(word), addr);
    }
}
