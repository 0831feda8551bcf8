//! 4-byte function selectors

use alloy_primitives::{keccak256, Selector};

/// First four bytes of keccak-256 over a canonical signature such as `transfer(address,uint256)`
#[must_use]
pub fn selector(signature: &str) -> Selector {
    let [a, b, c, d, ..] = keccak256(signature.as_bytes()).0;
    Selector::new([a, b, c, d])
}

/// Build `name(type1,type2,...)` from a function name and canonical parameter types
#[must_use]
pub fn canonical_signature<S: AsRef<str>>(name: &str, types: &[S]) -> String {
    let joined = types.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",");
    format!("{name}({joined})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erc20_transfer_selector() {
        assert_eq!(selector("transfer(address,uint256)").to_string(), "0xa9059cbb");
    }

    #[test]
    fn owner_selector() {
        assert_eq!(selector("owner()").to_string(), "0x8da5cb5b");
    }

    #[test]
    fn burn_selector() {
        assert_eq!(selector("burn(uint256)").to_string(), "0x42966c68");
    }

    #[test]
    fn signature_formatting() {
        assert_eq!(canonical_signature("f", &["address", "uint256"]), "f(address,uint256)");
        assert_eq!(canonical_signature::<&str>("g", &[]), "g()");
    }
}
