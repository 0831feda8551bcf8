//! Ordo Artifact System
//!
//! Ledger primitives and the durable record of what has been deployed.
//!
//! # Core Concepts
//!
//! - [`Address`] / [`B256`] / [`U256`]: ledger values from `alloy-primitives`
//! - [`selector`]: 4-byte function selector derived with keccak-256
//! - [`IMPLEMENTATION_SLOT`] / [`ADMIN_SLOT`]: EIP-1967 proxy slots
//! - [`AbiEntry`]: interface description entry, carrying its derived selector
//! - [`Artifact`]: exported record of one unit on one network
//! - [`ArtifactStore`]: atomic, per-network artifact files plus the `ready` sentinel
//!
//! # Example
//!
//! ```rust,ignore
//! use ordo_artifact::{Artifact, ArtifactStore};
//!
//! let store = ArtifactStore::new("artifacts", "mumbai");
//! store.begin_export()?;
//! store.write(&Artifact::new("DIDRegistry", abi, bytecode).with_address(addr))?;
//! store.finalize()?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod abi;
mod artifact;
mod selector;
mod slots;
mod store;

// Re-exports
pub use abi::{find_function, with_signatures, AbiEntry, AbiParam};
pub use alloy_primitives::{keccak256, Address, Bytes, Selector, B256, U256};
pub use artifact::Artifact;
pub use selector::{canonical_signature, selector};
pub use slots::{ADMIN_SLOT, IMPLEMENTATION_SLOT};
pub use store::{write_bytes_atomic, write_json_atomic, ArtifactStore, StoreError, READY_SENTINEL};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn exported_artifact_carries_selectors_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "local");
        let abi = vec![
            AbiEntry::function("transferOwnership", &["address"]),
            AbiEntry::function("owner", &[]).returns(&["address"]),
        ];
        store
            .write(&Artifact::new("NeverminedConfig", abi, "0x60").with_address(Address::new([9; 20])))
            .unwrap();

        let raw = std::fs::read_to_string(store.path_for("NeverminedConfig")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["abi"][0]["signature"], "0xf2fde38b");
        assert_eq!(json["abi"][1]["signature"], "0x8da5cb5b");
    }
}
