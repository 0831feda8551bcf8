//! Exported deployment artifact

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::abi::{with_signatures, AbiEntry};
use alloy_primitives::Address;

/// Durable record of one deployed unit on one network
///
/// Field names follow the JSON layout consumed by downstream tooling.
/// `implementation` equals `address` for units deployed without a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Artifact {
    pub name: String,

    #[serde(default)]
    pub abi: Vec<AbiEntry>,

    #[serde(default)]
    pub bytecode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Address>,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub libraries: BTreeMap<String, Address>,
}

impl Artifact {
    /// Create a new artifact; function entries get their selector attached
    #[must_use]
    pub fn new(name: impl Into<String>, abi: Vec<AbiEntry>, bytecode: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            abi: with_signatures(abi),
            bytecode: bytecode.into(),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_implementation(mut self, implementation: Address) -> Self {
        self.implementation = Some(implementation);
        self
    }

    /// Version tag, stored as `v<version>`
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = if version.starts_with('v') {
            version.to_string()
        } else {
            format!("v{version}")
        };
        self
    }

    #[inline]
    #[must_use]
    pub fn with_libraries(mut self, libraries: BTreeMap<String, Address>) -> Self {
        self.libraries = libraries;
        self
    }

    /// A unit counts as deployed once its artifact carries a non-zero address
    #[inline]
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        self.address.is_some_and(|a| !a.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_artifact_has_signatures() {
        let art = Artifact::new("Token", vec![AbiEntry::function("transfer", &["address", "uint256"])], "0x00");
        assert_eq!(art.abi[0].signature.as_deref(), Some("0xa9059cbb"));
        assert!(!art.is_deployed());
    }

    #[test]
    fn version_prefix_applied_once() {
        assert_eq!(Artifact::default().with_version("1.2.0").version, "v1.2.0");
        assert_eq!(Artifact::default().with_version("v1.2.0").version, "v1.2.0");
    }

    #[test]
    fn missing_address_omitted_from_json() {
        let json = serde_json::to_value(Artifact::new("X", vec![], "0x")).unwrap();
        assert!(json.get("address").is_none());
        assert!(json.get("implementation").is_none());
    }

    #[test]
    fn zero_address_is_not_deployed() {
        let art = Artifact::default().with_address(Address::ZERO);
        assert!(!art.is_deployed());
    }
}
