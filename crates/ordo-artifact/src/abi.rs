//! Interface descriptions as emitted by the compiler
//!
//! Entries keep any fields this crate does not interpret so that an
//! artifact written back to disk loses nothing.

use serde::{Deserialize, Serialize};

use alloy_primitives::Selector;

use crate::selector::{canonical_signature, selector};

/// One parameter of a function, event or constructor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub ty: String,

    #[serde(rename = "internalType", default, skip_serializing_if = "Option::is_none")]
    pub internal_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<AbiParam>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed: Option<bool>,
}

impl AbiParam {
    /// Unnamed parameter of the given type
    #[must_use]
    pub fn of_type(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            ..Self::default()
        }
    }

    /// Canonical type string, with tuples expanded into their component types
    #[must_use]
    pub fn canonical_type(&self) -> String {
        match (self.ty.strip_prefix("tuple"), &self.components) {
            (Some(suffix), Some(components)) => {
                let inner: Vec<String> = components.iter().map(Self::canonical_type).collect();
                format!("({}){suffix}", inner.join(","))
            }
            _ => self.ty.clone(),
        }
    }
}

/// One entry of an interface description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbiEntry {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub inputs: Vec<AbiParam>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<AbiParam>>,

    #[serde(rename = "stateMutability", default, skip_serializing_if = "Option::is_none")]
    pub state_mutability: Option<String>,

    /// `0x`-prefixed 4-byte selector, present on function entries of exported artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AbiEntry {
    /// Function entry with the given parameter types
    #[must_use]
    pub fn function(name: impl Into<String>, input_types: &[&str]) -> Self {
        Self {
            kind: "function".to_string(),
            name: Some(name.into()),
            inputs: input_types.iter().map(|t| AbiParam::of_type(*t)).collect(),
            outputs: Some(Vec::new()),
            state_mutability: Some("nonpayable".to_string()),
            signature: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Declare the output types of a function entry
    #[must_use]
    pub fn returns(mut self, output_types: &[&str]) -> Self {
        self.outputs = Some(output_types.iter().map(|t| AbiParam::of_type(*t)).collect());
        self.state_mutability = Some("view".to_string());
        self
    }

    #[inline]
    #[must_use]
    pub fn is_function(&self) -> bool {
        self.kind == "function"
    }

    /// `name(type1,type2)` for function entries
    #[must_use]
    pub fn canonical_signature(&self) -> Option<String> {
        if !self.is_function() {
            return None;
        }
        let name = self.name.as_deref()?;
        let types: Vec<String> = self.inputs.iter().map(AbiParam::canonical_type).collect();
        Some(canonical_signature(name, &types))
    }

    /// Derived `0x`-prefixed selector for function entries
    #[must_use]
    pub fn selector(&self) -> Option<Selector> {
        self.canonical_signature().map(|s| selector(&s))
    }
}

/// Attach the derived `signature` field to every function entry
#[must_use]
pub fn with_signatures(abi: Vec<AbiEntry>) -> Vec<AbiEntry> {
    abi.into_iter()
        .map(|mut entry| {
            if let Some(sel) = entry.selector() {
                entry.signature = Some(sel.to_string());
            }
            entry
        })
        .collect()
}

/// Find the overload of `name` taking exactly `arity` inputs
#[must_use]
pub fn find_function<'a>(abi: &'a [AbiEntry], name: &str, arity: usize) -> Option<&'a AbiEntry> {
    abi.iter()
        .find(|e| e.is_function() && e.name.as_deref() == Some(name) && e.inputs.len() == arity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<AbiEntry> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn signature_derived_for_functions_only() {
        let abi = parse(
            r#"[
                {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"v","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
                {"type":"event","name":"Transfer","inputs":[],"anonymous":false},
                {"type":"constructor","inputs":[]}
            ]"#,
        );
        let abi = with_signatures(abi);
        assert_eq!(abi[0].signature.as_deref(), Some("0xa9059cbb"));
        assert_eq!(abi[1].signature, None);
        assert_eq!(abi[2].signature, None);
    }

    #[test]
    fn unknown_fields_survive() {
        let abi = parse(r#"[{"type":"event","name":"E","inputs":[],"anonymous":true}]"#);
        let json = serde_json::to_value(&abi).unwrap();
        assert_eq!(json[0]["anonymous"], serde_json::Value::Bool(true));
    }

    #[test]
    fn tuple_types_expand() {
        let abi = parse(
            r#"[{"type":"function","name":"f","inputs":[
                {"name":"a","type":"tuple[]","components":[{"name":"x","type":"address"},{"name":"y","type":"uint256"}]},
                {"name":"b","type":"bytes32"}
            ]}]"#,
        );
        assert_eq!(
            abi[0].canonical_signature().as_deref(),
            Some("f((address,uint256)[],bytes32)")
        );
    }

    #[test]
    fn find_function_by_arity() {
        let abi = vec![
            AbiEntry::function("initialize", &["address"]),
            AbiEntry::function("initialize", &["address", "address"]),
        ];
        let two = find_function(&abi, "initialize", 2).unwrap();
        assert_eq!(two.inputs.len(), 2);
        assert!(find_function(&abi, "initialize", 3).is_none());
        assert!(find_function(&abi, "initialize", 0).is_none());
        assert!(find_function(&abi, "missing", 0).is_none());
    }
}
