//! Component registry: interface and bytecode by unit name

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ordo_artifact::{find_function, AbiEntry, Address};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Byte range of an unlinked library placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOffset {
    pub start: usize,
    pub length: usize,
}

/// Compiled component: interface, creation bytecode and link placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub abi: Vec<AbiEntry>,
    pub bytecode: String,
    #[serde(default)]
    pub link_references: BTreeMap<String, Vec<LinkOffset>>,
}

impl Component {
    #[must_use]
    pub fn new(name: impl Into<String>, abi: Vec<AbiEntry>, bytecode: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            abi,
            bytecode: bytecode.into(),
            link_references: BTreeMap::new(),
        }
    }

    /// Canonical signature of `name`, preferring the overload with `arity` inputs
    #[must_use]
    pub fn function_signature(&self, name: &str, arity: usize) -> Option<String> {
        find_function(&self.abi, name, arity).and_then(AbiEntry::canonical_signature)
    }

    /// Signature of the `initialize` overload taking `arity` arguments
    #[must_use]
    pub fn initializer(&self, arity: usize) -> Option<String> {
        self.function_signature("initialize", arity)
    }

    #[must_use]
    pub fn has_function(&self, name: &str) -> bool {
        self.abi.iter().any(|e| e.is_function() && e.name.as_deref() == Some(name))
    }

    /// Names of the libraries that must be linked before deployment
    #[must_use]
    pub fn required_libraries(&self) -> Vec<&str> {
        self.link_references.keys().map(String::as_str).collect()
    }

    /// Splice library addresses into the bytecode placeholders
    ///
    /// # Errors
    /// Returns error if a required library is missing or a placeholder lies
    /// outside the bytecode.
    pub fn link(&self, libraries: &BTreeMap<String, Address>) -> Result<String, RegistryError> {
        let (prefix, body) = match self.bytecode.strip_prefix("0x") {
            Some(body) => ("0x", body),
            None => ("", self.bytecode.as_str()),
        };
        let mut code = body.to_string();

        for (library, offsets) in &self.link_references {
            let address = libraries.get(library).ok_or_else(|| RegistryError::MissingLibrary {
                component: self.name.clone(),
                library: library.clone(),
            })?;
            let hex_addr = hex::encode(address);
            for offset in offsets {
                let begin = offset.start * 2;
                let end = begin + hex_addr.len();
                if offset.length != std::mem::size_of::<Address>() || end > code.len() || !code.is_char_boundary(begin) {
                    return Err(RegistryError::InvalidLinkReference {
                        component: self.name.clone(),
                        start: offset.start,
                    });
                }
                code.replace_range(begin..end, &hex_addr);
            }
        }

        Ok(format!("{prefix}{code}"))
    }
}

/// Lookup of compiled components by name
pub trait ComponentRegistry: Send + Sync {
    /// Resolve a component
    ///
    /// # Errors
    /// Returns error if the component is unknown or its build output is unreadable
    fn component(&self, name: &str) -> Result<Arc<Component>, RegistryError>;
}

/// Registry backed by a map, populated programmatically
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    components: RwLock<HashMap<String, Arc<Component>>>,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a component
    pub fn insert(&self, component: Component) {
        self.components
            .write()
            .insert(component.name.clone(), Arc::new(component));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }
}

impl ComponentRegistry for InMemoryRegistry {
    fn component(&self, name: &str) -> Result<Arc<Component>, RegistryError> {
        self.components
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }
}

/// Compiler output file as written by the build tool
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildOutput {
    contract_name: String,
    abi: Vec<AbiEntry>,
    bytecode: String,
    #[serde(default)]
    link_references: BTreeMap<String, BTreeMap<String, Vec<LinkOffset>>>,
}

/// Registry reading compiler output under a build directory
///
/// Files are found recursively as `<Name>.json`; `.dbg.json` debug files
/// are ignored. Parsed components are memoised.
#[derive(Debug)]
pub struct BuildDirRegistry {
    root: PathBuf,
    loaded: RwLock<HashMap<String, Arc<Component>>>,
}

impl BuildDirRegistry {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    fn locate(&self, name: &str) -> Result<Option<PathBuf>, RegistryError> {
        let wanted = format!("{name}.json");
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|source| RegistryError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.file_name().and_then(|f| f.to_str()) == Some(wanted.as_str()) {
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }

    fn parse(path: &Path) -> Result<Component, RegistryError> {
        let raw = fs::read(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let output: BuildOutput = serde_json::from_slice(&raw).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut link_references: BTreeMap<String, Vec<LinkOffset>> = BTreeMap::new();
        for per_library in output.link_references.into_values() {
            for (library, offsets) in per_library {
                link_references.entry(library).or_default().extend(offsets);
            }
        }

        Ok(Component {
            name: output.contract_name,
            abi: output.abi,
            bytecode: output.bytecode,
            link_references,
        })
    }
}

impl ComponentRegistry for BuildDirRegistry {
    fn component(&self, name: &str) -> Result<Arc<Component>, RegistryError> {
        if let Some(found) = self.loaded.read().get(name) {
            return Ok(Arc::clone(found));
        }
        let path = self
            .locate(name)?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let component = Arc::new(Self::parse(&path)?);
        tracing::debug!("Loaded component {} from {}", name, path.display());
        self.loaded.write().insert(name.to_string(), Arc::clone(&component));
        Ok(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked_component() -> Component {
        let mut c = Component::new("DIDRegistry", vec![], format!("0x6080{}6080", "0".repeat(40)));
        c.link_references
            .insert("DIDRegistryLibrary".to_string(), vec![LinkOffset { start: 2, length: 20 }]);
        c
    }

    #[test]
    fn link_splices_library_address() {
        let lib = Address::new([0xab; 20]);
        let libs = BTreeMap::from([("DIDRegistryLibrary".to_string(), lib)]);
        let linked = linked_component().link(&libs).unwrap();
        assert_eq!(linked, format!("0x6080{}6080", "ab".repeat(20)));
    }

    #[test]
    fn link_requires_every_library() {
        let err = linked_component().link(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, RegistryError::MissingLibrary { .. }));
    }

    #[test]
    fn initializer_by_arity() {
        let c = Component::new(
            "NFT",
            vec![
                AbiEntry::function("initialize", &["address", "address"]),
                AbiEntry::function("initialize", &["address", "address", "string"]),
            ],
            "0x",
        );
        assert_eq!(c.initializer(3).as_deref(), Some("initialize(address,address,string)"));
        assert_eq!(c.initializer(2).as_deref(), Some("initialize(address,address)"));
        assert!(c.has_function("initialize"));
        assert!(!c.has_function("upgrade"));

        let single = Component::new("Dispenser", vec![AbiEntry::function("initialize", &["address"])], "0x");
        assert_eq!(single.initializer(3), None);
        assert_eq!(single.initializer(0), None);
    }

    #[test]
    fn build_dir_lookup_skips_debug_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("contracts/registry/DIDRegistry.sol");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("DIDRegistry.dbg.json"), b"{}").unwrap();
        fs::write(
            nested.join("DIDRegistry.json"),
            br#"{
                "contractName": "DIDRegistry",
                "abi": [{"type":"function","name":"owner","inputs":[],"outputs":[{"name":"","type":"address"}]}],
                "bytecode": "0x60806040",
                "linkReferences": {"contracts/registry/DIDRegistryLibrary.sol": {"DIDRegistryLibrary": [{"start": 1, "length": 20}]}}
            }"#,
        )
        .unwrap();

        let registry = BuildDirRegistry::new(dir.path());
        let c = registry.component("DIDRegistry").unwrap();
        assert_eq!(c.bytecode, "0x60806040");
        assert_eq!(c.required_libraries(), vec!["DIDRegistryLibrary"]);
        assert!(matches!(registry.component("Missing"), Err(RegistryError::NotFound(_))));
    }
}
