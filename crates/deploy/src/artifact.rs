//! Compiled contract artifacts.
//!
//! Artifacts are Hardhat-style JSON files. Only the bytecode and the library
//! link references are used; the ABI is treated as opaque.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};

use alloy_core::primitives::{Address, Bytes};
use anyhow::{Context, Result};
use serde::Deserialize;

const ADDRESS_LENGTH: usize = 20;

/// Byte range of an unlinked library placeholder inside the bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkOffset {
    pub start: usize,
    pub length: usize,
}

/// A compiled contract or library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    /// Hex creation code, possibly containing `__$...$__` library placeholders.
    pub bytecode: String,
    /// Source file -> library name -> placeholder offsets.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkOffset>>>,
}

impl Artifact {
    /// Parses an artifact from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse contract artifact JSON")
    }

    /// Names of the libraries this artifact must be linked against.
    pub fn required_libraries(&self) -> impl Iterator<Item = &str> {
        self.link_references
            .values()
            .flat_map(|libraries| libraries.keys().map(String::as_str))
    }

    /// Returns the creation code with every library placeholder replaced.
    ///
    /// Every library named in the link references must be present in
    /// `libraries`; extra entries are ignored.
    pub fn linked_bytecode(&self, libraries: &[(&str, Address)]) -> Result<Bytes> {
        if !self.bytecode.is_ascii() {
            anyhow::bail!("Bytecode of {} is not valid hex", self.contract_name);
        }
        let prefix = if self.bytecode.starts_with("0x") { 2 } else { 0 };
        let mut code = self.bytecode.clone();

        for by_name in self.link_references.values() {
            for (name, offsets) in by_name {
                let address = libraries
                    .iter()
                    .find(|(library, _)| *library == name.as_str())
                    .map(|(_, address)| *address)
                    .with_context(|| format!("Missing address for library {name}"))?;
                let replacement = hex::encode(address.as_slice());

                for offset in offsets {
                    // Offsets count bytes, the code is hex.
                    let start = offset.start.checked_mul(2).and_then(|start| start.checked_add(prefix));
                    let end = start.and_then(|start| start.checked_add(ADDRESS_LENGTH * 2));
                    match (start, end) {
                        (Some(start), Some(end))
                            if offset.length == ADDRESS_LENGTH && end <= code.len() =>
                        {
                            code.replace_range(start..end, &replacement);
                        }
                        _ => anyhow::bail!(
                            "Invalid link reference for {name} at {}+{}",
                            offset.start,
                            offset.length
                        ),
                    }
                }
            }
        }

        let bytes = hex::decode(&code[prefix..]).with_context(|| {
            format!("Bytecode of {} is not valid hex (unlinked library?)", self.contract_name)
        })?;
        Ok(Bytes::from(bytes))
    }
}

/// Artifacts available to the run, indexed by contract name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: HashMap<String, Arc<Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` artifact found directly inside `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;

        let mut store = Self::new();
        for entry in entries {
            let path = entry.context("Failed to list artifacts directory")?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read artifact {}", path.display()))?;
            let artifact = Artifact::from_json(&content)
                .with_context(|| format!("Invalid artifact {}", path.display()))?;
            tracing::debug!(contract = %artifact.contract_name, path = %path.display(), "Loaded artifact");
            store.insert(artifact);
        }

        tracing::info!(dir = %dir.display(), count = store.artifacts.len(), "Artifacts loaded");
        Ok(store)
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts
            .insert(artifact.contract_name.clone(), Arc::new(artifact));
    }

    /// Returns the artifact for `contract_name`.
    pub fn get(&self, contract_name: &str) -> Result<Arc<Artifact>> {
        self.artifacts
            .get(contract_name)
            .cloned()
            .with_context(|| format!("Missing artifact for contract {contract_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;

    const PLACEHOLDER: &str = "__$cea9be979eee3d87fb124d6cbb244bb0b5$__";

    fn descriptor_artifact() -> Artifact {
        let json = format!(
            r#"{{
                "contractName": "NonfungibleTokenPositionDescriptor",
                "abi": [],
                "bytecode": "0x6001{PLACEHOLDER}6002",
                "linkReferences": {{
                    "contracts/libraries/NFTDescriptor.sol": {{
                        "NFTDescriptor": [{{ "start": 2, "length": 20 }}]
                    }}
                }}
            }}"#
        );
        Artifact::from_json(&json).unwrap()
    }

    #[test]
    fn test_plain_bytecode() {
        let artifact = Artifact::from_json(
            r#"{"contractName": "TickLens", "abi": [], "bytecode": "0x60806040"}"#,
        )
        .unwrap();

        assert_eq!(artifact.required_libraries().count(), 0);
        assert_eq!(
            artifact.linked_bytecode(&[]).unwrap(),
            Bytes::from(vec![0x60, 0x80, 0x60, 0x40])
        );
    }

    #[test]
    fn test_link_library() {
        let artifact = descriptor_artifact();
        let library = address!("1111111111111111111111111111111111111111");

        assert_eq!(artifact.required_libraries().collect::<Vec<_>>(), vec!["NFTDescriptor"]);

        let code = artifact.linked_bytecode(&[("NFTDescriptor", library)]).unwrap();
        assert_eq!(code.len(), 24);
        assert_eq!(&code[..2], &[0x60, 0x01]);
        assert_eq!(&code[2..22], library.as_slice());
        assert_eq!(&code[22..], &[0x60, 0x02]);
    }

    #[test]
    fn test_link_missing_library() {
        let err = descriptor_artifact().linked_bytecode(&[]).unwrap_err();
        assert!(err.to_string().contains("Missing address for library NFTDescriptor"));
    }

    #[test]
    fn test_link_rejects_out_of_range_offsets() {
        let library = [("NFTDescriptor", Address::ZERO)];

        let offsets = [
            LinkOffset { start: usize::MAX, length: 20 },
            LinkOffset { start: usize::MAX / 2, length: 20 },
            LinkOffset { start: 20, length: 20 },
            LinkOffset { start: 2, length: usize::MAX },
        ];
        for offset in offsets {
            let mut artifact = descriptor_artifact();
            artifact.link_references.values_mut().for_each(|by_name| {
                by_name.insert("NFTDescriptor".into(), vec![offset]);
            });

            let err = artifact.linked_bytecode(&library).unwrap_err();
            assert!(err.to_string().contains("Invalid link reference for NFTDescriptor"));
        }
    }

    #[test]
    fn test_link_rejects_non_ascii_bytecode() {
        let mut artifact = descriptor_artifact();
        artifact.bytecode = format!("0x60é{PLACEHOLDER}6002");

        let err = artifact
            .linked_bytecode(&[("NFTDescriptor", Address::ZERO)])
            .unwrap_err();
        assert!(err.to_string().contains("not valid hex"));
    }

    #[test]
    fn test_store_lookup() {
        let mut store = ArtifactStore::new();
        store.insert(descriptor_artifact());

        assert!(store.get("NonfungibleTokenPositionDescriptor").is_ok());
        assert!(store.get("UniswapV3Factory").is_err());
    }
}
