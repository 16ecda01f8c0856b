//! Persisted contract hashes and the node-directory hashing entry point.
//!
//! Hashes live at `.agentic/contracts.json` and are only read-modify-written
//! from serial phases (load, apply), never from the parallel pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::core::contract::{extract_signatures, hash_signatures, is_contract_source};
use crate::io::layout::write_atomic;

/// Hash the exported declarations under a node directory.
///
/// Walks contract-relevant source files in sorted order so the resulting
/// signature list (and therefore the hash) is stable across runs.
pub fn hash_node_contracts(node_dir: &Path) -> Result<String> {
    let mut signatures = Vec::new();

    for entry in WalkDir::new(node_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", node_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_contract_source(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let content = fs::read_to_string(entry.path())
            .with_context(|| format!("read {}", entry.path().display()))?;
        signatures.extend(extract_signatures(&content));
    }

    Ok(hash_signatures(signatures))
}

/// Contract hashes for all nodes, persisted as `{"hashes": {id: hex}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractHashStore {
    pub hashes: BTreeMap<String, String>,
}

impl ContractHashStore {
    /// Load the store; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    }

    /// Atomically persist the store, creating `.agentic/` as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(self).context("serialize contract hashes")?;
        buf.push('\n');
        write_atomic(path, &buf)
    }

    pub fn get(&self, node_id: &str) -> Option<&str> {
        self.hashes.get(node_id).map(String::as_str)
    }

    pub fn set(&mut self, node_id: impl Into<String>, hash: impl Into<String>) {
        self.hashes.insert(node_id.into(), hash.into());
    }

    /// True when the node has no stored hash or the stored hash differs.
    pub fn has_changed(&self, node_id: &str, new_hash: &str) -> bool {
        match self.get(node_id) {
            Some(stored) => stored != new_hash,
            None => true,
        }
    }
}
