//! Extraction and stable hashing of a node's public surface.
//!
//! A cheap proxy for "did this node's API break?": top-level exported Go
//! declarations are extracted by line regex, sorted, and hashed. No parser is
//! involved, so the hash is stable across formatting-only edits to bodies but
//! changes whenever an exported signature appears, disappears, or is renamed.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Matches a top-level keyword followed by an identifier starting with an
/// uppercase letter, optionally behind a method-receiver parenthesis.
static EXPORTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(func|type|var|const)\s+(\(?[A-Z][^\s(]*)").unwrap());

/// True for source files whose exports contribute to the contract hash.
pub fn is_contract_source(file_name: &str) -> bool {
    file_name.ends_with(".go") && !file_name.ends_with("_test.go")
}

/// Extract exported declaration signatures from source text.
pub fn extract_signatures(content: &str) -> Vec<String> {
    let mut signatures = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        let Some(caps) = EXPORTED_RE.captures(line) else {
            continue;
        };
        let keyword = &caps[1];
        if keyword == "func" {
            signatures.push(func_signature(line));
        } else {
            let symbol = caps[2].trim_start_matches('(');
            signatures.push(format!("{keyword} {symbol}"));
        }
    }
    signatures
}

/// Hash a signature list: sort, join with newlines, SHA-256 hex.
///
/// Sorting makes the hash independent of file and declaration order. An empty
/// list hashes to a stable value as well.
pub fn hash_signatures(mut signatures: Vec<String>) -> String {
    signatures.sort();
    let combined = signatures.join("\n");
    let digest = Sha256::digest(combined.as_bytes());
    format!("{digest:x}")
}

/// The full `func` declaration up to (excluding) the opening brace.
fn func_signature(line: &str) -> String {
    match line.find('{') {
        Some(idx) => line[..idx].trim().to_string(),
        None => line.trim().to_string(),
    }
}
