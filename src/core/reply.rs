//! Extraction of complete file bodies from an agent reply.
//!
//! The envelope is lightly structured text: each file is delimited by
//! `=== FILE: path ===` / `=== END FILE ===`. Parsing either yields every
//! file completely or rejects the whole reply; a truncated reply must never
//! silently stage a half-file.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

const FILE_START: &str = "=== FILE:";
const FILE_END: &str = "=== END FILE ===";

static FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)=== FILE: (.+?) ===\n(.*?)=== END FILE ===").unwrap());

/// Validates source text before it is accepted from a reply or written to
/// disk. The contract is: given `(path, content)`, return ok or a
/// human-readable error. Non-source paths must return ok.
pub trait SyntaxChecker {
    fn check(&self, path: &str, content: &str) -> Result<(), String>;
}

/// A checker that accepts everything. Used where no validator is configured.
pub struct NullChecker;

impl SyntaxChecker for NullChecker {
    fn check(&self, _path: &str, _content: &str) -> Result<(), String> {
        Ok(())
    }
}

/// A complete file extracted from a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFile {
    pub path: String,
    pub content: String,
}

/// Parsed agent reply: zero or more complete files plus a free-form message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub files: Vec<ReplyFile>,
    pub message: String,
}

/// Parse failures that abort staging for the node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("reply truncated: {started} started, {ended} ended")]
    Truncated { started: usize, ended: usize },
    #[error("syntax error in {path}: {detail}")]
    SyntaxInvalid { path: String, detail: String },
}

/// Extract complete files from a raw reply.
///
/// `bundle_files` (path -> content, repo-root relative) gates the markdown
/// fallback: a `### path` section is only accepted when the path already
/// exists in the bundle. When no files can be extracted at all, the sanitized
/// reply text becomes `Reply.message`.
pub fn parse_reply(
    raw: &str,
    bundle_files: &BTreeMap<String, String>,
    checker: &dyn SyntaxChecker,
) -> Result<Reply, ReplyError> {
    let sanitized = sanitize(raw);

    let started = sanitized.matches(FILE_START).count();
    let ended = sanitized.matches(FILE_END).count();
    if started != ended {
        return Err(ReplyError::Truncated { started, ended });
    }

    let mut files = Vec::new();
    for caps in FILE_RE.captures_iter(&sanitized) {
        let path = caps[1].trim().to_string();
        let content = caps[2].strip_suffix('\n').unwrap_or(&caps[2]).to_string();
        check_syntax(checker, &path, &content)?;
        files.push(ReplyFile { path, content });
    }

    if files.is_empty() {
        files = extract_from_code_blocks(&sanitized, bundle_files);
        for file in &files {
            check_syntax(checker, &file.path, &file.content)?;
        }
    }

    if files.is_empty() {
        return Ok(Reply {
            files,
            message: sanitized,
        });
    }

    Ok(Reply {
        files,
        message: String::new(),
    })
}

/// Render files back into the reply envelope. Inverse of [`parse_reply`] for
/// well-formed replies with at least one file.
pub fn format_files(files: &[ReplyFile]) -> String {
    let mut out = String::new();
    for file in files {
        out.push_str(&format!("=== FILE: {} ===\n", file.path));
        out.push_str(&file.content);
        out.push('\n');
        out.push_str(FILE_END);
        out.push('\n');
    }
    out
}

fn check_syntax(checker: &dyn SyntaxChecker, path: &str, content: &str) -> Result<(), ReplyError> {
    checker
        .check(path, content)
        .map_err(|detail| ReplyError::SyntaxInvalid {
            path: path.to_string(),
            detail,
        })
}

/// Strip markdown-fence wrapping and any preamble before the first file
/// marker.
fn sanitize(raw: &str) -> String {
    let mut s = raw;
    s = s.strip_prefix("```go\n").unwrap_or(s);
    s = s.strip_prefix("```\n").unwrap_or(s);
    s = s.strip_suffix("\n```").unwrap_or(s);
    s = s.strip_suffix("```").unwrap_or(s);

    if let Some(idx) = s.find(FILE_START) {
        if idx > 0 {
            s = &s[idx..];
        }
    }

    s.trim().to_string()
}

/// Fallback: markdown sections of the form `### path` followed by a fenced
/// code block, accepted only for paths already present in the bundle.
fn extract_from_code_blocks(
    response: &str,
    bundle_files: &BTreeMap<String, String>,
) -> Vec<ReplyFile> {
    let mut files = Vec::new();
    let mut current_path: Option<String> = None;
    let mut in_code_block = false;
    let mut content = String::new();

    for line in response.lines() {
        if let Some(rest) = line.strip_prefix("### ") {
            let path = rest.trim();
            if bundle_files.contains_key(path) {
                current_path = Some(path.to_string());
            }
            continue;
        }

        if line.starts_with("```") && !in_code_block {
            in_code_block = true;
            content.clear();
            continue;
        }

        if line == "```" && in_code_block {
            in_code_block = false;
            if let Some(path) = current_path.take() {
                if !content.is_empty() {
                    files.push(ReplyFile {
                        path,
                        content: content.strip_suffix('\n').unwrap_or(&content).to_string(),
                    });
                }
            }
            continue;
        }

        if in_code_block {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(line);
        }
    }

    files
}
