//! Agent adapters behind the [`Agent`] seam.
//!
//! The orchestrator builds the prompt and parses the reply; an adapter's only
//! job is to get raw model text back for a prompt. The adapter is chosen by
//! the `AGENTIC_BRAIN` environment variable (default `claude`). Tests use
//! scripted agents that never spawn processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::io::config::AgenticConfig;
use crate::io::process::run_command_with_timeout;

/// Environment variable selecting the agent adapter.
pub const BRAIN_ENV: &str = "AGENTIC_BRAIN";

/// A language-model backend that answers one prompt with raw text.
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the agent and return its raw reply text.
    fn call(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("{0} adapter not implemented yet")]
    NotImplemented(&'static str),
    #[error("unknown agent adapter: {0}")]
    Unknown(String),
}

/// Construct the adapter named by `AGENTIC_BRAIN`.
pub fn from_env(root: &Path, cfg: &AgenticConfig) -> Result<Box<dyn Agent>> {
    let name = std::env::var(BRAIN_ENV).unwrap_or_else(|_| "claude".to_string());
    from_name(&name, root, cfg)
}

/// Construct an adapter by name.
pub fn from_name(name: &str, root: &Path, cfg: &AgenticConfig) -> Result<Box<dyn Agent>> {
    match name {
        "claude" => Ok(Box::new(ClaudeAdapter {
            workdir: root.to_path_buf(),
            timeout: Duration::from_secs(cfg.agent_timeout_secs),
            output_limit_bytes: cfg.agent_output_limit_bytes,
        })),
        "gemini" => Ok(Box::new(GeminiAdapter)),
        "codex" => Ok(Box::new(CodexAdapter)),
        other => Err(AgentError::Unknown(other.to_string()).into()),
    }
}

/// Adapter that spawns the `claude` CLI.
pub struct ClaudeAdapter {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Agent for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn call(&self, prompt: &str) -> Result<String> {
        info!(workdir = %self.workdir.display(), "calling claude");

        let mut cmd = Command::new("claude");
        cmd.args(["-p", prompt, "--output-format", "json"])
            .current_dir(&self.workdir);

        let output =
            run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
                .context("run claude (is the Claude CLI installed?)")?;

        if output.timed_out {
            bail!("claude call timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            bail!(
                "claude command failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let raw = String::from_utf8_lossy(&output.stdout).to_string();
        let text = parse_claude_envelope(&raw)?;
        debug!(reply_bytes = text.len(), "claude replied");
        Ok(text)
    }
}

/// The JSON envelope printed by `claude --output-format json`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClaudeEnvelope {
    result: String,
    is_error: bool,
}

/// Decode the CLI's JSON envelope; non-JSON output is passed through as-is so
/// an adapter misconfiguration degrades to the reply parser's fallbacks.
fn parse_claude_envelope(raw: &str) -> Result<String> {
    match serde_json::from_str::<ClaudeEnvelope>(raw) {
        Ok(envelope) if envelope.is_error => Err(anyhow!("claude error: {}", envelope.result)),
        Ok(envelope) => Ok(envelope.result),
        Err(_) => Ok(raw.to_string()),
    }
}

pub struct GeminiAdapter;

impl Agent for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn call(&self, _prompt: &str) -> Result<String> {
        Err(AgentError::NotImplemented("gemini").into())
    }
}

pub struct CodexAdapter;

impl Agent for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn call(&self, _prompt: &str) -> Result<String> {
        Err(AgentError::NotImplemented("codex").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_result_is_extracted() {
        let raw = r#"{"type":"result","result":"=== FILE: a.go ===","is_error":false}"#;
        assert_eq!(
            parse_claude_envelope(raw).expect("parse"),
            "=== FILE: a.go ==="
        );
    }

    #[test]
    fn envelope_error_is_surfaced() {
        let raw = r#"{"result":"quota exhausted","is_error":true}"#;
        let err = parse_claude_envelope(raw).unwrap_err();
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[test]
    fn non_json_output_passes_through() {
        let raw = "=== FILE: a.go ===\npackage a\n=== END FILE ===";
        assert_eq!(parse_claude_envelope(raw).expect("parse"), raw);
    }

    #[test]
    fn adapters_resolve_by_name() {
        let cfg = AgenticConfig::default();
        let root = Path::new(".");
        assert_eq!(from_name("claude", root, &cfg).expect("claude").name(), "claude");
        assert_eq!(from_name("gemini", root, &cfg).expect("gemini").name(), "gemini");
        assert_eq!(from_name("codex", root, &cfg).expect("codex").name(), "codex");

        let err = match from_name("cortex", root, &cfg) {
            Err(e) => e,
            Ok(_) => panic!("expected error for unknown agent adapter"),
        };
        assert!(err.to_string().contains("unknown agent adapter: cortex"));
    }

    #[test]
    fn placeholder_adapters_report_not_implemented() {
        let err = GeminiAdapter.call("prompt").unwrap_err();
        assert_eq!(
            err.downcast_ref::<AgentError>(),
            Some(&AgentError::NotImplemented("gemini"))
        );
        assert!(CodexAdapter.call("prompt").is_err());
    }
}
