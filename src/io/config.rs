//! Orchestrator configuration stored under `.agentic/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::io::layout::write_atomic;

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgenticConfig {
    /// Maximum wall-clock seconds for one agent call.
    pub agent_timeout_secs: u64,

    /// Truncate agent stdout/stderr beyond this many bytes.
    pub agent_output_limit_bytes: usize,

    /// Maximum wall-clock seconds for one check command.
    pub check_timeout_secs: u64,

    /// Truncate check stdout/stderr beyond this many bytes.
    pub check_output_limit_bytes: usize,

    /// Project-level validation command run after apply. Empty disables it.
    pub build_validation: Vec<String>,
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: 600,
            agent_output_limit_bytes: 1_000_000,
            check_timeout_secs: 600,
            check_output_limit_bytes: 100_000,
            build_validation: vec![
                "go".to_string(),
                "build".to_string(),
                "./...".to_string(),
            ],
        }
    }
}

impl AgenticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.agent_output_limit_bytes == 0 {
            return Err(anyhow!("agent_output_limit_bytes must be > 0"));
        }
        if self.check_timeout_secs == 0 {
            return Err(anyhow!("check_timeout_secs must be > 0"));
        }
        if self.check_output_limit_bytes == 0 {
            return Err(anyhow!("check_output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgenticConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgenticConfig> {
    if !path.exists() {
        let cfg = AgenticConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgenticConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &AgenticConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
