//! Syntax validation adapters behind the [`SyntaxChecker`] seam.
//!
//! The core contract is "given `(path, content)`, return ok or a
//! human-readable error". The gofmt adapter checks Go sources without needing
//! full project context; other paths pass through untouched.

use std::process::Command;
use std::time::Duration;

use crate::core::reply::SyntaxChecker;
use crate::io::process::run_command_with_timeout;

const GOFMT_TIMEOUT: Duration = Duration::from_secs(30);
const GOFMT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Validates `.go` files by piping them through `gofmt -e`.
pub struct GofmtChecker;

impl SyntaxChecker for GofmtChecker {
    fn check(&self, path: &str, content: &str) -> Result<(), String> {
        if !path.ends_with(".go") {
            return Ok(());
        }

        let mut cmd = Command::new("gofmt");
        cmd.arg("-e");

        let output = run_command_with_timeout(
            cmd,
            Some(content.as_bytes()),
            GOFMT_TIMEOUT,
            GOFMT_OUTPUT_LIMIT,
        )
        .map_err(|err| format!("gofmt unavailable: {err:#}"))?;

        if output.timed_out {
            return Err("gofmt timed out".to_string());
        }
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(())
    }
}
