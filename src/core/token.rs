//! Character-based token estimation and per-model budget tables.
//!
//! Estimates are deliberately heuristic (~4 characters per token for code)
//! and are only used to gate policy violations and suggest node splits, never
//! for billing-grade accounting.

use std::collections::BTreeMap;

use thiserror::Error;

/// Fixed overhead added for the system portion of a prompt.
const PROMPT_OVERHEAD: usize = 500;

/// Estimate tokens for a string: ~4 characters per token, rounded up.
pub fn estimate_str(s: &str) -> usize {
    if s.is_empty() {
        return 0;
    }
    (s.len() + 3) / 4
}

/// Estimate total tokens across multiple strings.
pub fn estimate_all<'a, I: IntoIterator<Item = &'a str>>(strings: I) -> usize {
    strings.into_iter().map(estimate_str).sum()
}

/// Estimate total tokens for the values of a path -> content map.
pub fn estimate_map(map: &BTreeMap<String, String>) -> usize {
    map.values().map(|content| estimate_str(content)).sum()
}

/// Estimate tokens for a full prompt: request plus content plus overhead.
pub fn estimate_prompt(request: &str, content_tokens: usize) -> usize {
    estimate_str(request) + content_tokens + PROMPT_OVERHEAD
}

/// Token limits for a model class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub context_window: usize,
    /// Tokens reserved for output and the system prompt.
    pub reserved: usize,
    /// `context_window - reserved`.
    pub available: usize,
}

/// Return the token budget for a model, falling back to `default`.
pub fn budget_for(model: &str) -> Budget {
    match model {
        "claude-sonnet" | "claude-opus" | "claude-haiku" => Budget {
            context_window: 200_000,
            reserved: 20_000,
            available: 180_000,
        },
        _ => Budget {
            context_window: 100_000,
            reserved: 10_000,
            available: 90_000,
        },
    }
}

/// Content exceeds the available token budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("token budget exceeded: {tokens} > {available}")]
pub struct BudgetExceeded {
    pub tokens: usize,
    pub available: usize,
}

/// Check whether `tokens` fits within `budget`.
pub fn check_budget(tokens: usize, budget: Budget) -> Result<(), BudgetExceeded> {
    if tokens > budget.available {
        return Err(BudgetExceeded {
            tokens,
            available: budget.available,
        });
    }
    Ok(())
}
