//! Test-only helpers: deterministic node builders and scripted agents.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use crate::core::node::{Node, NodeKind};
use crate::io::agent::Agent;

/// Create a leaf node with the given id and path.
pub fn leaf(id: &str, path: &str) -> Node {
    Node::declared(id, NodeKind::Leaf, path)
}

/// Create a composite node with declared dependencies.
pub fn composite(id: &str, path: &str, deps: &[&str]) -> Node {
    let mut node = Node::declared(id, NodeKind::Composite, path);
    node.deps = deps.iter().map(|d| d.to_string()).collect();
    node
}

/// Agent returning scripted replies in order, recording every prompt.
///
/// Replies beyond the script produce errors, which makes missing expectations
/// loud in tests.
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(replies: I) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// An agent whose every call fails with the given message.
    pub fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn call(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        let mut replies = self.replies.lock();
        match replies.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => {
                // Keep the failure for subsequent calls so every node in a
                // parallel level observes the same scripted error.
                replies.push_front(Err(message.clone()));
                Err(anyhow!(message))
            }
            None => Err(anyhow!("scripted agent exhausted")),
        }
    }
}
