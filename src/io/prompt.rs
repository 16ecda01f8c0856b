//! Prompt envelope rendering for agent calls.
//!
//! The envelope demands the strict `=== FILE: path ===` output format the
//! reply parser understands: instructions first, then the user request, the
//! node's current files, and finally the purpose and invariants from the node
//! metadata.

use minijinja::{context, Environment};
use serde::Serialize;

use crate::io::bundle::Bundle;

const ENVELOPE_TEMPLATE: &str = include_str!("prompts/envelope.md");

#[derive(Debug, Serialize)]
struct FileSection<'a> {
    path: &'a str,
    content: &'a str,
}

/// Render the full prompt for one agent call.
pub fn build_prompt(request: &str, bundle: &Bundle) -> String {
    let mut env = Environment::new();
    env.add_template("envelope", ENVELOPE_TEMPLATE)
        .expect("envelope template should be valid");
    let template = env.get_template("envelope").expect("template registered");

    let files: Vec<FileSection> = bundle
        .files
        .iter()
        .map(|(path, content)| FileSection {
            path: path.as_str(),
            content: content.as_str(),
        })
        .collect();

    template
        .render(context! {
            request => request,
            files => files,
            meta => &bundle.meta,
        })
        .expect("envelope rendering should not fail")
}
