//! Prompt rendering over run state.
//!
//! Templates are embedded minijinja sources, one per step. Every [`StateKey`]
//! is exposed as a top-level variable; absent keys render as empty strings.

use std::borrow::Cow;
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior};
use tracing::debug;

use crate::core::state::{RunState, StateKey};

const TEMPLATES: [(&str, &str); 9] = [
    (
        "winning_projects_researcher",
        include_str!("prompts/winning_projects_researcher.md"),
    ),
    (
        "criteria_researcher",
        include_str!("prompts/criteria_researcher.md"),
    ),
    ("criteria_analyzer", include_str!("prompts/criteria_analyzer.md")),
    (
        "intersector_queries",
        include_str!("prompts/intersector_queries.md"),
    ),
    ("topic_intersector", include_str!("prompts/topic_intersector.md")),
    ("topic_proposer", include_str!("prompts/topic_proposer.md")),
    ("initial_writer", include_str!("prompts/initial_writer.md")),
    ("revision_writer", include_str!("prompts/revision_writer.md")),
    ("evaluator", include_str!("prompts/evaluator.md")),
];

const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    max_value_bytes: usize,
}

impl PromptEngine {
    pub fn new(max_value_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self {
            env,
            max_value_bytes,
        }
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    /// Render `template` with every state key plus `extra` variables.
    pub fn render(&self, template: &str, state: &RunState, extra: &[(&str, &str)]) -> Result<String> {
        let mut ctx: BTreeMap<&str, Cow<'_, str>> = BTreeMap::new();
        for key in StateKey::ALL {
            ctx.insert(
                key.as_str(),
                truncate_value(state.get_or_empty(key).trim(), self.max_value_bytes),
            );
        }
        for (name, value) in extra {
            ctx.insert(*name, truncate_value(value.trim(), self.max_value_bytes));
        }

        let rendered = self
            .env
            .get_template(template)
            .with_context(|| format!("unknown prompt template '{template}'"))?
            .render(&ctx)
            .with_context(|| format!("render prompt template '{template}'"))?;
        debug!(template, prompt_bytes = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}

impl std::fmt::Debug for PromptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptEngine")
            .field("max_value_bytes", &self.max_value_bytes)
            .finish_non_exhaustive()
    }
}

/// Cap `value` at `limit` bytes on a char boundary, marking the cut.
fn truncate_value(value: &str, limit: usize) -> Cow<'_, str> {
    if value.len() <= limit {
        return Cow::Borrowed(value);
    }
    let mut cut = limit.saturating_sub(TRUNCATION_MARKER.len());
    while cut > 0 && !value.is_char_boundary(cut) {
        cut -= 1;
    }
    debug!(before_len = value.len(), after_len = cut, "truncated prompt value");
    Cow::Owned(format!("{}{TRUNCATION_MARKER}", &value[..cut]))
}
