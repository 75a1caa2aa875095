//! Proposal evaluator agents.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::core::feedback::{APPROVAL_SENTINEL, ApprovalMatch, Feedback};
use crate::core::state::{RunState, StateKey};
use crate::core::types::StepOutput;
use crate::step::{Capabilities, ExitSignal, Step};

/// Judges `research_proposal` and writes `evaluation_feedback`.
///
/// An approval is written as exactly [`APPROVAL_SENTINEL`]; anything else is
/// passed through verbatim as critique.
#[derive(Debug, Clone)]
pub struct EvaluateStep {
    name: String,
    approval_match: ApprovalMatch,
    caps: Capabilities,
}

impl EvaluateStep {
    pub fn new(name: impl Into<String>, approval_match: ApprovalMatch, caps: Capabilities) -> Self {
        Self {
            name: name.into(),
            approval_match,
            caps,
        }
    }
}

#[async_trait]
impl Step for EvaluateStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> StateKey {
        StateKey::EvaluationFeedback
    }

    #[instrument(skip_all, fields(step = %self.name))]
    async fn run(&self, state: &RunState, _exit: &ExitSignal) -> Result<StepOutput> {
        let prompt = self.caps.prompts.render("evaluator", state, &[])?;
        let text = self
            .caps
            .generate(&self.name, StateKey::EvaluationFeedback, prompt)
            .await?;

        match Feedback::classify(&text, self.approval_match) {
            Feedback::Approved => {
                info!("proposal approved");
                Ok(StepOutput::text(APPROVAL_SENTINEL))
            }
            Feedback::Critique(critique) => {
                let missing = critique.missing_sections();
                if !missing.is_empty() {
                    let names: Vec<&str> = missing.iter().map(|section| section.as_str()).collect();
                    warn!(missing = ?names, "critique is missing sections");
                }
                debug!(
                    strengths = critique.strengths.len(),
                    weaknesses = critique.weaknesses.len(),
                    suggestions = critique.suggestions.len(),
                    "critique received"
                );
                Ok(StepOutput::Text(text))
            }
        }
    }
}
