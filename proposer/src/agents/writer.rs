//! The reviser that drives the refinement loop.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::core::feedback::ApprovalMatch;
use crate::core::proposal::missing_sections;
use crate::core::state::{RunState, StateKey};
use crate::core::types::StepOutput;
use crate::step::{Capabilities, ExitSignal, Step};

/// Revises `research_proposal` against `evaluation_feedback`.
///
/// When the feedback is the approval sentinel the step raises the exit signal
/// and returns [`StepOutput::Exit`] without calling the generator, so an
/// approved draft is never rewritten.
#[derive(Debug, Clone)]
pub struct ReviseStep {
    name: String,
    approval_match: ApprovalMatch,
    caps: Capabilities,
}

impl ReviseStep {
    pub fn new(name: impl Into<String>, approval_match: ApprovalMatch, caps: Capabilities) -> Self {
        Self {
            name: name.into(),
            approval_match,
            caps,
        }
    }
}

#[async_trait]
impl Step for ReviseStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> StateKey {
        StateKey::ResearchProposal
    }

    #[instrument(skip_all, fields(step = %self.name))]
    async fn run(&self, state: &RunState, exit: &ExitSignal) -> Result<StepOutput> {
        let feedback = state.get_or_empty(StateKey::EvaluationFeedback);
        if self.approval_match.is_approval(feedback) {
            info!("feedback is approval; requesting exit");
            exit.raise();
            return Ok(StepOutput::Exit);
        }

        let prompt = self.caps.prompts.render("revision_writer", state, &[])?;
        let text = self
            .caps
            .generate(&self.name, StateKey::ResearchProposal, prompt)
            .await?;
        let missing = missing_sections(&text);
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|section| section.as_str()).collect();
            warn!(missing = ?names, "revised proposal is missing required sections");
        }
        Ok(StepOutput::Text(text))
    }
}
