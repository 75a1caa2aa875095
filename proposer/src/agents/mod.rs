//! Agent definitions: the concrete steps of the proposal pipeline.
//!
//! Each agent is a [`Step`] with a fixed name, prompt template and output key.
//! Research agents consult the search capability first; the writer and
//! evaluator agents drive the refinement loop.

use std::sync::Arc;

use crate::core::feedback::ApprovalMatch;
use crate::core::state::StateKey;
use crate::io::config::ProposerConfig;
use crate::step::{Capabilities, PromptStep, Step};

pub mod evaluator;
pub mod research;
pub mod writer;

pub use evaluator::EvaluateStep;
pub use research::{QuerySource, ResearchStep};
pub use writer::ReviseStep;

pub const WINNING_PROJECTS_RESEARCHER: &str = "WinningProjectsResearcher";
pub const CRITERIA_RESEARCHER: &str = "CriteriaResearcher";
pub const CRITERIA_ANALYZER: &str = "CriteriaAnalyzer";
pub const TOPIC_INTERSECTOR: &str = "TopicIntersector";
pub const TOPIC_PROPOSER: &str = "TopicProposer";
pub const INITIAL_PROPOSAL_WRITER: &str = "InitialProposalWriter";
pub const INITIAL_PROPOSAL_EVALUATOR: &str = "InitialProposalEvaluator";
pub const REFINED_PROPOSAL_WRITER: &str = "RefinedProposalWriter";
pub const REFINEMENT_PROPOSAL_EVALUATOR: &str = "RefinementProposalEvaluator";

const WINNING_PROJECT_QUERIES: [&str; 4] = [
    "Regeneron Science Talent Search winning projects 2020-2024",
    "Regeneron ISEF grand award winning projects 2023 2024",
    "Synopsys science fair winning high school projects",
    "Google Science Fair winners projects",
];

const CRITERIA_QUERIES: [&str; 4] = [
    "Regeneron ISEF judging criteria rubric",
    "Regeneron Science Talent Search evaluation criteria",
    "Synopsys science fair judging rubric high school",
    "high school science fair judging criteria scoring",
];

/// Every agent the standard pipeline uses, built from shared capabilities.
#[derive(Clone)]
pub struct Agents {
    pub winning_projects_researcher: Arc<dyn Step>,
    pub criteria_researcher: Arc<dyn Step>,
    pub criteria_analyzer: Arc<dyn Step>,
    pub topic_intersector: Arc<dyn Step>,
    pub topic_proposer: Arc<dyn Step>,
    pub initial_proposal_writer: Arc<dyn Step>,
    pub initial_proposal_evaluator: Arc<dyn Step>,
    pub refined_proposal_writer: Arc<dyn Step>,
    pub refinement_proposal_evaluator: Arc<dyn Step>,
}

impl Agents {
    pub fn new(cfg: &ProposerConfig, caps: &Capabilities) -> Self {
        let max_queries = cfg.search.max_queries;
        let (refined_proposal_writer, refinement_proposal_evaluator) =
            Self::refinement_pair(cfg.approval_match, caps);
        Self {
            winning_projects_researcher: Arc::new(ResearchStep::new(
                WINNING_PROJECTS_RESEARCHER,
                "winning_projects_researcher",
                StateKey::WinningProjects,
                QuerySource::fixed(WINNING_PROJECT_QUERIES),
                max_queries,
                caps.clone(),
            )),
            criteria_researcher: Arc::new(ResearchStep::new(
                CRITERIA_RESEARCHER,
                "criteria_researcher",
                StateKey::EvaluationCriteria,
                QuerySource::fixed(CRITERIA_QUERIES),
                max_queries,
                caps.clone(),
            )),
            criteria_analyzer: Arc::new(PromptStep::new(
                CRITERIA_ANALYZER,
                "criteria_analyzer",
                StateKey::PracticalCriteria,
                caps.clone(),
            )),
            topic_intersector: Arc::new(ResearchStep::new(
                TOPIC_INTERSECTOR,
                "topic_intersector",
                StateKey::IntersectedTopics,
                QuerySource::Generated {
                    template: "intersector_queries",
                },
                max_queries,
                caps.clone(),
            )),
            topic_proposer: Arc::new(PromptStep::new(
                TOPIC_PROPOSER,
                "topic_proposer",
                StateKey::TopicProposal,
                caps.clone(),
            )),
            initial_proposal_writer: Arc::new(PromptStep::new(
                INITIAL_PROPOSAL_WRITER,
                "initial_writer",
                StateKey::ResearchProposal,
                caps.clone(),
            )),
            initial_proposal_evaluator: Arc::new(EvaluateStep::new(
                INITIAL_PROPOSAL_EVALUATOR,
                cfg.approval_match,
                caps.clone(),
            )),
            refined_proposal_writer,
            refinement_proposal_evaluator,
        }
    }

    /// Reviser and evaluator pair for a given approval mode.
    pub fn refinement_pair(
        approval_match: ApprovalMatch,
        caps: &Capabilities,
    ) -> (Arc<dyn Step>, Arc<dyn Step>) {
        (
            Arc::new(ReviseStep::new(
                REFINED_PROPOSAL_WRITER,
                approval_match,
                caps.clone(),
            )),
            Arc::new(EvaluateStep::new(
                REFINEMENT_PROPOSAL_EVALUATOR,
                approval_match,
                caps.clone(),
            )),
        )
    }
}
