//! The fixed five-phase proposal pipeline.

use anyhow::{Result, anyhow, bail};
use tracing::{info, instrument};

use crate::agents::Agents;
use crate::compose::Phase;
use crate::core::state::{RunState, StateKey};
use crate::core::types::Termination;
use crate::io::config::ProposerConfig;
use crate::looping::RefinementLoop;
use crate::step::{Capabilities, RunObserver};

pub const ROOT_PHASE: &str = "ResearchProposalSystem";
pub const PARALLEL_RESEARCH_PHASE: &str = "ParallelResearchPhase";
pub const ANALYSIS_PHASE: &str = "AnalysisPhase";
pub const TOPIC_INTERSECTION_PHASE: &str = "TopicIntersectionPhase";
pub const TOPIC_PROPOSAL_PHASE: &str = "TopicProposalPhase";
pub const PROPOSAL_DEVELOPMENT_PHASE: &str = "ProposalDevelopmentPhase";
pub const REFINEMENT_LOOP: &str = "ProposalRefinementLoop";

/// Keys the refinement loop needs when it is run on its own.
pub const REFINEMENT_INPUTS: [StateKey; 3] = [
    StateKey::TopicProposal,
    StateKey::ResearchProposal,
    StateKey::EvaluationFeedback,
];

/// Final result of a completed pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub termination: Termination,
    pub iterations: u32,
    pub evaluations: u32,
}

#[derive(Debug)]
pub struct Pipeline {
    root: Phase,
    requires: Vec<StateKey>,
}

impl Pipeline {
    /// Parallel research, analysis, topic intersection, topic proposal, then
    /// proposal development (initial write, initial evaluation, refinement).
    pub fn standard(cfg: &ProposerConfig, caps: &Capabilities) -> Self {
        let agents = Agents::new(cfg, caps);
        let refine = RefinementLoop::new(
            REFINEMENT_LOOP,
            agents.refined_proposal_writer,
            agents.refinement_proposal_evaluator,
            cfg.max_iterations,
        );
        let root = Phase::sequential(
            ROOT_PHASE,
            vec![
                Phase::parallel(
                    PARALLEL_RESEARCH_PHASE,
                    vec![agents.winning_projects_researcher, agents.criteria_researcher],
                ),
                Phase::sequential(ANALYSIS_PHASE, vec![Phase::step(agents.criteria_analyzer)]),
                Phase::sequential(
                    TOPIC_INTERSECTION_PHASE,
                    vec![Phase::step(agents.topic_intersector)],
                ),
                Phase::sequential(
                    TOPIC_PROPOSAL_PHASE,
                    vec![Phase::step(agents.topic_proposer)],
                ),
                Phase::sequential(
                    PROPOSAL_DEVELOPMENT_PHASE,
                    vec![
                        Phase::step(agents.initial_proposal_writer),
                        Phase::step(agents.initial_proposal_evaluator),
                        Phase::Refine(refine),
                    ],
                ),
            ],
        );
        Self {
            root,
            requires: Vec::new(),
        }
    }

    /// Only the refinement loop, for resuming a persisted run.
    pub fn refinement_only(cfg: &ProposerConfig, caps: &Capabilities) -> Self {
        let (reviser, evaluator) = Agents::refinement_pair(cfg.approval_match, caps);
        Self {
            root: Phase::Refine(RefinementLoop::new(
                REFINEMENT_LOOP,
                reviser,
                evaluator,
                cfg.max_iterations,
            )),
            requires: REFINEMENT_INPUTS.to_vec(),
        }
    }

    /// Wrap a custom phase tree. It must contain a refinement loop.
    pub fn from_phase(root: Phase) -> Result<Self> {
        root.validate()?;
        if !root.contains_refinement() {
            bail!("pipeline {} has no refinement loop", root.name());
        }
        Ok(Self {
            root,
            requires: Vec::new(),
        })
    }

    #[instrument(skip_all, fields(pipeline = self.root.name()))]
    pub async fn run(&self, state: &mut RunState, observer: &dyn RunObserver) -> Result<PipelineOutcome> {
        self.root.validate()?;
        state.require(&self.requires)?;

        let outcome = self.root.run(state, observer).await?;
        let refinement = outcome
            .refinement
            .ok_or_else(|| anyhow!("pipeline {} finished without a refinement loop", self.root.name()))?;
        info!(
            termination = refinement.termination.as_str(),
            iterations = refinement.iterations,
            "pipeline finished"
        );
        Ok(PipelineOutcome {
            termination: refinement.termination,
            iterations: refinement.iterations,
            evaluations: refinement.evaluations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents;
    use crate::step::NoopObserver;
    use crate::test_support::{ScriptedGenerator, capabilities, seeded_state};

    fn config(max_iterations: u32) -> ProposerConfig {
        ProposerConfig {
            max_iterations,
            ..ProposerConfig::default()
        }
    }

    #[tokio::test]
    async fn standard_pipeline_runs_phases_in_order() {
        let generator = ScriptedGenerator::new()
            .with_research_phase()
            .respond(agents::INITIAL_PROPOSAL_WRITER, ["draft0"])
            .respond(agents::INITIAL_PROPOSAL_EVALUATOR, ["too vague"])
            .respond(agents::REFINED_PROPOSAL_WRITER, ["draft1"])
            .respond(agents::REFINEMENT_PROPOSAL_EVALUATOR, ["APPROVED"]);
        let pipeline = Pipeline::standard(&config(3), &capabilities(generator.clone()));
        let mut state = RunState::new();
        state.set(StateKey::Request, "ISEF 2025 entry");

        let outcome = pipeline.run(&mut state, &NoopObserver).await.expect("run");

        assert_eq!(outcome.termination, Termination::Approved);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(state.get(StateKey::ResearchProposal), Some("draft1"));
        assert_eq!(state.get(StateKey::TopicProposal), Some("X"));
        let steps = generator.call_steps();
        // The two researchers share a phase; their relative order is unspecified.
        assert_eq!(
            &steps[2..],
            [
                agents::CRITERIA_ANALYZER,
                "TopicIntersector.queries",
                agents::TOPIC_INTERSECTOR,
                agents::TOPIC_PROPOSER,
                agents::INITIAL_PROPOSAL_WRITER,
                agents::INITIAL_PROPOSAL_EVALUATOR,
                agents::REFINED_PROPOSAL_WRITER,
                agents::REFINEMENT_PROPOSAL_EVALUATOR,
            ]
        );
    }

    #[tokio::test]
    async fn approved_initial_evaluation_skips_refinement_writes() {
        let generator = ScriptedGenerator::new()
            .with_research_phase()
            .respond(agents::INITIAL_PROPOSAL_WRITER, ["draft0"])
            .respond(agents::INITIAL_PROPOSAL_EVALUATOR, ["APPROVED"]);
        let pipeline = Pipeline::standard(&config(3), &capabilities(generator.clone()));
        let mut state = RunState::new();

        let outcome = pipeline.run(&mut state, &NoopObserver).await.expect("run");

        assert_eq!(outcome.termination, Termination::Approved);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(state.get(StateKey::ResearchProposal), Some("draft0"));
        assert!(
            !generator
                .call_steps()
                .iter()
                .any(|step| step == agents::REFINED_PROPOSAL_WRITER)
        );
    }

    #[tokio::test]
    async fn step_failures_name_their_phase() {
        let generator = ScriptedGenerator::new()
            .respond(agents::WINNING_PROJECTS_RESEARCHER, ["projects"])
            .respond(agents::CRITERIA_RESEARCHER, ["criteria"])
            .respond(agents::CRITERIA_ANALYZER, ["guide"])
            .respond("TopicIntersector.queries", ["algae"])
            .fail(agents::TOPIC_INTERSECTOR, "model offline");
        let pipeline = Pipeline::standard(&config(3), &capabilities(generator));
        let mut state = RunState::new();

        let err = pipeline.run(&mut state, &NoopObserver).await.unwrap_err();

        let chain = format!("{err:#}");
        assert!(
            chain.starts_with(
                "ResearchProposalSystem: TopicIntersectionPhase: \
                 TopicIntersectionPhase: TopicIntersector: step TopicIntersector:"
            ),
            "{chain}"
        );
        assert!(chain.contains("model offline"));
        assert!(state.contains(StateKey::PracticalCriteria));
        assert!(!state.contains(StateKey::IntersectedTopics));
    }

    #[tokio::test]
    async fn refinement_only_requires_seeded_state() {
        let pipeline = Pipeline::refinement_only(&config(3), &capabilities(ScriptedGenerator::new()));
        let err = pipeline
            .run(&mut RunState::new(), &NoopObserver)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("topic_proposal"));
    }

    #[tokio::test]
    async fn refinement_only_resumes_from_state() {
        let generator = ScriptedGenerator::new()
            .respond(agents::REFINED_PROPOSAL_WRITER, ["draft1", "draft2"])
            .respond(agents::REFINEMENT_PROPOSAL_EVALUATOR, ["c1", "c2"]);
        let pipeline = Pipeline::refinement_only(&config(2), &capabilities(generator));
        let mut state = seeded_state("draft0", "c0");

        let outcome = pipeline.run(&mut state, &NoopObserver).await.expect("run");

        assert_eq!(outcome.termination, Termination::Exhausted);
        assert_eq!(outcome.evaluations, 2);
        assert_eq!(state.get(StateKey::ResearchProposal), Some("draft2"));
    }

    #[test]
    fn custom_pipelines_need_a_loop() {
        let step = crate::test_support::sequence_step("A", StateKey::TopicProposal, &[]);
        let err = Pipeline::from_phase(Phase::sequential("Custom", vec![Phase::step(step)]))
            .unwrap_err();
        assert!(err.to_string().contains("no refinement loop"));
    }
}
