//! Orchestration for a persisted run.
//!
//! A session owns one run directory. Starting a session creates the directory,
//! seeds `request` and writes the initial state and meta. Executing a pipeline
//! in a session persists state after every write, logs each refinement
//! iteration, and finishes with `meta.json` plus `proposal.md`. A failed run
//! keeps its last persisted state and records the error chain in meta.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::feedback::ApprovalMatch;
use crate::core::state::{RunState, StateKey};
use crate::io::iteration_log::{IterationMeta, write_iteration};
use crate::io::run_store::{
    RunMeta, RunPaths, create_run_dir, load_meta, load_state, write_meta, write_proposal,
    write_state,
};
use crate::looping::IterationRecord;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::step::RunObserver;

#[derive(Debug, Clone)]
pub struct Session {
    run_id: String,
    paths: RunPaths,
    meta: RunMeta,
    approval_match: ApprovalMatch,
}

impl Session {
    /// Create a fresh run under `output_dir` and seed it with `request`.
    pub fn start(
        output_dir: &Path,
        request: &str,
        approval_match: ApprovalMatch,
    ) -> Result<(Self, RunState)> {
        let (run_id, paths) = create_run_dir(output_dir)?;
        let mut state = RunState::new();
        state.set(StateKey::Request, request);
        let meta = RunMeta::started(&run_id);
        write_state(&paths.state_path, &state)?;
        write_meta(&paths.meta_path, &meta)?;
        info!(run_id = %run_id, "started run");
        Ok((
            Self {
                run_id,
                paths,
                meta,
                approval_match,
            },
            state,
        ))
    }

    /// Reopen an existing run directory for another refinement pass.
    pub fn resume(run_dir: &Path, approval_match: ApprovalMatch) -> Result<(Self, RunState)> {
        let paths = RunPaths::new(run_dir);
        let state = load_state(&paths.state_path)
            .with_context(|| format!("resume run {}", run_dir.display()))?;
        let mut meta = if paths.meta_path.is_file() {
            load_meta(&paths.meta_path)?
        } else {
            let id = run_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("run dir has no name: {}", run_dir.display()))?;
            warn!(run_id = %id, "meta.json missing; starting fresh meta");
            RunMeta::started(&id)
        };
        meta.resume();
        write_meta(&paths.meta_path, &meta)?;
        info!(run_id = %meta.run_id, iterations = meta.iterations, "resumed run");
        Ok((
            Self {
                run_id: meta.run_id.clone(),
                paths,
                meta,
                approval_match,
            },
            state,
        ))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    /// Run `pipeline` against `state`, persisting as it goes.
    pub async fn execute(
        &mut self,
        pipeline: &Pipeline,
        state: &mut RunState,
    ) -> Result<PipelineOutcome> {
        let observer = PersistingObserver {
            run_id: &self.run_id,
            paths: &self.paths,
            approval_match: self.approval_match,
            iteration_offset: self.meta.iterations,
        };

        match pipeline.run(state, &observer).await {
            Ok(outcome) => {
                write_state(&self.paths.state_path, state)?;
                write_proposal(
                    &self.paths.proposal_path,
                    state.get_or_empty(StateKey::ResearchProposal),
                )?;
                self.meta
                    .complete(outcome.termination, outcome.iterations, outcome.evaluations);
                write_meta(&self.paths.meta_path, &self.meta)?;
                info!(
                    run_id = %self.run_id,
                    termination = outcome.termination.as_str(),
                    "run completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(run_id = %self.run_id, err = %format!("{err:#}"), "run failed");
                self.meta.fail(&err);
                if let Err(meta_err) = write_meta(&self.paths.meta_path, &self.meta) {
                    warn!(err = %format!("{meta_err:#}"), "failed to record run failure");
                }
                Err(err)
            }
        }
    }
}

/// Writes state and iteration logs into the run directory as the run progresses.
struct PersistingObserver<'a> {
    run_id: &'a str,
    paths: &'a RunPaths,
    approval_match: ApprovalMatch,
    /// Iterations completed by earlier invocations of this run.
    iteration_offset: u32,
}

impl RunObserver for PersistingObserver<'_> {
    fn on_state_written(&self, step: &str, key: StateKey, state: &RunState) -> Result<()> {
        debug!(step, key = %key, "persisting state");
        write_state(&self.paths.state_path, state)
            .with_context(|| format!("persist state after {step}"))
    }

    fn on_iteration(&self, record: &IterationRecord, _state: &RunState) -> Result<()> {
        let record = IterationRecord {
            iteration: self.iteration_offset + record.iteration,
            ..record.clone()
        };
        let meta = IterationMeta::from_record(self.run_id, &record, self.approval_match);
        let paths = write_iteration(self.paths, &record, &meta)?;
        debug!(dir = %paths.dir.display(), "wrote iteration log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::agents;
    use crate::core::types::Termination;
    use crate::io::config::ProposerConfig;
    use crate::io::run_store::RunStatus;
    use crate::test_support::{ScriptedGenerator, capabilities};

    #[tokio::test]
    async fn completed_run_writes_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generator = ScriptedGenerator::new()
            .with_research_phase()
            .respond(agents::INITIAL_PROPOSAL_WRITER, ["draft0"])
            .respond(agents::INITIAL_PROPOSAL_EVALUATOR, ["weak"])
            .respond(agents::REFINED_PROPOSAL_WRITER, ["draft1"])
            .respond(agents::REFINEMENT_PROPOSAL_EVALUATOR, ["APPROVED"]);
        let cfg = ProposerConfig::default();
        let pipeline = Pipeline::standard(&cfg, &capabilities(generator));
        let (mut session, mut state) =
            Session::start(temp.path(), "brief", ApprovalMatch::Exact).expect("start");

        let outcome = session
            .execute(&pipeline, &mut state)
            .await
            .expect("execute");

        assert_eq!(outcome.termination, Termination::Approved);
        let paths = session.paths();
        assert_eq!(
            fs::read_to_string(&paths.proposal_path).expect("proposal"),
            "draft1\n"
        );
        let meta = load_meta(&paths.meta_path).expect("meta");
        assert_eq!(meta.status, RunStatus::Completed);
        assert_eq!(meta.termination, Some(Termination::Approved));
        assert_eq!(meta.iterations, 1);
        let persisted = load_state(&paths.state_path).expect("state");
        assert_eq!(persisted.get(StateKey::Request), Some("brief"));
        assert_eq!(persisted.get(StateKey::EvaluationFeedback), Some("APPROVED"));
        assert!(
            paths
                .iteration_dir("ProposalRefinementLoop", 1)
                .join("meta.json")
                .is_file()
        );
    }

    #[tokio::test]
    async fn failed_run_keeps_intermediate_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generator = ScriptedGenerator::new()
            .with_research_phase()
            .respond(agents::INITIAL_PROPOSAL_WRITER, ["draft0"])
            .respond(agents::INITIAL_PROPOSAL_EVALUATOR, ["weak"])
            .respond(agents::REFINED_PROPOSAL_WRITER, ["draft1"])
            .fail(agents::REFINEMENT_PROPOSAL_EVALUATOR, "connection reset");
        let pipeline = Pipeline::standard(&ProposerConfig::default(), &capabilities(generator));
        let (mut session, mut state) =
            Session::start(temp.path(), "brief", ApprovalMatch::Exact).expect("start");

        let err = session
            .execute(&pipeline, &mut state)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("connection reset"));
        let paths = session.paths();
        let persisted = load_state(&paths.state_path).expect("state");
        assert_eq!(persisted.get(StateKey::ResearchProposal), Some("draft1"));
        assert_eq!(persisted.get(StateKey::EvaluationFeedback), Some("weak"));
        let meta = load_meta(&paths.meta_path).expect("meta");
        assert_eq!(meta.status, RunStatus::Failed);
        assert!(
            meta.error
                .as_deref()
                .is_some_and(|msg| msg.contains("connection reset"))
        );
        assert!(!paths.proposal_path.exists());
    }

    #[tokio::test]
    async fn resume_continues_iteration_numbering() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = ProposerConfig {
            max_iterations: 1,
            ..ProposerConfig::default()
        };
        let generator = ScriptedGenerator::new()
            .respond(agents::REFINED_PROPOSAL_WRITER, ["draft1", "draft2"])
            .respond(agents::REFINEMENT_PROPOSAL_EVALUATOR, ["c1", "c2"]);
        let pipeline = Pipeline::refinement_only(&cfg, &capabilities(generator));

        let (mut session, mut state) =
            Session::start(temp.path(), "brief", ApprovalMatch::Exact).expect("start");
        state.set(StateKey::TopicProposal, "X");
        state.set(StateKey::ResearchProposal, "draft0");
        state.set(StateKey::EvaluationFeedback, "c0");
        session.execute(&pipeline, &mut state).await.expect("first");
        let run_dir = session.paths().dir.clone();

        let (mut resumed, mut state) =
            Session::resume(&run_dir, ApprovalMatch::Exact).expect("resume");
        assert_eq!(state.get(StateKey::ResearchProposal), Some("draft1"));
        let outcome = resumed.execute(&pipeline, &mut state).await.expect("second");

        assert_eq!(outcome.termination, Termination::Exhausted);
        assert_eq!(resumed.meta().iterations, 2);
        let paths = resumed.paths();
        assert!(paths.iteration_dir("ProposalRefinementLoop", 2).is_dir());
        assert_eq!(
            fs::read_to_string(&paths.proposal_path).expect("proposal"),
            "draft2\n"
        );
    }
}
