//! Lifecycle tests for the refinement loop driven through the public pipeline.
//!
//! Every scenario scripts the generator per step name, runs a pipeline inside a
//! persisted session, and checks the final state, the loop counters and the
//! artifacts left in the run directory.

use std::fs;

use proposer::agents;
use proposer::core::feedback::ApprovalMatch;
use proposer::core::state::StateKey;
use proposer::core::types::Termination;
use proposer::io::config::ProposerConfig;
use proposer::io::run_store::{RunStatus, load_meta, load_state};
use proposer::pipeline::{Pipeline, REFINEMENT_LOOP};
use proposer::session::Session;
use proposer::test_support::{ScriptedGenerator, capabilities};

fn config(max_iterations: u32, approval_match: ApprovalMatch) -> ProposerConfig {
    ProposerConfig {
        max_iterations,
        approval_match,
        ..ProposerConfig::default()
    }
}

/// Approval on the second revision.
///
/// ```text
/// initial:  draft0 -> "weak methodology"
/// iter 1:   draft1 -> "needs stats"
/// iter 2:   draft2 -> APPROVED
/// iter 3:   reviser sees APPROVED, exits without writing
/// ```
#[tokio::test]
async fn approves_on_second_revision() {
    let temp = tempfile::tempdir().expect("tempdir");
    let generator = ScriptedGenerator::new()
        .with_research_phase()
        .respond(agents::INITIAL_PROPOSAL_WRITER, ["draft0"])
        .respond(agents::INITIAL_PROPOSAL_EVALUATOR, ["weak methodology"])
        .respond(agents::REFINED_PROPOSAL_WRITER, ["draft1", "draft2"])
        .respond(agents::REFINEMENT_PROPOSAL_EVALUATOR, ["needs stats", "APPROVED"]);
    let cfg = config(3, ApprovalMatch::Exact);
    let pipeline = Pipeline::standard(&cfg, &capabilities(generator.clone()));
    let (mut session, mut state) =
        Session::start(temp.path(), "ISEF 2025 entry", cfg.approval_match).expect("start");

    let outcome = session
        .execute(&pipeline, &mut state)
        .await
        .expect("execute");

    assert_eq!(outcome.termination, Termination::Approved);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.evaluations, 2);
    assert_eq!(state.get(StateKey::ResearchProposal), Some("draft2"));
    assert_eq!(state.get(StateKey::EvaluationFeedback), Some("APPROVED"));

    let writer_calls = generator
        .call_steps()
        .iter()
        .filter(|step| step.as_str() == agents::REFINED_PROPOSAL_WRITER)
        .count();
    assert_eq!(writer_calls, 2);

    let paths = session.paths();
    assert_eq!(
        fs::read_to_string(&paths.proposal_path).expect("proposal"),
        "draft2\n"
    );
    let first = paths.iteration_dir(REFINEMENT_LOOP, 1);
    assert_eq!(
        fs::read_to_string(first.join("feedback.md")).expect("feedback"),
        "needs stats"
    );
    assert!(!paths.iteration_dir(REFINEMENT_LOOP, 3).exists());
}

/// Three critiques in a row exhaust the loop with the last draft kept.
#[tokio::test]
async fn exhausts_after_three_critiques() {
    let temp = tempfile::tempdir().expect("tempdir");
    let generator = ScriptedGenerator::new()
        .with_research_phase()
        .respond(agents::INITIAL_PROPOSAL_WRITER, ["draft0"])
        .respond(agents::INITIAL_PROPOSAL_EVALUATOR, ["c0"])
        .respond(agents::REFINED_PROPOSAL_WRITER, ["d1", "d2", "d3"])
        .respond(agents::REFINEMENT_PROPOSAL_EVALUATOR, ["c1", "c2", "c3"]);
    let cfg = config(3, ApprovalMatch::Exact);
    let pipeline = Pipeline::standard(&cfg, &capabilities(generator));
    let (mut session, mut state) =
        Session::start(temp.path(), "brief", cfg.approval_match).expect("start");

    let outcome = session
        .execute(&pipeline, &mut state)
        .await
        .expect("execute");

    assert_eq!(outcome.termination, Termination::Exhausted);
    assert_eq!(outcome.evaluations, 3);
    assert_eq!(state.get(StateKey::ResearchProposal), Some("d3"));
    assert_eq!(state.get(StateKey::EvaluationFeedback), Some("c3"));
    let meta = load_meta(&session.paths().meta_path).expect("meta");
    assert_eq!(meta.status, RunStatus::Completed);
    assert_eq!(meta.termination, Some(Termination::Exhausted));
    assert_eq!(meta.iterations, 3);
}

/// A padded sentinel only approves when normalized matching is configured.
#[tokio::test]
async fn padded_sentinel_depends_on_match_mode() {
    for (mode, expected) in [
        (ApprovalMatch::Exact, Termination::Exhausted),
        (ApprovalMatch::Normalized, Termination::Approved),
    ] {
        let temp = tempfile::tempdir().expect("tempdir");
        let generator = ScriptedGenerator::new()
            .with_research_phase()
            .respond(agents::INITIAL_PROPOSAL_WRITER, ["draft0"])
            .respond(agents::INITIAL_PROPOSAL_EVALUATOR, ["c0"])
            .respond(agents::REFINED_PROPOSAL_WRITER, ["d1", "d2"])
            .respond(agents::REFINEMENT_PROPOSAL_EVALUATOR, ["APPROVED\n", "c2"]);
        let cfg = config(2, mode);
        let pipeline = Pipeline::standard(&cfg, &capabilities(generator));
        let (mut session, mut state) =
            Session::start(temp.path(), "brief", mode).expect("start");

        let outcome = session
            .execute(&pipeline, &mut state)
            .await
            .expect("execute");

        assert_eq!(outcome.termination, expected, "{mode:?}");
        if expected == Termination::Approved {
            assert_eq!(state.get(StateKey::ResearchProposal), Some("d1"));
            assert_eq!(state.get(StateKey::EvaluationFeedback), Some("APPROVED"));
        }
    }
}

/// Zero iterations leave the initial draft and its evaluation in place.
#[tokio::test]
async fn zero_iterations_keeps_initial_draft() {
    let temp = tempfile::tempdir().expect("tempdir");
    let generator = ScriptedGenerator::new()
        .with_research_phase()
        .respond(agents::INITIAL_PROPOSAL_WRITER, ["draft0"])
        .respond(agents::INITIAL_PROPOSAL_EVALUATOR, ["c0"]);
    let cfg = config(0, ApprovalMatch::Exact);
    let pipeline = Pipeline::standard(&cfg, &capabilities(generator));
    let (mut session, mut state) =
        Session::start(temp.path(), "brief", cfg.approval_match).expect("start");

    let outcome = session
        .execute(&pipeline, &mut state)
        .await
        .expect("execute");

    assert_eq!(outcome.termination, Termination::Exhausted);
    assert_eq!(outcome.evaluations, 0);
    assert_eq!(state.get(StateKey::ResearchProposal), Some("draft0"));
    assert_eq!(state.get(StateKey::EvaluationFeedback), Some("c0"));
}

/// A failing research step aborts before any later phase and keeps the
/// sibling's output on disk.
#[tokio::test]
async fn research_failure_aborts_pipeline() {
    let temp = tempfile::tempdir().expect("tempdir");
    let generator = ScriptedGenerator::new()
        .respond(agents::WINNING_PROJECTS_RESEARCHER, ["projects"])
        .fail(agents::CRITERIA_RESEARCHER, "quota exceeded");
    let cfg = config(3, ApprovalMatch::Exact);
    let pipeline = Pipeline::standard(&cfg, &capabilities(generator.clone()));
    let (mut session, mut state) =
        Session::start(temp.path(), "brief", cfg.approval_match).expect("start");

    let err = session
        .execute(&pipeline, &mut state)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("quota exceeded"));
    assert_eq!(generator.calls().len(), 2);
    let persisted = load_state(&session.paths().state_path).expect("state");
    assert_eq!(persisted.get(StateKey::WinningProjects), Some("projects"));
    assert!(!persisted.contains(StateKey::PracticalCriteria));
    assert_eq!(
        load_meta(&session.paths().meta_path).expect("meta").status,
        RunStatus::Failed
    );
}
