//! Bounded revise/evaluate refinement loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::state::{RunState, StateKey};
use crate::core::types::{LoopState, Termination};
use crate::step::{ExitSignal, RunObserver, Step, apply_output};

/// Snapshot of one completed revise+evaluate cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    pub loop_name: String,
    /// 1-based iteration number.
    pub iteration: u32,
    pub proposal: String,
    pub feedback: String,
    /// Loop signal after this iteration was counted.
    pub signal: Termination,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Completed revise+evaluate cycles.
    pub iterations: u32,
    /// Evaluator invocations made by the loop itself.
    pub evaluations: u32,
    pub termination: Termination,
}

/// Alternates a reviser and an evaluator until approval or the cap.
///
/// Each iteration runs the reviser, then (unless it raised the exit signal) the
/// evaluator. The signal is checked before the reviser and directly after it;
/// the cap is applied after the evaluator. Reaching the cap always yields
/// [`Termination::Exhausted`], even if the last feedback was an approval.
#[derive(Clone)]
pub struct RefinementLoop {
    name: String,
    reviser: Arc<dyn Step>,
    evaluator: Arc<dyn Step>,
    max_iterations: u32,
}

impl std::fmt::Debug for RefinementLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementLoop")
            .field("name", &self.name)
            .field("reviser", &self.reviser.name())
            .field("evaluator", &self.evaluator.name())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl RefinementLoop {
    pub fn new(
        name: impl Into<String>,
        reviser: Arc<dyn Step>,
        evaluator: Arc<dyn Step>,
        max_iterations: u32,
    ) -> Self {
        Self {
            name: name.into(),
            reviser,
            evaluator,
            max_iterations,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output keys written by the loop's steps.
    pub fn output_keys(&self) -> [StateKey; 2] {
        [self.reviser.output_key(), self.evaluator.output_key()]
    }

    /// Run until approved or exhausted.
    ///
    /// Any step or observer failure aborts the loop immediately; state keeps
    /// every write applied before the failure.
    #[instrument(skip_all, fields(loop_name = %self.name, max_iterations = self.max_iterations))]
    pub async fn run(&self, state: &mut RunState, observer: &dyn RunObserver) -> Result<LoopOutcome> {
        let mut loop_state = LoopState::new(self.max_iterations);
        let exit = ExitSignal::new();
        let mut evaluations = 0u32;

        while !loop_state.signal.is_terminal() {
            if exit.is_raised() {
                loop_state.approve();
                break;
            }
            let iteration = loop_state.iteration + 1;

            let revised = self
                .reviser
                .run(state, &exit)
                .await
                .with_context(|| {
                    format!("{} iteration {iteration}: {}", self.name, self.reviser.name())
                })?;
            if let Some(key) = apply_output(state, self.reviser.as_ref(), revised, &exit) {
                observer.on_state_written(self.reviser.name(), key, state)?;
            }
            if exit.is_raised() {
                info!(iteration, "exit signal raised; proposal approved");
                loop_state.approve();
                break;
            }

            let verdict = self
                .evaluator
                .run(state, &exit)
                .await
                .with_context(|| {
                    format!("{} iteration {iteration}: {}", self.name, self.evaluator.name())
                })?;
            evaluations += 1;
            if let Some(key) = apply_output(state, self.evaluator.as_ref(), verdict, &exit) {
                observer.on_state_written(self.evaluator.name(), key, state)?;
            }

            loop_state.complete_iteration();
            let record = IterationRecord {
                loop_name: self.name.clone(),
                iteration: loop_state.iteration,
                proposal: state.get_or_empty(self.reviser.output_key()).to_string(),
                feedback: state.get_or_empty(self.evaluator.output_key()).to_string(),
                signal: loop_state.signal,
            };
            info!(
                iteration = record.iteration,
                signal = record.signal.as_str(),
                "refinement iteration complete"
            );
            observer.on_iteration(&record, state)?;
        }

        info!(
            iterations = loop_state.iteration,
            evaluations,
            termination = loop_state.signal.as_str(),
            "refinement loop finished"
        );
        Ok(LoopOutcome {
            iterations: loop_state.iteration,
            evaluations,
            termination: loop_state.signal,
        })
    }
}
