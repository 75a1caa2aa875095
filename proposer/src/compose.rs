//! Sequential and parallel composition of steps.
//!
//! A pipeline is a tree of [`Phase`]s. Sequential phases run children in
//! order, each seeing every earlier write. Parallel phases run their steps
//! concurrently against one snapshot and apply the outputs afterwards in
//! declaration order, so their output keys must be disjoint.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use futures_util::future::{BoxFuture, join_all};
use tracing::{info, instrument, warn};

use crate::core::state::{RunState, StateKey};
use crate::looping::{LoopOutcome, RefinementLoop};
use crate::step::{ExitSignal, RunObserver, Step, apply_output, run_step};

/// Node in a pipeline tree.
pub enum Phase {
    Step(Arc<dyn Step>),
    Sequential { name: String, phases: Vec<Phase> },
    Parallel { name: String, steps: Vec<Arc<dyn Step>> },
    Refine(RefinementLoop),
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Step(step) => f.debug_tuple("Step").field(&step.name()).finish(),
            Phase::Sequential { name, phases } => f
                .debug_struct("Sequential")
                .field("name", name)
                .field("phases", phases)
                .finish(),
            Phase::Parallel { name, steps } => f
                .debug_struct("Parallel")
                .field("name", name)
                .field(
                    "steps",
                    &steps.iter().map(|step| step.name()).collect::<Vec<_>>(),
                )
                .finish(),
            Phase::Refine(refine) => f.debug_tuple("Refine").field(refine).finish(),
        }
    }
}

/// Result of running a phase tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseOutcome {
    /// Outcome of the last refinement loop that ran, if any.
    pub refinement: Option<LoopOutcome>,
}

impl PhaseOutcome {
    fn merge(&mut self, other: PhaseOutcome) {
        if other.refinement.is_some() {
            self.refinement = other.refinement;
        }
    }
}

impl Phase {
    pub fn step(step: Arc<dyn Step>) -> Self {
        Phase::Step(step)
    }

    pub fn sequential(name: impl Into<String>, phases: Vec<Phase>) -> Self {
        Phase::Sequential {
            name: name.into(),
            phases,
        }
    }

    pub fn parallel(name: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Self {
        Phase::Parallel {
            name: name.into(),
            steps,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Phase::Step(step) => step.name(),
            Phase::Sequential { name, .. } | Phase::Parallel { name, .. } => name,
            Phase::Refine(refine) => refine.name(),
        }
    }

    /// Check structural rules: non-empty composites, disjoint parallel keys,
    /// and distinct proposal and feedback keys in each refinement loop.
    pub fn validate(&self) -> Result<()> {
        match self {
            Phase::Step(_) => Ok(()),
            Phase::Refine(refine) => {
                let [proposal_key, feedback_key] = refine.output_keys();
                if proposal_key == feedback_key {
                    bail!(
                        "refinement loop {}: reviser and evaluator both write {proposal_key}",
                        refine.name()
                    );
                }
                Ok(())
            }
            Phase::Sequential { name, phases } => {
                if phases.is_empty() {
                    bail!("sequential phase {name} has no children");
                }
                for phase in phases {
                    phase
                        .validate()
                        .with_context(|| format!("in phase {name}"))?;
                }
                Ok(())
            }
            Phase::Parallel { name, steps } => {
                if steps.is_empty() {
                    bail!("parallel phase {name} has no steps");
                }
                validate_disjoint(name, steps)
            }
        }
    }

    /// Whether a refinement loop appears anywhere in this tree.
    pub fn contains_refinement(&self) -> bool {
        match self {
            Phase::Refine(_) => true,
            Phase::Step(_) | Phase::Parallel { .. } => false,
            Phase::Sequential { phases, .. } => phases.iter().any(Phase::contains_refinement),
        }
    }

    pub fn run<'a>(
        &'a self,
        state: &'a mut RunState,
        observer: &'a dyn RunObserver,
    ) -> BoxFuture<'a, Result<PhaseOutcome>> {
        Box::pin(async move {
            match self {
                Phase::Step(step) => {
                    run_step(step.as_ref(), state, observer).await?;
                    Ok(PhaseOutcome::default())
                }
                Phase::Sequential { name, phases } => {
                    run_sequential(name, phases, state, observer).await
                }
                Phase::Parallel { name, steps } => {
                    run_parallel(name, steps, state, observer).await?;
                    Ok(PhaseOutcome::default())
                }
                Phase::Refine(refine) => {
                    let outcome = refine.run(state, observer).await?;
                    Ok(PhaseOutcome {
                        refinement: Some(outcome),
                    })
                }
            }
        })
    }
}

/// Run `phases` in order, stopping at the first failure.
#[instrument(skip_all, fields(phase = name))]
pub async fn run_sequential(
    name: &str,
    phases: &[Phase],
    state: &mut RunState,
    observer: &dyn RunObserver,
) -> Result<PhaseOutcome> {
    let mut outcome = PhaseOutcome::default();
    for phase in phases {
        info!(child = phase.name(), "starting phase");
        let child = phase
            .run(state, observer)
            .await
            .with_context(|| format!("{name}: {}", phase.name()))?;
        outcome.merge(child);
    }
    Ok(outcome)
}

/// Run `steps` concurrently against a snapshot of `state`.
///
/// Every step runs to completion. Outputs of the steps that succeeded are
/// applied in declaration order; if any step failed, the first failure is
/// returned afterwards.
#[instrument(skip_all, fields(phase = name, steps = steps.len()))]
pub async fn run_parallel(
    name: &str,
    steps: &[Arc<dyn Step>],
    state: &mut RunState,
    observer: &dyn RunObserver,
) -> Result<()> {
    validate_disjoint(name, steps)?;
    let snapshot = state.clone();
    let exit = ExitSignal::new();

    let results = join_all(steps.iter().map(|step| step.run(&snapshot, &exit))).await;

    let mut first_err = None;
    for (step, result) in steps.iter().zip(results) {
        match result {
            Ok(output) => {
                if let Some(key) = apply_output(state, step.as_ref(), output, &exit) {
                    observer.on_state_written(step.name(), key, state)?;
                }
            }
            Err(err) => {
                warn!(step = step.name(), err = %format!("{err:#}"), "parallel step failed");
                if first_err.is_none() {
                    first_err = Some(err.context(format!("step {}", step.name())));
                }
            }
        }
    }
    if exit.is_raised() {
        warn!("exit signal raised outside a refinement loop; ignoring");
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn validate_disjoint(name: &str, steps: &[Arc<dyn Step>]) -> Result<()> {
    let mut seen: BTreeSet<StateKey> = BTreeSet::new();
    for step in steps {
        if !seen.insert(step.output_key()) {
            return Err(anyhow!(
                "parallel phase {name}: output key {} written by more than one step",
                step.output_key()
            ));
        }
    }
    Ok(())
}
