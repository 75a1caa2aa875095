//! Shared deterministic types for step results and loop termination.
//!
//! These types define stable contracts between steps, composers and the
//! refinement loop. They do not depend on I/O.

use serde::{Deserialize, Serialize};

/// Tagged result of running a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutput {
    /// Normal output, written to the step's output key.
    Text(String),
    /// The step invoked the exit capability instead of producing output.
    Exit,
}

impl StepOutput {
    pub fn text(value: impl Into<String>) -> Self {
        StepOutput::Text(value.into())
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, StepOutput::Exit)
    }
}

/// Outcome of a refinement loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    /// Run the next iteration.
    Continue,
    /// A step requested an explicit exit.
    Approved,
    /// The iteration cap was reached.
    Exhausted,
}

impl Termination {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Termination::Continue)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Termination::Continue => "continue",
            Termination::Approved => "approved",
            Termination::Exhausted => "exhausted",
        }
    }
}

/// Mutable bookkeeping for one refinement loop execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopState {
    /// Completed revise+evaluate cycles (0-indexed position of the next one).
    pub iteration: u32,
    pub max_iterations: u32,
    pub signal: Termination,
}

impl LoopState {
    pub fn new(max_iterations: u32) -> Self {
        let mut state = Self {
            iteration: 0,
            max_iterations,
            signal: Termination::Continue,
        };
        state.check_cap();
        state
    }

    /// Record the exit signal. Once terminal, the signal never changes.
    pub fn approve(&mut self) {
        if !self.signal.is_terminal() {
            self.signal = Termination::Approved;
        }
    }

    /// Count a completed cycle and apply the iteration cap.
    pub fn complete_iteration(&mut self) {
        self.iteration += 1;
        self.check_cap();
    }

    fn check_cap(&mut self) {
        if !self.signal.is_terminal() && self.iteration >= self.max_iterations {
            self.signal = Termination::Exhausted;
        }
    }
}
