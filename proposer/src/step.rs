//! Step abstraction shared by every composer.
//!
//! A step reads run state, produces one [`StepOutput`], and never writes state
//! itself: composers apply outputs through [`apply_output`] so every write
//! happens at a single, ordered point.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::core::state::{RunState, StateKey};
use crate::core::types::StepOutput;
use crate::io::generator::{GenerateRequest, TextGenerator};
use crate::io::prompt::PromptEngine;
use crate::io::search::SearchProvider;
use crate::looping::IterationRecord;

/// Zero-argument exit capability handed to steps.
///
/// Raising it is a side effect separate from a step's output. The refinement
/// loop treats a raised signal as approval.
#[derive(Debug, Default)]
pub struct ExitSignal {
    raised: AtomicBool,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// A unit of work producing one named output.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Key that receives this step's [`StepOutput::Text`].
    fn output_key(&self) -> StateKey;

    async fn run(&self, state: &RunState, exit: &ExitSignal) -> Result<StepOutput>;
}

/// Hooks fired as a run makes progress. Errors abort the run.
pub trait RunObserver: Send + Sync {
    fn on_state_written(&self, _step: &str, _key: StateKey, _state: &RunState) -> Result<()> {
        Ok(())
    }

    fn on_iteration(&self, _record: &IterationRecord, _state: &RunState) -> Result<()> {
        Ok(())
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Apply a step's output to `state`.
///
/// `Text` overwrites the step's output key and returns it; `Exit` raises
/// `exit` and leaves state untouched.
pub fn apply_output(
    state: &mut RunState,
    step: &dyn Step,
    output: StepOutput,
    exit: &ExitSignal,
) -> Option<StateKey> {
    match output {
        StepOutput::Text(text) => {
            let key = step.output_key();
            debug!(step = step.name(), key = %key, bytes = text.len(), "writing step output");
            state.set(key, text);
            Some(key)
        }
        StepOutput::Exit => {
            exit.raise();
            None
        }
    }
}

/// Run one step against `state` and apply its output.
///
/// Outside a refinement loop an exit request has nothing to terminate, so it
/// is logged and dropped.
#[instrument(skip_all, fields(step = step.name()))]
pub async fn run_step(
    step: &dyn Step,
    state: &mut RunState,
    observer: &dyn RunObserver,
) -> Result<()> {
    let exit = ExitSignal::new();
    let output = step
        .run(state, &exit)
        .await
        .with_context(|| format!("step {}", step.name()))?;
    if let Some(key) = apply_output(state, step, output, &exit) {
        observer.on_state_written(step.name(), key, state)?;
    }
    if exit.is_raised() {
        warn!(step = step.name(), "exit signal raised outside a refinement loop; ignoring");
    }
    Ok(())
}

/// Capabilities injected into model-backed steps.
#[derive(Clone)]
pub struct Capabilities {
    pub generator: Arc<dyn TextGenerator>,
    pub search: Arc<dyn SearchProvider>,
    pub prompts: Arc<PromptEngine>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("prompts", &self.prompts)
            .finish_non_exhaustive()
    }
}

impl Capabilities {
    /// Call the generator on behalf of `step` for text destined for `output_key`.
    pub async fn generate(&self, step: &str, output_key: StateKey, prompt: String) -> Result<String> {
        self.request(step, Some(output_key), prompt).await
    }

    /// Call the generator for intermediate text that is not written to state.
    pub async fn generate_auxiliary(&self, step: &str, prompt: String) -> Result<String> {
        self.request(step, None, prompt).await
    }

    async fn request(&self, step: &str, output_key: Option<StateKey>, prompt: String) -> Result<String> {
        let request = GenerateRequest {
            step: step.to_string(),
            output_key,
            prompt,
        };
        self.generator
            .generate(&request)
            .await
            .with_context(|| format!("generate {step}"))
    }
}

/// Step that renders one template over run state and returns the model's text.
#[derive(Debug, Clone)]
pub struct PromptStep {
    name: String,
    template: &'static str,
    output_key: StateKey,
    caps: Capabilities,
}

impl PromptStep {
    pub fn new(
        name: impl Into<String>,
        template: &'static str,
        output_key: StateKey,
        caps: Capabilities,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            output_key,
            caps,
        }
    }
}

#[async_trait]
impl Step for PromptStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> StateKey {
        self.output_key
    }

    async fn run(&self, state: &RunState, _exit: &ExitSignal) -> Result<StepOutput> {
        let prompt = self.caps.prompts.render(self.template, state, &[])?;
        let text = self
            .caps
            .generate(&self.name, self.output_key, prompt)
            .await?;
        Ok(StepOutput::Text(text))
    }
}

type StepFn = dyn Fn(&RunState, &ExitSignal) -> Result<StepOutput> + Send + Sync;

/// Step backed by a synchronous closure.
pub struct FnStep {
    name: String,
    output_key: StateKey,
    func: Box<StepFn>,
}

impl FnStep {
    pub fn new<F>(name: impl Into<String>, output_key: StateKey, func: F) -> Self
    where
        F: Fn(&RunState, &ExitSignal) -> Result<StepOutput> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            output_key,
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for FnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("output_key", &self.output_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> StateKey {
        self.output_key
    }

    async fn run(&self, state: &RunState, exit: &ExitSignal) -> Result<StepOutput> {
        (self.func)(state, exit)
    }
}
