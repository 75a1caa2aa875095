//! Scripted capabilities and state fixtures for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::agents;
use crate::core::state::{RunState, StateKey};
use crate::core::types::StepOutput;
use crate::io::generator::{GenerateRequest, TextGenerator};
use crate::io::prompt::PromptEngine;
use crate::io::search::SearchProvider;
use crate::step::{Capabilities, FnStep, Step};

#[derive(Debug)]
enum Scripted {
    Text(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct GeneratorScript {
    responses: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<GenerateRequest>,
}

/// Generator returning queued responses per step name and recording calls.
///
/// A call for a step with nothing queued fails.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    inner: Arc<Mutex<GeneratorScript>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `responses` for `step`, in order.
    pub fn respond<I, S>(self, step: &str, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut script = self.lock();
            let queue = script.responses.entry(step.to_string()).or_default();
            queue.extend(responses.into_iter().map(|text| Scripted::Text(text.into())));
        }
        self
    }

    /// Queue a failure for the next call of `step`.
    pub fn fail(self, step: &str, message: &str) -> Self {
        {
            let mut script = self.lock();
            script
                .responses
                .entry(step.to_string())
                .or_default()
                .push_back(Scripted::Fail(message.to_string()));
        }
        self
    }

    /// Canned output for every step that runs before the refinement loop.
    pub fn with_research_phase(self) -> Self {
        self.respond(
            agents::WINNING_PROJECTS_RESEARCHER,
            ["Algae bioplastics (ISEF 2023)"],
        )
        .respond(agents::CRITERIA_RESEARCHER, ["Creativity 30%, Method 30%"])
        .respond(agents::CRITERIA_ANALYZER, ["Prioritize method rigour"])
        .respond("TopicIntersector.queries", ["bioplastic algae 2024"])
        .respond(agents::TOPIC_INTERSECTOR, ["Algae bioplastics; soil microbiome"])
        .respond(agents::TOPIC_PROPOSER, ["X"])
    }

    pub fn calls(&self) -> Vec<GenerateRequest> {
        self.lock().calls.clone()
    }

    /// Names of the steps that called the generator, in call order.
    pub fn call_steps(&self) -> Vec<String> {
        self.lock().calls.iter().map(|call| call.step.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GeneratorScript> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let mut script = self.lock();
        script.calls.push(request.clone());
        match script
            .responses
            .get_mut(&request.step)
            .and_then(VecDeque::pop_front)
        {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response for step {}", request.step)),
        }
    }
}

#[derive(Debug, Default)]
struct SearchScript {
    queries: Vec<String>,
    failing: HashSet<String>,
}

/// Search provider answering `results for <query>` and recording queries.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSearch {
    inner: Arc<Mutex<SearchScript>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(self, query: &str) -> Self {
        self.lock().failing.insert(query.to_string());
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SearchScript> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, query: &str) -> Result<String> {
        let mut script = self.lock();
        script.queries.push(query.to_string());
        if script.failing.contains(query) {
            return Err(anyhow!("search '{query}': endpoint unreachable"));
        }
        Ok(format!("results for {query}"))
    }
}

pub fn capabilities(generator: ScriptedGenerator) -> Capabilities {
    capabilities_with_search(generator, Arc::new(ScriptedSearch::new()))
}

pub fn capabilities_with_search(
    generator: ScriptedGenerator,
    search: Arc<dyn SearchProvider>,
) -> Capabilities {
    Capabilities {
        generator: Arc::new(generator),
        search,
        prompts: Arc::new(PromptEngine::new(40_000)),
    }
}

/// State as it stands when the refinement loop starts.
pub fn seeded_state(proposal: &str, feedback: &str) -> RunState {
    [
        (StateKey::TopicProposal, "X".to_string()),
        (StateKey::ResearchProposal, proposal.to_string()),
        (StateKey::EvaluationFeedback, feedback.to_string()),
    ]
    .into_iter()
    .collect()
}

/// Step emitting `outputs` in order, failing once they run out.
pub fn sequence_step(name: &str, key: StateKey, outputs: &[&str]) -> Arc<dyn Step> {
    let queue: Mutex<VecDeque<String>> =
        Mutex::new(outputs.iter().map(|text| text.to_string()).collect());
    let step_name = name.to_string();
    Arc::new(FnStep::new(name, key, move |_, _| {
        let next = queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        next.map(StepOutput::Text)
            .ok_or_else(|| anyhow!("{step_name} has no scripted output left"))
    }))
}
