//! Search-backed research agents.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::try_join_all;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::state::{RunState, StateKey};
use crate::core::types::StepOutput;
use crate::step::{Capabilities, ExitSignal, Step};

/// Where a research step gets its search queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    /// A fixed list of queries.
    Fixed(Vec<String>),
    /// Queries written by the model from `template`, one per line.
    Generated { template: &'static str },
}

impl QuerySource {
    pub fn fixed<I, S>(queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QuerySource::Fixed(queries.into_iter().map(Into::into).collect())
    }
}

/// Runs searches, then asks the model to synthesize `search_results`.
#[derive(Debug, Clone)]
pub struct ResearchStep {
    name: String,
    template: &'static str,
    output_key: StateKey,
    queries: QuerySource,
    max_queries: usize,
    caps: Capabilities,
}

impl ResearchStep {
    pub fn new(
        name: impl Into<String>,
        template: &'static str,
        output_key: StateKey,
        queries: QuerySource,
        max_queries: usize,
        caps: Capabilities,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            output_key,
            queries,
            max_queries,
            caps,
        }
    }

    async fn queries(&self, state: &RunState) -> Result<Vec<String>> {
        let mut queries = match &self.queries {
            QuerySource::Fixed(list) => list.clone(),
            QuerySource::Generated { template } => {
                let prompt = self.caps.prompts.render(template, state, &[])?;
                let step = format!("{}.queries", self.name);
                let text = self.caps.generate_auxiliary(&step, prompt).await?;
                parse_queries(&text)
            }
        };
        queries.truncate(self.max_queries);
        Ok(queries)
    }
}

#[async_trait]
impl Step for ResearchStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> StateKey {
        self.output_key
    }

    #[instrument(skip_all, fields(step = %self.name))]
    async fn run(&self, state: &RunState, _exit: &ExitSignal) -> Result<StepOutput> {
        let queries = self.queries(state).await?;
        if queries.is_empty() {
            warn!("no search queries; synthesizing without search results");
        }
        info!(queries = queries.len(), "running searches");

        let results = try_join_all(queries.iter().map(|query| self.caps.search.search(query))).await?;
        let search_results = results.join("\n");
        debug!(bytes = search_results.len(), "aggregated search results");

        let prompt = self.caps.prompts.render(
            self.template,
            state,
            &[("search_results", search_results.as_str())],
        )?;
        let text = self
            .caps
            .generate(&self.name, self.output_key, prompt)
            .await?;
        Ok(StepOutput::Text(text))
    }
}

static LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*(?:[-*•]|\d+[.)])[ \t]+").expect("list marker regex should compile")
});

/// Parse one query per line, dropping list markers, blanks and duplicates.
pub fn parse_queries(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    text.lines()
        .map(|line| {
            LIST_MARKER_RE
                .replace(line, "")
                .trim()
                .trim_matches('"')
                .trim()
                .to_string()
        })
        .filter(|query| !query.is_empty())
        .filter(|query| seen.insert(query.to_ascii_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{ScriptedGenerator, ScriptedSearch, capabilities_with_search};

    #[test]
    fn parses_query_lines() {
        let text = "1. CRISPR soil bacteria 2024\n- microplastics filtration\n\n\"CRISPR soil bacteria 2024\"\n* bioplastic algae\n2024 perovskite solar cells";
        assert_eq!(
            parse_queries(text),
            vec![
                "CRISPR soil bacteria 2024",
                "microplastics filtration",
                "bioplastic algae",
                "2024 perovskite solar cells"
            ]
        );
    }

    #[tokio::test]
    async fn fixed_queries_are_capped_and_aggregated() {
        let generator = ScriptedGenerator::new().respond("CriteriaResearcher", ["criteria"]);
        let search = ScriptedSearch::new();
        let caps = capabilities_with_search(generator.clone(), Arc::new(search.clone()));
        let step = ResearchStep::new(
            "CriteriaResearcher",
            "criteria_researcher",
            StateKey::EvaluationCriteria,
            QuerySource::fixed(["isef rubric", "sts criteria", "synopsys rubric"]),
            2,
            caps,
        );

        let output = step
            .run(&RunState::new(), &ExitSignal::new())
            .await
            .expect("run");

        assert_eq!(output, StepOutput::text("criteria"));
        assert_eq!(search.queries(), vec!["isef rubric", "sts criteria"]);
        let prompt = &generator.calls()[0].prompt;
        assert!(prompt.contains("results for isef rubric"));
        assert!(prompt.contains("results for sts criteria"));
        assert!(!prompt.contains("synopsys rubric"));
    }

    #[tokio::test]
    async fn generated_queries_come_from_the_model() {
        let generator = ScriptedGenerator::new()
            .respond("TopicIntersector.queries", ["algae biofuel\nsoil microbiome"])
            .respond("TopicIntersector", ["topics"]);
        let search = ScriptedSearch::new();
        let caps = capabilities_with_search(generator.clone(), Arc::new(search.clone()));
        let step = ResearchStep::new(
            "TopicIntersector",
            "topic_intersector",
            StateKey::IntersectedTopics,
            QuerySource::Generated {
                template: "intersector_queries",
            },
            4,
            caps,
        );
        let mut state = RunState::new();
        state.set(StateKey::WinningProjects, "Algae biofuel (ISEF 2023)");

        let output = step.run(&state, &ExitSignal::new()).await.expect("run");

        assert_eq!(output, StepOutput::text("topics"));
        assert_eq!(search.queries(), vec!["algae biofuel", "soil microbiome"]);
        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].prompt.contains("Algae biofuel (ISEF 2023)"));
        assert!(calls[1].prompt.contains("results for soil microbiome"));
        assert_eq!(calls[0].output_key, None);
        assert_eq!(calls[1].output_key, Some(StateKey::IntersectedTopics));
    }

    #[tokio::test]
    async fn search_failure_fails_the_step() {
        let generator = ScriptedGenerator::new().respond("CriteriaResearcher", ["unused"]);
        let search = ScriptedSearch::new().fail_on("sts criteria");
        let caps = capabilities_with_search(generator.clone(), Arc::new(search));
        let step = ResearchStep::new(
            "CriteriaResearcher",
            "criteria_researcher",
            StateKey::EvaluationCriteria,
            QuerySource::fixed(["isef rubric", "sts criteria"]),
            4,
            caps,
        );

        let err = step
            .run(&RunState::new(), &ExitSignal::new())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("sts criteria"));
        assert!(generator.calls().is_empty());
    }
}
