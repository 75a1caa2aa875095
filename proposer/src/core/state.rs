//! Run-scoped key/value state threaded through every step.
//!
//! Each run owns exactly one [`RunState`]. Steps read it by reference and
//! composers apply step outputs to it; there is no process-wide store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Named state keys written by the proposal pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    /// The user's competition brief, seeded before the first phase.
    Request,
    WinningProjects,
    EvaluationCriteria,
    PracticalCriteria,
    IntersectedTopics,
    TopicProposal,
    /// Current proposal draft. Written by both the initial and revision writers.
    ResearchProposal,
    /// Latest evaluator verdict. Written by both the initial and loop evaluators.
    EvaluationFeedback,
}

impl StateKey {
    pub const ALL: [StateKey; 8] = [
        StateKey::Request,
        StateKey::WinningProjects,
        StateKey::EvaluationCriteria,
        StateKey::PracticalCriteria,
        StateKey::IntersectedTopics,
        StateKey::TopicProposal,
        StateKey::ResearchProposal,
        StateKey::EvaluationFeedback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::Request => "request",
            StateKey::WinningProjects => "winning_projects",
            StateKey::EvaluationCriteria => "evaluation_criteria",
            StateKey::PracticalCriteria => "practical_criteria",
            StateKey::IntersectedTopics => "intersected_topics",
            StateKey::TopicProposal => "topic_proposal",
            StateKey::ResearchProposal => "research_proposal",
            StateKey::EvaluationFeedback => "evaluation_feedback",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        StateKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| anyhow!("unknown state key '{s}'"))
    }
}

/// String-to-string mapping persisted across the steps of one run.
///
/// Writes are last-write-wins and no history is retained. Absent keys read as
/// the empty string through [`RunState::get_or_empty`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunState {
    values: BTreeMap<String, String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: StateKey) -> Option<&str> {
        self.values.get(key.as_str()).map(String::as_str)
    }

    pub fn get_or_empty(&self, key: StateKey) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Overwrite `key`, returning the value it replaced.
    pub fn set(&mut self, key: StateKey, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.as_str().to_string(), value.into())
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.values.contains_key(key.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Ensure every listed key is present, naming the missing ones otherwise.
    pub fn require(&self, keys: &[StateKey]) -> Result<()> {
        let missing: Vec<&str> = keys
            .iter()
            .filter(|key| !self.contains(**key))
            .map(|key| key.as_str())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(anyhow!("run state missing keys: {}", missing.join(", ")))
    }
}

impl FromIterator<(StateKey, String)> for RunState {
    fn from_iter<I: IntoIterator<Item = (StateKey, String)>>(iter: I) -> Self {
        let mut state = RunState::new();
        for (key, value) in iter {
            state.set(key, value);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_writes_replace_earlier_ones() {
        let mut state = RunState::new();
        assert_eq!(state.set(StateKey::ResearchProposal, "draft1"), None);
        assert_eq!(
            state.set(StateKey::ResearchProposal, "draft2"),
            Some("draft1".to_string())
        );
        assert_eq!(state.get(StateKey::ResearchProposal), Some("draft2"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn absent_keys_read_as_empty() {
        let state = RunState::new();
        assert_eq!(state.get(StateKey::TopicProposal), None);
        assert_eq!(state.get_or_empty(StateKey::TopicProposal), "");
    }

    #[test]
    fn keys_parse_from_their_wire_names() {
        for key in StateKey::ALL {
            assert_eq!(key.as_str().parse::<StateKey>().expect("parse"), key);
        }
        assert!("research".parse::<StateKey>().is_err());
    }

    #[test]
    fn require_names_missing_keys() {
        let state: RunState = [(StateKey::TopicProposal, "X".to_string())]
            .into_iter()
            .collect();
        let err = state
            .require(&[StateKey::TopicProposal, StateKey::ResearchProposal])
            .unwrap_err();
        assert!(err.to_string().contains("research_proposal"));
        assert!(!err.to_string().contains("topic_proposal"));
    }

    #[test]
    fn serializes_as_flat_object() {
        let mut state = RunState::new();
        state.set(StateKey::EvaluationFeedback, "APPROVED");
        let json = serde_json::to_string(&state).expect("serialize");
        assert_eq!(json, r#"{"evaluation_feedback":"APPROVED"}"#);
    }
}
