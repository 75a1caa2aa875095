//! Per-iteration snapshots under `<run>/iterations/<loop>/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::core::feedback::{ApprovalMatch, Feedback};
use crate::core::proposal::missing_sections;
use crate::core::types::Termination;
use crate::io::run_store::RunPaths;
use crate::looping::IterationRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub loop_name: String,
    pub iter: u32,
    pub signal: Termination,
    pub approved: bool,
    pub proposal_bytes: usize,
    pub feedback_bytes: usize,
    /// Required proposal sections with no matching heading.
    pub missing_proposal_sections: Vec<String>,
    /// Critique sections the evaluator left out (empty when approved).
    pub missing_critique_sections: Vec<String>,
    pub recorded_at: String,
}

impl IterationMeta {
    pub fn from_record(run_id: &str, record: &IterationRecord, mode: ApprovalMatch) -> Self {
        let feedback = Feedback::classify(&record.feedback, mode);
        let missing_critique_sections = match &feedback {
            Feedback::Approved => Vec::new(),
            Feedback::Critique(critique) => critique
                .missing_sections()
                .into_iter()
                .map(|section| section.as_str().to_string())
                .collect(),
        };
        Self {
            run_id: run_id.to_string(),
            loop_name: record.loop_name.clone(),
            iter: record.iteration,
            signal: record.signal,
            approved: feedback.is_approved(),
            proposal_bytes: record.proposal.len(),
            feedback_bytes: record.feedback.len(),
            missing_proposal_sections: missing_sections(&record.proposal)
                .into_iter()
                .map(|section| section.as_str().to_string())
                .collect(),
            missing_critique_sections,
            recorded_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub proposal_path: PathBuf,
    pub feedback_path: PathBuf,
}

impl IterationPaths {
    pub fn new(run: &RunPaths, loop_name: &str, iter: u32) -> Self {
        let dir = run.iteration_dir(loop_name, iter);
        Self {
            meta_path: dir.join("meta.json"),
            proposal_path: dir.join("proposal.md"),
            feedback_path: dir.join("feedback.md"),
            dir,
        }
    }
}

/// Write the proposal, feedback and meta for one completed iteration.
pub fn write_iteration(
    run: &RunPaths,
    record: &IterationRecord,
    meta: &IterationMeta,
) -> Result<IterationPaths> {
    let paths = IterationPaths::new(run, &record.loop_name, record.iteration);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    write_text(&paths.proposal_path, &record.proposal)?;
    write_text(&paths.feedback_path, &record.feedback)?;
    let mut buf = serde_json::to_string_pretty(meta).context("serialize iteration meta")?;
    buf.push('\n');
    write_text(&paths.meta_path, &buf)?;

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(feedback: &str) -> IterationRecord {
        IterationRecord {
            loop_name: "ProposalRefinementLoop".to_string(),
            iteration: 2,
            proposal: "# Title\n\n## Abstract\nShort.\n".to_string(),
            feedback: feedback.to_string(),
            signal: Termination::Continue,
        }
    }

    #[test]
    fn writes_iteration_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = RunPaths::new(temp.path().join("run-1"));
        let record = record("**Weaknesses:**\n- no controls");
        let meta = IterationMeta::from_record("run-1", &record, ApprovalMatch::Exact);

        let paths = write_iteration(&run, &record, &meta).expect("write");

        assert!(paths.dir.ends_with("iterations/ProposalRefinementLoop/2"));
        assert_eq!(
            fs::read_to_string(&paths.feedback_path).expect("read"),
            "**Weaknesses:**\n- no controls"
        );
        assert!(paths.proposal_path.is_file());
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read"))
                .expect("json");
        assert_eq!(value["iter"], 2);
        assert_eq!(value["approved"], false);
        assert_eq!(value["signal"], "continue");
    }

    #[test]
    fn meta_reports_missing_sections() {
        let meta = IterationMeta::from_record(
            "run-1",
            &record("**Weaknesses:**\n- no controls"),
            ApprovalMatch::Exact,
        );
        assert!(!meta.approved);
        assert!(meta.missing_proposal_sections.contains(&"methodology".to_string()));
        assert!(!meta.missing_proposal_sections.contains(&"abstract".to_string()));
        assert!(!meta.missing_critique_sections.is_empty());
        assert!(!meta.missing_critique_sections.contains(&"weaknesses".to_string()));
    }

    #[test]
    fn approved_meta_has_no_critique_gaps() {
        let meta = IterationMeta::from_record("run-1", &record("APPROVED"), ApprovalMatch::Exact);
        assert!(meta.approved);
        assert!(meta.missing_critique_sections.is_empty());
    }
}
