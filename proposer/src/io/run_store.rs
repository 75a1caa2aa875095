//! On-disk layout for a single pipeline run.
//!
//! ```text
//! <output_dir>/<run_id>/
//!   state.json          latest RunState (rewritten after every step)
//!   meta.json           run status, termination, counters, timestamps
//!   proposal.md         final research proposal
//!   iterations/<n>/     per-iteration snapshots (see `iteration_log`)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::write_atomic;
use crate::core::state::RunState;
use crate::core::types::Termination;

const RUN_STATE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/run_state.schema.json"
));

/// Canonical paths within one run directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub state_path: PathBuf,
    pub meta_path: PathBuf,
    pub proposal_path: PathBuf,
    pub iterations_dir: PathBuf,
}

impl RunPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            state_path: dir.join("state.json"),
            meta_path: dir.join("meta.json"),
            proposal_path: dir.join("proposal.md"),
            iterations_dir: dir.join("iterations"),
            dir,
        }
    }

    /// Directory for the `n`th completed iteration of `loop_name`.
    pub fn iteration_dir(&self, loop_name: &str, n: u32) -> PathBuf {
        self.iterations_dir.join(loop_name).join(n.to_string())
    }
}

/// Lifecycle of a run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Persisted bookkeeping for a run (`meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub status: RunStatus,
    /// `approved` or `exhausted` once the refinement loop has finished.
    pub termination: Option<Termination>,
    /// Completed refinement iterations, across resumes.
    pub iterations: u32,
    /// Evaluations made inside the refinement loop, across resumes.
    #[serde(default)]
    pub evaluations: u32,
    pub started_at: String,
    pub finished_at: Option<String>,
    /// Error chain when `status` is `failed`.
    pub error: Option<String>,
}

impl RunMeta {
    pub fn started(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Running,
            termination: None,
            iterations: 0,
            evaluations: 0,
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            error: None,
        }
    }

    /// Mark the run completed, adding this invocation's loop counters.
    pub fn complete(&mut self, termination: Termination, iterations: u32, evaluations: u32) {
        self.status = RunStatus::Completed;
        self.termination = Some(termination);
        self.iterations += iterations;
        self.evaluations += evaluations;
        self.finished_at = Some(Utc::now().to_rfc3339());
        self.error = None;
    }

    /// Reopen a finished run for another refinement pass.
    pub fn resume(&mut self) {
        self.status = RunStatus::Running;
        self.termination = None;
        self.finished_at = None;
        self.error = None;
    }

    pub fn fail(&mut self, err: &anyhow::Error) {
        self.status = RunStatus::Failed;
        self.error = Some(format!("{err:#}"));
        self.finished_at = Some(Utc::now().to_rfc3339());
    }
}

/// Create a fresh run directory under `output_dir`, returning its id and paths.
///
/// Ids are `run-<UTC timestamp>`, suffixed with `-<n>` when a directory with
/// the same id already exists.
pub fn create_run_dir(output_dir: &Path) -> Result<(String, RunPaths)> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("create output dir {}", output_dir.display()))?;
    let base = format!("run-{}", Utc::now().format("%Y%m%d_%H%M%S"));

    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        let dir = output_dir.join(&id);
        match fs::create_dir(&dir) {
            Ok(()) => {
                info!(run_id = %id, dir = %dir.display(), "created run directory");
                return Ok((id, RunPaths::new(dir)));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create run dir {}", dir.display()));
            }
        }
    }

    Err(anyhow!(
        "unable to generate unique run id from base '{base}' (too many existing runs)"
    ))
}

/// Atomically write run state to disk.
pub fn write_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), keys = state.len(), "writing run state");
    let mut buf = serde_json::to_string_pretty(state).context("serialize run state")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Load run state from disk, validating it against the run state schema.
pub fn load_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate {}", path.display()))?;
    let state: RunState = serde_json::from_value(value)
        .with_context(|| format!("deserialize run state {}", path.display()))?;
    Ok(state)
}

pub fn write_meta(path: &Path, meta: &RunMeta) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(meta).context("serialize run meta")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub fn load_meta(path: &Path) -> Result<RunMeta> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run meta {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse run meta {}", path.display()))
}

/// Write the final proposal as plain markdown.
pub fn write_proposal(path: &Path, proposal: &str) -> Result<()> {
    let mut buf = proposal.to_string();
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    write_atomic(path, &buf)
}

fn validate_schema(state: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(RUN_STATE_SCHEMA).context("parse run state schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(state) {
        let messages = compiled
            .iter_errors(state)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "run state schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
