//! Proposer configuration stored in `proposer.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::feedback::ApprovalMatch;

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "proposer.toml";

const DEFAULT_REQUEST: &str = "Generate a research proposal for a high school science competition \
such as Synopsis. The proposal should be for a one-semester research project that:
- Is accessible to high school students
- Is of interest to society, humanity, community, and research community
- Is an area of current active research
- Has a good chance of winning based on competition criteria";

/// Proposer configuration (TOML).
///
/// Meant to be edited by humans. Missing fields fall back to defaults that
/// reproduce the standard pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProposerConfig {
    /// Cap on revise+evaluate cycles. The seeding evaluation is not counted.
    pub max_iterations: u32,

    /// How evaluator output is compared against the approval sentinel.
    pub approval_match: ApprovalMatch,

    /// Directory that receives one sub-directory per run.
    pub output_dir: PathBuf,

    /// Competition brief seeded into run state as `request`.
    pub request: String,

    pub generator: GeneratorConfig,

    pub search: SearchConfig,

    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// Spawn `command` with the prompt on stdin.
    Command,
    /// Call an Ollama-compatible `/api/generate` endpoint.
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: GeneratorBackend,
    /// Command line for the `command` backend (e.g. `["codex","exec","-"]`).
    pub command: Vec<String>,
    pub model: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Per-call wall-clock budget.
    pub timeout_secs: u64,
    /// Truncate captured generator output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::Command,
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            model: "llama3.1".to_string(),
            base_url: "http://localhost:11434".to_string(),
            system_prompt: None,
            temperature: None,
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Searxng,
    /// No network search; research steps rely on model knowledge only.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    /// SearXNG base URLs, tried in order.
    pub endpoints: Vec<String>,
    /// Results kept per query.
    pub max_results: usize,
    /// Queries issued per research step.
    pub max_queries: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Searxng,
            endpoints: vec!["http://localhost:8888".to_string()],
            max_results: 5,
            max_queries: 4,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Cap on each state value interpolated into a prompt.
    pub max_value_bytes: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_value_bytes: 40_000,
        }
    }
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            approval_match: ApprovalMatch::Exact,
            output_dir: PathBuf::from("runs"),
            request: DEFAULT_REQUEST.to_string(),
            generator: GeneratorConfig::default(),
            search: SearchConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

impl ProposerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request.trim().is_empty() {
            return Err(anyhow!("request must be non-empty"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        match self.generator.backend {
            GeneratorBackend::Command => {
                if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty()
                {
                    return Err(anyhow!("generator.command must be a non-empty array"));
                }
            }
            GeneratorBackend::Ollama => {
                if self.generator.model.trim().is_empty() {
                    return Err(anyhow!("generator.model must be set for the ollama backend"));
                }
                if self.generator.base_url.trim().is_empty() {
                    return Err(anyhow!(
                        "generator.base_url must be set for the ollama backend"
                    ));
                }
            }
        }
        if self.search.backend == SearchBackend::Searxng && self.search.endpoints.is_empty() {
            return Err(anyhow!("search.endpoints must be non-empty for searxng"));
        }
        if self.search.max_results == 0 {
            return Err(anyhow!("search.max_results must be > 0"));
        }
        if self.search.max_queries == 0 {
            return Err(anyhow!("search.max_queries must be > 0"));
        }
        if self.search.timeout_secs == 0 {
            return Err(anyhow!("search.timeout_secs must be > 0"));
        }
        if self.prompt.max_value_bytes == 0 {
            return Err(anyhow!("prompt.max_value_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ProposerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ProposerConfig> {
    if !path.exists() {
        let cfg = ProposerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProposerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ProposerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
