//! Text-generation capability.
//!
//! The [`TextGenerator`] trait decouples steps from the model backend. Real
//! backends spawn a CLI agent ([`CommandGenerator`]) or call an
//! Ollama-compatible HTTP API ([`OllamaGenerator`]). Tests use scripted
//! generators that return canned text without touching the network.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::state::StateKey;
use crate::io::config::{GeneratorBackend, GeneratorConfig};
use crate::io::process::run_command_with_timeout;

/// A single generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Name of the step issuing the call.
    pub step: String,
    /// State key the response is written to. `None` for auxiliary calls,
    /// such as query generation, whose text never reaches run state.
    pub output_key: Option<StateKey>,
    /// Fully rendered prompt.
    pub prompt: String,
}

/// Abstraction over model backends.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a response for `request`. Failures are returned, never retried.
    async fn generate(&self, request: &GenerateRequest) -> Result<String>;
}

/// Build the generator selected by config.
pub fn from_config(cfg: &GeneratorConfig) -> Result<Arc<dyn TextGenerator>> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    let generator: Arc<dyn TextGenerator> = match cfg.backend {
        GeneratorBackend::Command => Arc::new(CommandGenerator::new(
            cfg.command.clone(),
            timeout,
            cfg.output_limit_bytes,
        )?),
        GeneratorBackend::Ollama => Arc::new(OllamaGenerator::new(cfg, timeout)?),
    };
    Ok(generator)
}

/// Generator that spawns a command, writes the prompt to stdin and reads the
/// response from stdout (e.g. `codex exec -`).
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("generator command must be non-empty"));
        }
        Ok(Self {
            command,
            timeout,
            output_limit_bytes,
        })
    }
}

#[async_trait]
impl TextGenerator for CommandGenerator {
    #[instrument(skip_all, fields(step = %request.step, output_key = ?request.output_key, program = %self.command[0]))]
    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        info!(prompt_bytes = request.prompt.len(), "starting generator command");
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        let prompt = request.prompt.clone();
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;

        let output = tokio::task::spawn_blocking(move || {
            run_command_with_timeout(cmd, Some(prompt.as_bytes()), timeout, limit)
        })
        .await
        .context("join generator command")?
        .with_context(|| format!("run generator command '{}'", self.command[0]))?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "generator command timed out");
            return Err(anyhow!("generator command timed out after {timeout:?}"));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator command failed");
            return Err(anyhow!(
                "generator command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(5)
            ));
        }

        let text = strip_line_terminator(output.stdout_lossy());
        debug!(response_bytes = text.len(), "generator command completed");
        Ok(text)
    }
}

/// Drop the single line terminator a CLI appends to its final message.
fn strip_line_terminator(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}

/// Generator backed by an Ollama-compatible `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    system_prompt: Option<String>,
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

impl OllamaGenerator {
    pub fn new(cfg: &GeneratorConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            system_prompt: cfg.system_prompt.clone(),
            temperature: cfg.temperature,
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> OllamaRequest<'a> {
        OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            system: self.system_prompt.as_deref(),
            options: self
                .temperature
                .map(|temperature| OllamaOptions { temperature }),
        }
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    #[instrument(skip_all, fields(step = %request.step, output_key = ?request.output_key, model = %self.model))]
    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        info!(prompt_bytes = request.prompt.len(), "sending generate request");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(&request.prompt))
            .send()
            .await
            .with_context(|| format!("post {}", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("generate request to {} failed", self.endpoint))?;
        let body: OllamaResponse = response
            .json()
            .await
            .context("parse generate response")?;
        if !body.done {
            warn!("generate response not marked done");
        }
        debug!(response_bytes = body.response.len(), "generate request completed");
        Ok(body.response)
    }
}
