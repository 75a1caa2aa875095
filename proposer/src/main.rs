//! `proposer` CLI: generate and refine research competition proposals.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use proposer::core::types::Termination;
use proposer::exit_codes;
use proposer::io::config::{DEFAULT_CONFIG_FILE, ProposerConfig, load_config, write_config};
use proposer::io::prompt::PromptEngine;
use proposer::io::{generator, search};
use proposer::logging;
use proposer::pipeline::{Pipeline, PipelineOutcome};
use proposer::session::Session;
use proposer::step::Capabilities;

#[derive(Parser)]
#[command(
    name = "proposer",
    version,
    about = "Multi-agent research proposal generator with a bounded refinement loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Run the full pipeline in a new run directory.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Competition brief; overrides `request` from config.
        #[arg(long)]
        request: Option<String>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Run more refinement iterations on an existing run directory.
    Refine {
        run_dir: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => {
            cmd_init(&config, force)?;
            Ok(exit_codes::OK)
        }
        Command::Run {
            config,
            request,
            max_iterations,
            output_dir,
        } => {
            let mut cfg = load_config(&config)?;
            if let Some(request) = request {
                cfg.request = request;
            }
            if let Some(output_dir) = output_dir {
                cfg.output_dir = output_dir;
            }
            apply_max_iterations(&mut cfg, max_iterations)?;
            runtime()?.block_on(cmd_run(&cfg))
        }
        Command::Refine {
            run_dir,
            config,
            max_iterations,
        } => {
            let mut cfg = load_config(&config)?;
            apply_max_iterations(&mut cfg, max_iterations)?;
            runtime()?.block_on(cmd_refine(&cfg, &run_dir))
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ProposerConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn cmd_run(cfg: &ProposerConfig) -> Result<i32> {
    let caps = capabilities(cfg)?;
    let pipeline = Pipeline::standard(cfg, &caps);
    let (mut session, mut state) = Session::start(&cfg.output_dir, &cfg.request, cfg.approval_match)?;
    let outcome = session.execute(&pipeline, &mut state).await?;
    Ok(report(&session, &outcome))
}

async fn cmd_refine(cfg: &ProposerConfig, run_dir: &Path) -> Result<i32> {
    if !run_dir.is_dir() {
        bail!("run dir not found: {}", run_dir.display());
    }
    let caps = capabilities(cfg)?;
    let pipeline = Pipeline::refinement_only(cfg, &caps);
    let (mut session, mut state) = Session::resume(run_dir, cfg.approval_match)?;
    let outcome = session.execute(&pipeline, &mut state).await?;
    Ok(report(&session, &outcome))
}

fn capabilities(cfg: &ProposerConfig) -> Result<Capabilities> {
    debug!(backend = ?cfg.generator.backend, search = ?cfg.search.backend, "building capabilities");
    Ok(Capabilities {
        generator: generator::from_config(&cfg.generator).context("configure generator")?,
        search: search::from_config(&cfg.search).context("configure search")?,
        prompts: Arc::new(PromptEngine::new(cfg.prompt.max_value_bytes)),
    })
}

fn apply_max_iterations(cfg: &mut ProposerConfig, max_iterations: Option<u32>) -> Result<()> {
    if let Some(max) = max_iterations {
        cfg.max_iterations = max;
    }
    cfg.validate()
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")
}

fn report(session: &Session, outcome: &PipelineOutcome) -> i32 {
    println!(
        "run: id={} termination={} iterations={} dir={}",
        session.run_id(),
        outcome.termination.as_str(),
        outcome.iterations,
        session.paths().dir.display()
    );
    exit_code(outcome.termination)
}

fn exit_code(termination: Termination) -> i32 {
    match termination {
        Termination::Approved => exit_codes::OK,
        Termination::Exhausted => exit_codes::EXHAUSTED,
        Termination::Continue => exit_codes::INVALID,
    }
}
