//! Multi-agent research proposal pipeline.
//!
//! A fixed sequence of prompted steps researches winning competition projects
//! and judging criteria, picks a topic, drafts a proposal, then refines it in a
//! bounded revise/evaluate loop until the evaluator answers `APPROVED` or the
//! iteration cap is reached. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (run state, loop bookkeeping,
//!   approval matching, critique and proposal parsing). No I/O.
//! - **[`io`]**: Side-effecting adapters (text generation, web search, prompt
//!   templates, config, run persistence). Behind traits so tests can script
//!   them.
//!
//! Orchestration modules ([`step`], [`looping`], [`compose`], [`pipeline`],
//! [`session`]) wire core logic to the adapters and back the CLI commands.

pub mod agents;
pub mod compose;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod pipeline;
pub mod session;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
