//! Stable exit codes for `proposer` commands.

/// Command succeeded; for `run`/`refine`, the proposal was approved.
pub const OK: i32 = 0;
/// Invalid config or run directory, or a step failed.
pub const INVALID: i32 = 1;
/// The refinement loop hit its iteration cap without approval.
pub const EXHAUSTED: i32 = 2;
