//! Stable exit codes for `replan` commands.

/// Command succeeded; for `run`, the task completed and an artifact was written.
pub const OK: i32 = 0;
/// Invalid config or input, or a terminal error such as exhausted generation.
pub const INVALID: i32 = 1;
/// `replan run` ended because the task was judged infeasible or revisions cycled.
pub const ABORTED: i32 = 2;
/// `replan run` was cancelled between subtasks.
pub const CANCELLED: i32 = 3;
