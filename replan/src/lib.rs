//! Adaptive plan/execute/revise engine.
//!
//! A goal is compiled into an ordered plan of subtasks. Each subtask is executed
//! through a generative capability and a validated tool gateway; obstacles found
//! along the way are assessed and may replace the remaining part of the plan.
//! Completed work is synthesized into an artifact and refined by a bounded
//! critique loop.
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, budgets, obstacle rules,
//!   invariants, cycle detection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, subprocess generator, tools,
//!   prompt rendering, run artifacts).
//! - **[`agents`]**: One agent per generative call site, all wrapped by the
//!   budgeted call policy.
//!
//! [`run::run_task`] drives a whole task and returns a [`run::RunReport`].

pub mod agents;
pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
pub mod report;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
