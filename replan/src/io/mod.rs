//! Side-effecting collaborators: config files, subprocesses, tools, prompts, run artifacts.

pub mod config;
pub mod gateway;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod tools;
