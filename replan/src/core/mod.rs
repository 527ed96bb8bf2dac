//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod cycle_guard;
pub mod immutability;
pub mod invariants;
pub mod obstacle;
pub mod parse;
pub mod selector;
pub mod types;
