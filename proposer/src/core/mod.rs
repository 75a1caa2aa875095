//! Deterministic, pure logic shared by the proposal pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod feedback;
pub mod proposal;
pub mod state;
pub mod types;
