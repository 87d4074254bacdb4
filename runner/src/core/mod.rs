//! Deterministic, pure logic shared by the reliability layer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod agent_output;
pub mod backoff;
pub mod graph;
pub mod roadmap;
pub mod truncate;
pub mod types;
