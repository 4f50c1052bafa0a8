//! Deterministic, pure logic shared by the forge pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod blueprint;
pub mod classifier;
pub mod contract;
pub mod decode;
pub mod diagnostics;
pub mod invariants;
pub mod path;
pub mod provider;
pub mod types;
