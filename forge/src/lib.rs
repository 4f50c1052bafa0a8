//! Spec-to-React-project generator.
//!
//! Forge turns a free-text application spec into a React + TypeScript project
//! in one of two modes:
//!
//! - **Decompose** ([`decompose`]): a planner produces a root work item, and a
//!   breadth-first [`schedule::Scheduler`] routes every item to detail
//!   expansion, a split into children, or finalization into a single file.
//! - **Project** ([`project`]): an architect designs the whole file graph and
//!   prop contracts up front, units are generated against it, and a
//!   [`repair`] loop patches the files a failing build points at.
//!
//! The layering keeps side effects at the edges:
//!
//! - **[`core`]**: Pure logic (routing tokens, path rules, blueprint and contract
//!   checks, diagnostic parsing, provider payload shapes). No I/O.
//! - **[`io`]**: Config, prompts, the HTTP dispatcher, file sinks and the build
//!   command. Every side effect sits behind a trait so tests can script it.
//! - **[`agents`]**: One generation call each, validated before use.

pub mod agents;
pub mod core;
pub mod decompose;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod project;
pub mod repair;
pub mod schedule;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
