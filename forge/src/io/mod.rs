//! Side-effecting adapters: network, filesystem, processes and prompts.

pub mod build;
pub mod config;
pub mod dispatcher;
pub mod process;
pub mod prompt;
pub mod sink;
pub mod tree_store;
