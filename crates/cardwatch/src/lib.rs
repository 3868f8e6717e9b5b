//! Cardwatch Library
//!
//! Command line handling and the simulated card script driven by the
//! `cardwatch` binary. The binary itself is in main.rs.

pub mod cli;
pub mod demo;

// Re-export commonly used types
pub use cli::Args;
pub use demo::{log_transitions, run_script};
