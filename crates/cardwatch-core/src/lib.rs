//! # cardwatch-core
//!
//! Core types for cardwatch.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other cardwatch crates. It provides:
//!
//! - Session status types (SessionState, Activity, PendingCommand)
//! - Card data model (identity, address, photo, certificate chains)
//! - Error taxonomy
//! - YAML configuration
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other cardwatch crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod card;
pub mod config;
pub mod error;
pub mod status;

// Re-export commonly used types
pub use card::{Address, CardData, Certificate, CertificateChain, Gender, Identity, Photo};
pub use config::{CardwatchConfig, LoggingSettings, SessionConfig, SessionSettings, SimulationSettings};
pub use error::{Error, Result};
pub use status::{Activity, CommandOutcome, PendingCommand, SessionState, SessionStatus};
