//! # cardwatch-session
//!
//! Card session lifecycle management for cardwatch.
//!
//! This crate provides:
//! - The `CardAccess` seam to the card reader library
//! - The `CardSession` state machine and its background read loop
//! - Observer registration for state change notifications
//! - `SimulatedCard`, an in-process card reader for demos and tests
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on cardwatch-core
//! and drives a `CardAccess` implementation supplied by the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod observer;
pub mod session;
pub mod simulated;

// Re-export commonly used types
pub use access::CardAccess;
pub use observer::{ObserverRegistry, SessionObserver, SubscriptionId};
pub use session::CardSession;
pub use simulated::{CardContents, Operation, SimulatedCard};
